//! Document snapshots (component C, §4.C): an immutable
//! `(version, piece_table, formatting_overlay)` triple.

use serde::{Deserialize, Serialize};

use crate::overlay::{BlockDescriptor, FormattingOverlay, LineMarker, StyleRange};
use crate::piece_table::{Piece, PieceTable, PieceTableWire};
use crate::version::Version;

/// Wire representation of a [`DocumentSnapshot`], per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotWire {
    #[serde(rename = "originalBuffer")]
    pub original_buffer: String,
    #[serde(rename = "addBuffer")]
    pub add_buffer: String,
    pub pieces: Vec<Piece>,
    pub styles: Vec<StyleRange>,
    pub lines: Vec<LineMarker>,
    #[serde(default)]
    pub blocks: Vec<BlockDescriptor>,
}

/// An immutable, versioned document state. Published by the
/// [`crate::session::SessionCoordinator`] after each successful apply.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    version: Version,
    table: PieceTable,
    overlay: FormattingOverlay,
}

impl DocumentSnapshot {
    /// An empty document at [`Version::INITIAL`].
    pub fn empty() -> Self {
        DocumentSnapshot {
            version: Version::INITIAL,
            table: PieceTable::new(),
            overlay: FormattingOverlay::new(),
        }
    }

    pub fn new(version: Version, table: PieceTable, overlay: FormattingOverlay) -> Self {
        DocumentSnapshot { version, table, overlay }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn table(&self) -> &PieceTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut PieceTable {
        &mut self.table
    }

    pub fn overlay(&self) -> &FormattingOverlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut FormattingOverlay {
        &mut self.overlay
    }

    /// Disjoint mutable access to the table and overlay, for callers (like
    /// [`crate::diff::DiffEngine::apply`]) that must edit both together.
    pub fn split_mut(&mut self) -> (&mut PieceTable, &mut FormattingOverlay) {
        (&mut self.table, &mut self.overlay)
    }

    pub fn text(&self) -> String {
        self.table.text()
    }

    /// A new snapshot with the same content, tagged at the next version.
    pub fn with_next_version(&self) -> Self {
        DocumentSnapshot {
            version: self.version.next(),
            table: self.table.clone(),
            overlay: self.overlay.clone(),
        }
    }

    pub fn to_wire(&self) -> SnapshotWire {
        let PieceTableWire {
            original_buffer,
            add_buffer,
            pieces,
        } = self.table.to_wire();
        SnapshotWire {
            original_buffer,
            add_buffer,
            pieces,
            styles: self.overlay.styles().to_vec(),
            lines: self.overlay.lines().to_vec(),
            blocks: self.overlay.blocks().to_vec(),
        }
    }

    pub fn from_wire(version: Version, wire: SnapshotWire) -> Self {
        let table = PieceTable::from_wire(PieceTableWire {
            original_buffer: wire.original_buffer,
            add_buffer: wire.add_buffer,
            pieces: wire.pieces,
        });
        let mut overlay = FormattingOverlay::new();
        for style in wire.styles {
            overlay.add_style(style);
        }
        for line in wire.lines {
            overlay.add_line_marker(line);
        }
        for block in wire.blocks {
            overlay.add_block(block);
        }
        DocumentSnapshot { version, table, overlay }
    }
}

impl PartialEq for DocumentSnapshot {
    fn eq(&self, other: &Self) -> bool {
        if self.version != other.version {
            return false;
        }
        let a = serde_json::to_value(self.to_wire()).expect("snapshot always serializes");
        let b = serde_json::to_value(other.to_wire()).expect("snapshot always serializes");
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::LineType;

    #[test]
    fn empty_snapshot_is_version_one() {
        let snap = DocumentSnapshot::empty();
        assert_eq!(snap.version().to_wire(), 1.0);
        assert_eq!(snap.text(), "");
    }

    #[test]
    fn wire_round_trip_preserves_text_and_overlay() {
        let mut snap = DocumentSnapshot::empty();
        {
            let table = snap.table_mut();
            let mut overlay = FormattingOverlay::new();
            table.insert(0, "Hello world", &mut overlay).unwrap();
            *snap.overlay_mut() = overlay;
        }
        snap.overlay_mut().add_line_marker(LineMarker {
            piece_index: 0,
            offset_in_piece: 0,
            line_type: LineType::Paragraph,
            properties: Default::default(),
        });

        let wire = snap.to_wire();
        let restored = DocumentSnapshot::from_wire(snap.version(), wire);
        assert_eq!(restored.text(), snap.text());
        assert_eq!(restored.overlay().lines().len(), snap.overlay().lines().len());
        assert_eq!(restored, snap);
    }
}
