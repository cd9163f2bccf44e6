//! Piece-table text representation (component A, §4.A).
//!
//! Two append-only buffers (`original`, `add`) and an ordered sequence of
//! [`Piece`]s, each a slice into one of the buffers. Text is never mutated
//! in place; an edit only ever replaces pieces with one or two new pieces
//! covering the same or adjacent buffer ranges.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::overlay::FormattingOverlay;

/// Which append-only buffer a [`Piece`] slices into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferTag {
    Original,
    Add,
}

/// A view into one of the two buffers. Never mutated once created; an edit
/// replaces it with one or two pieces of equivalent combined content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub buffer: BufferTag,
    pub start: usize,
    pub length: usize,
    pub line_start: bool,
}

/// Wire representation of a [`PieceTable`], per §6's snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceTableWire {
    #[serde(rename = "originalBuffer")]
    pub original_buffer: String,
    #[serde(rename = "addBuffer")]
    pub add_buffer: String,
    pub pieces: Vec<Piece>,
}

/// Immutable-append text buffers plus a sequence of pieces describing the
/// logical document text.
#[derive(Debug, Clone, Default)]
pub struct PieceTable {
    original: String,
    add: String,
    pieces: Vec<Piece>,
}

impl PieceTable {
    /// An empty document: both buffers empty, no pieces.
    pub fn new() -> Self {
        PieceTable {
            original: String::new(),
            add: String::new(),
            pieces: Vec::new(),
        }
    }

    /// Creates a table whose `Original` buffer is seeded with `text`, as a
    /// single piece. Used to import content created outside the normal
    /// edit lifecycle (e.g. restoring a historical snapshot as a base).
    pub fn from_original(text: impl Into<String>) -> Self {
        let original = text.into();
        let pieces = if original.is_empty() {
            Vec::new()
        } else {
            vec![Piece {
                buffer: BufferTag::Original,
                start: 0,
                length: original.chars().count(),
                line_start: false,
            }]
        };
        PieceTable {
            original,
            add: String::new(),
            pieces,
        }
    }

    /// Logical document length, in characters.
    pub fn len(&self) -> usize {
        self.pieces.iter().map(|p| p.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    fn buffer_for(&self, tag: BufferTag) -> &str {
        match tag {
            BufferTag::Original => &self.original,
            BufferTag::Add => &self.add,
        }
    }

    fn piece_text(&self, piece: &Piece) -> String {
        char_slice(self.buffer_for(piece.buffer), piece.start, piece.length)
    }

    /// Full logical text.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            out.push_str(&self.piece_text(piece));
        }
        out
    }

    /// Concatenates the character range `[pos, pos+len)` across pieces.
    pub fn text_of_range(&self, pos: usize, len: usize) -> Result<String, CoreError> {
        if pos + len > self.len() {
            return Err(CoreError::InvalidPosition {
                position: pos + len,
                length: self.len(),
            });
        }
        if len == 0 {
            return Ok(String::new());
        }
        let mut out = String::new();
        let mut cursor = 0usize;
        for piece in &self.pieces {
            let piece_start = cursor;
            let piece_end = cursor + piece.length;
            cursor = piece_end;
            let lo = pos.max(piece_start);
            let hi = (pos + len).min(piece_end);
            if lo < hi {
                let text = self.piece_text(piece);
                let rel_lo = lo - piece_start;
                let rel_hi = hi - piece_start;
                out.push_str(&char_slice(&text, rel_lo, rel_hi - rel_lo));
            }
            if piece_end >= pos + len {
                break;
            }
        }
        Ok(out)
    }

    /// Locates the piece containing character offset `pos` and the
    /// intra-piece offset within it. `pos == length` returns
    /// `(n_pieces, 0)`, allowing append. Returns `None` if out of range.
    pub fn find_piece_at(&self, pos: usize) -> Option<(usize, usize)> {
        if pos > self.len() {
            return None;
        }
        let mut cursor = 0usize;
        for (i, piece) in self.pieces.iter().enumerate() {
            if pos < cursor + piece.length {
                return Some((i, pos - cursor));
            }
            cursor += piece.length;
        }
        Some((self.pieces.len(), 0))
    }

    /// Inverse of [`PieceTable::find_piece_at`]: the logical character
    /// offset of `(piece_index, offset_in_piece)`. `piece_index ==
    /// pieces().len()` denotes end-of-document.
    pub(crate) fn logical_offset(&self, piece_index: usize, offset_in_piece: usize) -> usize {
        let base: usize = self.pieces[..piece_index.min(self.pieces.len())]
            .iter()
            .map(|p| p.length)
            .sum();
        base + offset_in_piece
    }

    /// Inserts `text` at character position `pos`, reanchoring the
    /// [`FormattingOverlay`] in lockstep.
    pub fn insert(
        &mut self,
        pos: usize,
        text: &str,
        overlay: &mut FormattingOverlay,
    ) -> Result<(), CoreError> {
        let length = self.len();
        if pos > length {
            return Err(CoreError::InvalidPosition { position: pos, length });
        }
        if text.is_empty() {
            return Ok(());
        }

        let before = self.clone();
        let inserted_len = text.chars().count();
        let add_start = self.add.chars().count();
        self.add.push_str(text);

        let (piece_index, intra_offset) = self.find_piece_at(pos).expect("pos validated above");

        let new_piece = Piece {
            buffer: BufferTag::Add,
            start: add_start,
            length: inserted_len,
            line_start: false,
        };

        if piece_index == self.pieces.len() || intra_offset == 0 {
            self.pieces.insert(piece_index, new_piece);
        } else {
            let existing = self.pieces[piece_index];
            if intra_offset == existing.length {
                self.pieces.insert(piece_index + 1, new_piece);
            } else {
                let left = Piece {
                    length: intra_offset,
                    ..existing
                };
                let right = Piece {
                    buffer: existing.buffer,
                    start: existing.start + intra_offset,
                    length: existing.length - intra_offset,
                    line_start: false,
                };
                self.pieces[piece_index] = left;
                self.pieces.insert(piece_index + 1, new_piece);
                self.pieces.insert(piece_index + 2, right);
            }
        }

        overlay.reanchor_for_edit(&before, pos, 0, inserted_len, self);
        Ok(())
    }

    /// Deletes `len` characters starting at `pos`.
    pub fn delete(
        &mut self,
        pos: usize,
        len: usize,
        overlay: &mut FormattingOverlay,
    ) -> Result<(), CoreError> {
        let length = self.len();
        if pos + len > length {
            return Err(CoreError::InvalidPosition {
                position: pos + len,
                length,
            });
        }
        if len == 0 {
            return Ok(());
        }

        let before = self.clone();
        let (start_piece, start_offset) = self.find_piece_at(pos).expect("validated above");
        let (end_piece, end_offset) = self.find_piece_at(pos + len).expect("validated above");

        if start_piece == end_piece {
            // The entire deleted range sits inside one piece.
            let original = self.pieces[start_piece];
            let keeps_left = start_offset > 0;
            let keeps_right = end_offset < original.length;
            match (keeps_left, keeps_right) {
                (false, false) => {
                    self.pieces.remove(start_piece);
                }
                (false, true) => {
                    self.pieces[start_piece] = Piece {
                        buffer: original.buffer,
                        start: original.start + end_offset,
                        length: original.length - end_offset,
                        line_start: false,
                    };
                }
                (true, false) => {
                    self.pieces[start_piece] = Piece {
                        length: start_offset,
                        ..original
                    };
                }
                (true, true) => {
                    let left = Piece {
                        length: start_offset,
                        ..original
                    };
                    let right = Piece {
                        buffer: original.buffer,
                        start: original.start + end_offset,
                        length: original.length - end_offset,
                        line_start: false,
                    };
                    self.pieces[start_piece] = left;
                    self.pieces.insert(start_piece + 1, right);
                }
            }
        } else {
            let mut remove_from = start_piece;
            if start_offset > 0 {
                let piece = self.pieces[start_piece];
                self.pieces[start_piece] = Piece {
                    length: start_offset,
                    ..piece
                };
                remove_from = start_piece + 1;
            }

            if end_offset > 0 {
                let piece = self.pieces[end_piece];
                self.pieces[end_piece] = Piece {
                    buffer: piece.buffer,
                    start: piece.start + end_offset,
                    length: piece.length - end_offset,
                    line_start: false,
                };
            }
            let remove_to = end_piece;

            if remove_from < remove_to {
                self.pieces.drain(remove_from..remove_to);
            }
        }

        overlay.reanchor_for_edit(&before, pos, len, 0, self);
        Ok(())
    }

    pub fn to_wire(&self) -> PieceTableWire {
        PieceTableWire {
            original_buffer: self.original.clone(),
            add_buffer: self.add.clone(),
            pieces: self.pieces.clone(),
        }
    }

    pub fn from_wire(wire: PieceTableWire) -> Self {
        PieceTable {
            original: wire.original_buffer,
            add: wire.add_buffer,
            pieces: wire.pieces,
        }
    }
}

/// Extracts `len` characters starting at character offset `start` from `s`.
fn char_slice(s: &str, start: usize, len: usize) -> String {
    s.chars().skip(start).take(len).collect()
}

impl std::fmt::Display for PieceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay() -> FormattingOverlay {
        FormattingOverlay::new()
    }

    #[test]
    fn insert_builds_up_text() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "Hello", &mut ov).unwrap();
        pt.insert(5, "!", &mut ov).unwrap();
        assert_eq!(pt.text(), "Hello!");
        pt.insert(5, " World", &mut ov).unwrap();
        assert_eq!(pt.text(), "Hello World!");
    }

    #[test]
    fn insert_rejects_out_of_range() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "hi", &mut ov).unwrap();
        assert!(matches!(
            pt.insert(10, "x", &mut ov),
            Err(CoreError::InvalidPosition { .. })
        ));
    }

    #[test]
    fn delete_across_pieces() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "the quick brown fox", &mut ov).unwrap();
        pt.insert(4, "very ", &mut ov).unwrap();
        assert_eq!(pt.text(), "the very quick brown fox");
        pt.delete(4, 5, &mut ov).unwrap();
        assert_eq!(pt.text(), "the quick brown fox");
    }

    #[test]
    fn delete_rejects_out_of_range() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "hi", &mut ov).unwrap();
        assert!(matches!(
            pt.delete(1, 5, &mut ov),
            Err(CoreError::InvalidPosition { .. })
        ));
    }

    #[test]
    fn insert_then_delete_round_trips_content() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "the quick brown fox jumps over the lazy dog", &mut ov)
            .unwrap();
        let before = pt.text();
        pt.insert(10, "VERY ", &mut ov).unwrap();
        pt.delete(10, 5, &mut ov).unwrap();
        assert_eq!(pt.text(), before);
    }

    #[test]
    fn length_matches_sum_of_piece_lengths() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "abcdef", &mut ov).unwrap();
        pt.insert(3, "XYZ", &mut ov).unwrap();
        pt.delete(0, 2, &mut ov).unwrap();
        let sum: usize = pt.pieces().iter().map(|p| p.length).sum();
        assert_eq!(sum, pt.len());
        assert!(pt.pieces().iter().all(|p| p.length > 0));
    }

    #[test]
    fn wire_round_trip() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "hello world", &mut ov).unwrap();
        pt.delete(5, 1, &mut ov).unwrap();
        let wire = pt.to_wire();
        let restored = PieceTable::from_wire(wire);
        assert_eq!(restored.text(), pt.text());
    }

    #[test]
    fn unicode_insert_and_delete() {
        let mut pt = PieceTable::new();
        let mut ov = overlay();
        pt.insert(0, "héllo wörld", &mut ov).unwrap();
        assert_eq!(pt.len(), "héllo wörld".chars().count());
        pt.delete(1, 1, &mut ov).unwrap();
        assert_eq!(pt.text(), "hllo wörld");
    }
}
