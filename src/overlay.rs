//! Formatting overlay: style ranges, line markers, and block descriptors
//! anchored to the piece table (component B, §4.B).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::piece_table::PieceTable;

pub type Attributes = BTreeMap<String, Value>;

/// A run of styled text, anchored to a piece and an intra-piece offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRange {
    pub piece_index: usize,
    pub offset_in_piece: usize,
    pub length: usize,
    pub priority: u32,
    pub attributes: Attributes,
}

impl StyleRange {
    fn overlaps(&self, other: &StyleRange) -> bool {
        self.piece_index == other.piece_index
            && !(self.offset_in_piece + self.length <= other.offset_in_piece
                || other.offset_in_piece + other.length <= self.offset_in_piece)
    }

    fn shares_attribute_key(&self, other: &StyleRange) -> bool {
        self.attributes.keys().any(|k| other.attributes.contains_key(k))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Paragraph,
    Bullet,
    Heading,
}

/// Marks the start of a line at a given anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMarker {
    pub piece_index: usize,
    pub offset_in_piece: usize,
    #[serde(rename = "type")]
    pub line_type: LineType,
    pub properties: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Quote,
    Code,
    List,
}

/// A block of text spanning an inclusive piece/offset range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub start_piece: usize,
    pub start_offset: usize,
    pub end_piece: usize,
    pub end_offset: usize,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub properties: Attributes,
}

impl BlockDescriptor {
    fn overlaps(&self, other: &BlockDescriptor) -> bool {
        let (a_start, a_end) = ((self.start_piece, self.start_offset), (self.end_piece, self.end_offset));
        let (b_start, b_end) = ((other.start_piece, other.start_offset), (other.end_piece, other.end_offset));
        !(a_end <= b_start || b_end <= a_start)
    }
}

/// Style ranges, line markers, and block descriptors layered over a
/// [`PieceTable`]'s pieces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormattingOverlay {
    styles: Vec<StyleRange>,
    lines: Vec<LineMarker>,
    blocks: Vec<BlockDescriptor>,
}

impl FormattingOverlay {
    pub fn new() -> Self {
        FormattingOverlay {
            styles: Vec::new(),
            lines: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn styles(&self) -> &[StyleRange] {
        &self.styles
    }

    pub fn lines(&self) -> &[LineMarker] {
        &self.lines
    }

    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    /// Adds `range`, first removing any existing range that overlaps it and
    /// shares at least one attribute key.
    pub fn add_style(&mut self, range: StyleRange) {
        self.styles
            .retain(|s| !(s.overlaps(&range) && s.shares_attribute_key(&range)));
        self.styles.push(range);
        self.sort_styles();
    }

    /// Adds `marker`, first removing any existing marker at the same
    /// `(piece_index, offset_in_piece)` coordinate.
    pub fn add_line_marker(&mut self, marker: LineMarker) {
        self.lines
            .retain(|m| !(m.piece_index == marker.piece_index && m.offset_in_piece == marker.offset_in_piece));
        self.lines.push(marker);
        self.sort_lines();
    }

    /// Adds `block`, first removing any existing block of the same type
    /// that overlaps it.
    pub fn add_block(&mut self, block: BlockDescriptor) {
        self.blocks
            .retain(|b| !(b.block_type == block.block_type && b.overlaps(&block)));
        self.blocks.push(block);
        self.sort_blocks();
    }

    pub fn styles_at(&self, piece_index: usize, offset: usize) -> Vec<&StyleRange> {
        self.styles
            .iter()
            .filter(|s| {
                s.piece_index == piece_index
                    && s.offset_in_piece <= offset
                    && offset < s.offset_in_piece + s.length
            })
            .collect()
    }

    pub fn line_at(&self, piece_index: usize, offset: usize) -> Option<&LineMarker> {
        self.lines
            .iter()
            .rev()
            .find(|m| {
                m.piece_index < piece_index
                    || (m.piece_index == piece_index && m.offset_in_piece <= offset)
            })
    }

    pub fn block_at(&self, piece_index: usize, offset: usize) -> Option<&BlockDescriptor> {
        self.blocks.iter().find(|b| {
            let pos = (piece_index, offset);
            let start = (b.start_piece, b.start_offset);
            let end = (b.end_piece, b.end_offset);
            pos >= start && pos <= end
        })
    }

    /// For every style/line/block anchor with `piece_index == pi` and
    /// `offset_in_piece >= off`, adds `delta`. Anchors in other pieces are
    /// untouched. The low-level primitive named in §4.B, usable directly
    /// when an edit only changes the length of a piece that keeps its
    /// array index (e.g. trimming a piece's tail without removing it).
    pub fn update_positions(&mut self, pi: usize, off: usize, delta: isize) {
        for s in self.styles.iter_mut().filter(|s| s.piece_index == pi && s.offset_in_piece >= off) {
            s.offset_in_piece = apply_delta(s.offset_in_piece, delta);
        }
        for l in self.lines.iter_mut().filter(|l| l.piece_index == pi && l.offset_in_piece >= off) {
            l.offset_in_piece = apply_delta(l.offset_in_piece, delta);
        }
        for b in self.blocks.iter_mut() {
            if b.start_piece == pi && b.start_offset >= off {
                b.start_offset = apply_delta(b.start_offset, delta);
            }
            if b.end_piece == pi && b.end_offset >= off {
                b.end_offset = apply_delta(b.end_offset, delta);
            }
        }
    }

    /// Reanchors every anchor after an edit that changed the piece array's
    /// shape (split, merge, or whole-piece insertion/removal). Anchors are
    /// translated to a logical character offset against `before`, shifted
    /// by the edit (right-gravity on insert; collapsed onto the edit point
    /// when inside a deleted range), then relocated against `after`.
    ///
    /// This generalizes the single-piece `update_positions` primitive to
    /// piece-array-shape-changing edits, per §9's allowance to translate
    /// anchors through logical offsets at mutation time.
    pub fn reanchor_for_edit(
        &mut self,
        before: &PieceTable,
        pos: usize,
        removed: usize,
        inserted: usize,
        after: &PieceTable,
    ) {
        let shift = |logical: usize| -> usize {
            if removed == 0 {
                if logical >= pos {
                    logical + inserted
                } else {
                    logical
                }
            } else if logical >= pos + removed {
                logical - removed
            } else if logical >= pos {
                pos
            } else {
                logical
            }
        };

        for s in self.styles.iter_mut() {
            let logical = before.logical_offset(s.piece_index, s.offset_in_piece);
            let (pi, off) = after
                .find_piece_at(shift(logical))
                .unwrap_or((after.pieces().len(), 0));
            s.piece_index = pi;
            s.offset_in_piece = off;
        }
        for l in self.lines.iter_mut() {
            let logical = before.logical_offset(l.piece_index, l.offset_in_piece);
            let (pi, off) = after
                .find_piece_at(shift(logical))
                .unwrap_or((after.pieces().len(), 0));
            l.piece_index = pi;
            l.offset_in_piece = off;
        }
        for b in self.blocks.iter_mut() {
            let start_logical = before.logical_offset(b.start_piece, b.start_offset);
            let end_logical = before.logical_offset(b.end_piece, b.end_offset);
            let (sp, so) = after
                .find_piece_at(shift(start_logical))
                .unwrap_or((after.pieces().len(), 0));
            let (ep, eo) = after
                .find_piece_at(shift(end_logical))
                .unwrap_or((after.pieces().len(), 0));
            b.start_piece = sp;
            b.start_offset = so;
            b.end_piece = ep;
            b.end_offset = eo;
        }
    }

    fn sort_styles(&mut self) {
        self.styles.sort_by_key(|s| (s.piece_index, s.offset_in_piece));
    }

    fn sort_lines(&mut self) {
        self.lines.sort_by_key(|l| (l.piece_index, l.offset_in_piece));
    }

    fn sort_blocks(&mut self) {
        self.blocks.sort_by_key(|b| (b.start_piece, b.start_offset));
    }
}

fn apply_delta(value: usize, delta: isize) -> usize {
    if delta >= 0 {
        value + delta as usize
    } else {
        value.saturating_sub((-delta) as usize)
    }
}
