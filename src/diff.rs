//! Diff engine (component D, §4.D): derives a minimal operation list that
//! transforms one document snapshot into another.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::overlay::{Attributes, LineType, StyleRange};
use crate::snapshot::DocumentSnapshot;

/// A single unit of change, per §9 "Polymorphic operation".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Op {
    Insert { position: usize, content: String },
    Delete { position: usize, length: usize },
    Style { position: usize, length: usize, attributes: Attributes },
    Line { position: usize, line_type: LineType, properties: Attributes },
    Compound { ops: Vec<Op> },
}

impl Op {
    /// The `[position, position + extent)` interval this op affects on the
    /// base text, used for overlap testing in the merge engine.
    pub fn range(&self) -> Option<(usize, usize)> {
        match self {
            Op::Insert { position, content } => Some((*position, *position + content.chars().count())),
            Op::Delete { position, length } => Some((*position, *position + length)),
            Op::Style { position, length, .. } => Some((*position, *position + length)),
            Op::Line { position, .. } => Some((*position, *position)),
            Op::Compound { .. } => None,
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            Op::Insert { position, .. }
            | Op::Delete { position, .. }
            | Op::Style { position, .. }
            | Op::Line { position, .. } => Some(*position),
            Op::Compound { .. } => None,
        }
    }
}

/// Computes and applies operation lists between document snapshots.
pub struct DiffEngine;

impl DiffEngine {
    /// Derives an op list that turns `source`'s text and overlay into
    /// `target`'s. Applying the result to `source` reproduces `target`.
    pub fn diff(source: &DocumentSnapshot, target: &DocumentSnapshot) -> Vec<Op> {
        let mut ops = Self::diff_text(&source.text(), &target.text());
        ops.extend(Self::diff_styles(source, target));
        ops.extend(Self::diff_lines(source, target));
        ops
    }

    fn diff_text(source: &str, target: &str) -> Vec<Op> {
        let s: Vec<char> = source.chars().collect();
        let t: Vec<char> = target.chars().collect();
        let lcs = longest_common_subsequence(&s, &t);

        let mut ops = Vec::new();
        let (mut si, mut ti) = (0usize, 0usize);
        for (lcs_s, lcs_t) in lcs {
            while si < lcs_s {
                ops.push(Op::Delete { position: si, length: 1 });
                si += 1;
            }
            while ti < lcs_t {
                ops.push(Op::Insert {
                    position: ti,
                    content: t[ti].to_string(),
                });
                ti += 1;
            }
            si += 1;
            ti += 1;
        }
        while si < s.len() {
            ops.push(Op::Delete { position: si, length: 1 });
            si += 1;
        }
        while ti < t.len() {
            ops.push(Op::Insert {
                position: ti,
                content: t[ti].to_string(),
            });
            ti += 1;
        }

        optimize(ops)
    }

    fn diff_styles(source: &DocumentSnapshot, target: &DocumentSnapshot) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut matched = vec![false; source.overlay().styles().len()];

        for target_style in target.overlay().styles() {
            let source_match = source.overlay().styles().iter().enumerate().find(|(_, s)| {
                s.piece_index == target_style.piece_index
                    && s.offset_in_piece == target_style.offset_in_piece
                    && s.length == target_style.length
            });
            match source_match {
                Some((i, s)) => {
                    matched[i] = true;
                    if s.attributes != target_style.attributes {
                        ops.push(style_op(target, target_style));
                    }
                }
                None => ops.push(style_op(target, target_style)),
            }
        }
        for (i, s) in source.overlay().styles().iter().enumerate() {
            if !matched[i] {
                ops.push(Op::Style {
                    position: anchor_position(source, s.piece_index, s.offset_in_piece),
                    length: s.length,
                    attributes: Attributes::new(),
                });
            }
        }
        ops
    }

    fn diff_lines(source: &DocumentSnapshot, target: &DocumentSnapshot) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut matched = vec![false; source.overlay().lines().len()];

        for target_line in target.overlay().lines() {
            let source_match = source.overlay().lines().iter().enumerate().find(|(_, l)| {
                l.piece_index == target_line.piece_index && l.offset_in_piece == target_line.offset_in_piece
            });
            match source_match {
                Some((i, l)) => {
                    matched[i] = true;
                    if l.line_type != target_line.line_type || l.properties != target_line.properties {
                        ops.push(Op::Line {
                            position: anchor_position(target, target_line.piece_index, target_line.offset_in_piece),
                            line_type: target_line.line_type,
                            properties: target_line.properties.clone(),
                        });
                    }
                }
                None => ops.push(Op::Line {
                    position: anchor_position(target, target_line.piece_index, target_line.offset_in_piece),
                    line_type: target_line.line_type,
                    properties: target_line.properties.clone(),
                }),
            }
        }
        for (i, l) in source.overlay().lines().iter().enumerate() {
            if !matched[i] {
                ops.push(Op::Line {
                    position: anchor_position(source, l.piece_index, l.offset_in_piece),
                    line_type: LineType::Paragraph,
                    properties: Attributes::new(),
                });
            }
        }
        ops
    }

    /// Applies `ops` left to right to `snapshot`, maintaining a running
    /// position offset for already-applied insertions/deletions.
    pub fn apply(snapshot: &mut DocumentSnapshot, ops: &[Op]) -> Result<(), CoreError> {
        let mut offset: isize = 0;
        Self::apply_inner(snapshot, ops, &mut offset)
    }

    fn apply_inner(snapshot: &mut DocumentSnapshot, ops: &[Op], offset: &mut isize) -> Result<(), CoreError> {
        for op in ops {
            match op {
                Op::Insert { position, content } => {
                    let pos = shift(*position, *offset);
                    let (table, overlay) = snapshot.split_mut();
                    table.insert(pos, content, overlay)?;
                    *offset += content.chars().count() as isize;
                }
                Op::Delete { position, length } => {
                    let pos = shift(*position, *offset);
                    let (table, overlay) = snapshot.split_mut();
                    table.delete(pos, *length, overlay)?;
                    *offset -= *length as isize;
                }
                Op::Style { position, length, attributes } => {
                    let pos = shift(*position, *offset);
                    let table_len = snapshot.table().len();
                    if pos + *length > table_len {
                        return Err(CoreError::InvalidPosition { position: pos + *length, length: table_len });
                    }
                    let (piece_index, offset_in_piece) =
                        snapshot.table().find_piece_at(pos).expect("validated above");
                    snapshot.overlay_mut().add_style(StyleRange {
                        piece_index,
                        offset_in_piece,
                        length: *length,
                        priority: 0,
                        attributes: attributes.clone(),
                    });
                }
                Op::Line { position, line_type, properties } => {
                    let pos = shift(*position, *offset);
                    let table_len = snapshot.table().len();
                    if pos > table_len {
                        return Err(CoreError::InvalidPosition { position: pos, length: table_len });
                    }
                    let (piece_index, offset_in_piece) =
                        snapshot.table().find_piece_at(pos).expect("validated above");
                    snapshot.overlay_mut().add_line_marker(crate::overlay::LineMarker {
                        piece_index,
                        offset_in_piece,
                        line_type: *line_type,
                        properties: properties.clone(),
                    });
                }
                Op::Compound { ops } => Self::apply_inner(snapshot, ops, offset)?,
            }
        }
        Ok(())
    }
}

fn style_op(snapshot: &DocumentSnapshot, style: &StyleRange) -> Op {
    Op::Style {
        position: anchor_position(snapshot, style.piece_index, style.offset_in_piece),
        length: style.length,
        attributes: style.attributes.clone(),
    }
}

/// Resolves an anchor's position field for a style/line op. Positions in
/// the diff's op stream are expressed relative to the snapshot they were
/// read from; since anchors are piece-local, we report the intra-piece
/// offset (matching the source's `offsetInPiece`-keyed comparison), which
/// [`DiffEngine::apply`] resolves back into a piece/offset pair at apply
/// time via [`crate::piece_table::PieceTable::find_piece_at`].
fn anchor_position(snapshot: &DocumentSnapshot, piece_index: usize, offset_in_piece: usize) -> usize {
    snapshot.table().logical_offset(piece_index, offset_in_piece)
}

fn shift(position: usize, offset: isize) -> usize {
    if offset >= 0 {
        position + offset as usize
    } else {
        position.saturating_sub((-offset) as usize)
    }
}

fn optimize(ops: Vec<Op>) -> Vec<Op> {
    let mut out: Vec<Op> = Vec::new();
    for op in ops {
        match (out.last_mut(), &op) {
            (Some(Op::Delete { position, length }), Op::Delete { position: p2, length: l2 })
                if *position + *length == *p2 =>
            {
                *length += l2;
            }
            (Some(Op::Insert { position, content }), Op::Insert { position: p2, content: c2 })
                if *position + content.chars().count() == *p2 =>
            {
                content.push_str(c2);
            }
            _ => out.push(op),
        }
    }
    out
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> Vec<(usize, usize)> {
    let (m, n) = (a.len(), b.len());
    let mut dp = vec![vec![0u32; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    let mut path = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            path.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] > dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    fn snapshot_of(text: &str) -> DocumentSnapshot {
        let mut snap = DocumentSnapshot::empty();
        let (table, overlay) = snap.split_mut();
        table.insert(0, text, overlay).unwrap();
        snap
    }

    #[test]
    fn diff_law_holds_for_text_edits() {
        let a = snapshot_of("the quick brown fox");
        let b = snapshot_of("the slow brown fox jumps");
        let ops = DiffEngine::diff(&a, &b);
        let mut applied = a.clone();
        DiffEngine::apply(&mut applied, &ops).unwrap();
        assert_eq!(applied.text(), b.text());
    }

    #[test]
    fn diff_is_empty_for_identical_snapshots() {
        let a = snapshot_of("same text");
        let b = snapshot_of("same text");
        let ops = DiffEngine::diff(&a, &b);
        assert!(ops.is_empty());
    }

    #[test]
    fn optimize_merges_adjacent_deletes() {
        let ops = vec![
            Op::Delete { position: 2, length: 1 },
            Op::Delete { position: 3, length: 1 },
        ];
        let optimized = optimize(ops);
        assert_eq!(optimized, vec![Op::Delete { position: 2, length: 2 }]);
    }

    #[test]
    fn diff_detects_style_addition_and_removal() {
        let a = snapshot_of("hello world");
        let mut b = a.clone();
        let (pi, off) = b.table().find_piece_at(0).unwrap();
        b.overlay_mut().add_style(StyleRange {
            piece_index: pi,
            offset_in_piece: off,
            length: 5,
            priority: 0,
            attributes: [("bold".to_string(), serde_json::Value::Bool(true))].into(),
        });
        let ops = DiffEngine::diff(&a, &b);
        assert!(ops.iter().any(|op| matches!(op, Op::Style { .. })));
    }
}
