//! Merge engine (component E, §4.E): three-way reconciliation of a client
//! change against the current server state.

use crate::diff::{DiffEngine, Op};
use crate::error::CoreError;
use crate::snapshot::DocumentSnapshot;

/// Reconciles a client's change (authored against `base`) with `current`,
/// the server's state after zero or more concurrent edits.
pub struct MergeEngine;

impl MergeEngine {
    /// Given the snapshot the client last observed (`base`), the current
    /// server snapshot, and the client's operation (expressed relative to
    /// `base`), returns the operation to apply to `current`.
    ///
    /// `client_op` is never [`Op::Compound`]; callers only ever merge a
    /// single operation at a time (§6's inbound `operation` message carries
    /// exactly one).
    pub fn merge(base: &DocumentSnapshot, current: &DocumentSnapshot, client_op: &Op) -> Result<Op, CoreError> {
        let server_ops = DiffEngine::diff(base, current);

        let (client_start, client_extent) = client_extent(client_op);
        let mut pos = client_start;
        let mut overlapped = false;

        for server_op in &server_ops {
            let (s_pos, s_removed, s_inserted, s_extent) = server_effect(server_op);

            let overlaps = !(s_pos + s_extent <= pos || pos + client_extent <= s_pos);
            if overlaps {
                if let (Op::Style { position, length, attributes: s_attrs }, Op::Style { attributes: c_attrs, .. }) =
                    (server_op, client_op)
                {
                    // Both sides are style changes: union attributes, client
                    // wins on key conflicts, range taken from the server.
                    let mut merged = s_attrs.clone();
                    for (k, v) in c_attrs {
                        merged.insert(k.clone(), v.clone());
                    }
                    return Ok(Op::Style {
                        position: *position,
                        length: *length,
                        attributes: merged,
                    });
                }
                if matches!(server_op, Op::Insert { .. } | Op::Delete { .. }) {
                    // Last-writer-wins: the client is authoritative over the
                    // overlap region; its anchor collapses onto the point
                    // where the server's edit now sits in `current`.
                    pos = s_pos;
                    overlapped = true;
                }
                continue;
            }

            if s_pos <= pos {
                pos = if s_inserted >= s_removed {
                    pos + (s_inserted - s_removed)
                } else {
                    pos.saturating_sub(s_removed - s_inserted)
                };
            }
        }
        let _ = overlapped;

        let rebased = rebuild_at(client_op, pos);
        validate_against(current, &rebased)?;
        Ok(rebased)
    }
}

/// `(start, extent)` of an op's affected interval on its source text.
fn client_extent(op: &Op) -> (usize, usize) {
    match op {
        Op::Insert { position, content } => (*position, content.chars().count()),
        Op::Delete { position, length } => (*position, *length),
        Op::Style { position, length, .. } => (*position, *length),
        Op::Line { position, .. } => (*position, 0),
        Op::Compound { .. } => (0, 0),
    }
}

/// `(position, removed, inserted, extent)` for a server-diff op: `removed`
/// and `inserted` describe the structural text shift it causes, `extent`
/// is the overlap-test interval length from §4.E step 3.
fn server_effect(op: &Op) -> (usize, usize, usize, usize) {
    match op {
        Op::Insert { position, content } => {
            let n = content.chars().count();
            (*position, 0, n, n)
        }
        Op::Delete { position, length } => (*position, *length, 0, *length),
        Op::Style { position, length, .. } => (*position, 0, 0, *length),
        Op::Line { position, .. } => (*position, 0, 0, 0),
        Op::Compound { .. } => (0, 0, 0, 0),
    }
}

fn rebuild_at(op: &Op, position: usize) -> Op {
    match op {
        Op::Insert { content, .. } => Op::Insert { position, content: content.clone() },
        Op::Delete { length, .. } => Op::Delete { position, length: *length },
        Op::Style { length, attributes, .. } => Op::Style {
            position,
            length: *length,
            attributes: attributes.clone(),
        },
        Op::Line { line_type, properties, .. } => Op::Line {
            position,
            line_type: *line_type,
            properties: properties.clone(),
        },
        Op::Compound { ops } => Op::Compound { ops: ops.clone() },
    }
}

fn validate_against(current: &DocumentSnapshot, op: &Op) -> Result<(), CoreError> {
    let length = current.table().len();
    let (start, extent) = client_extent(op);
    if start > length || start + extent > length {
        return Err(CoreError::VersionConflict {
            current_version: current.version().tenths(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Attributes, LineType, StyleRange};
    use serde_json::Value;

    fn with_text(text: &str) -> DocumentSnapshot {
        let mut snap = DocumentSnapshot::empty();
        let (table, overlay) = snap.split_mut();
        table.insert(0, text, overlay).unwrap();
        snap
    }

    fn apply(snapshot: &DocumentSnapshot, op: &Op) -> DocumentSnapshot {
        let mut next = snapshot.with_next_version();
        DiffEngine::apply(&mut next, std::slice::from_ref(op)).unwrap();
        next
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn concurrent_non_overlapping_inserts_rebase() {
        let base = with_text("abcdef");
        let current = apply(&base, &Op::Insert { position: 1, content: "X".into() });
        assert_eq!(current.text(), "aXbcdef");

        let client_op = Op::Insert { position: 4, content: "Y".into() };
        let merged = MergeEngine::merge(&base, &current, &client_op).unwrap();
        assert_eq!(merged, Op::Insert { position: 5, content: "Y".into() });

        let result = apply(&current, &merged);
        assert_eq!(result.text(), "aXbcdYef");
    }

    #[test]
    fn style_merge_unions_attributes_client_wins_conflicts() {
        let mut base = with_text("hello");
        let (pi, off) = base.table().find_piece_at(2).unwrap();
        base.overlay_mut().add_style(StyleRange {
            piece_index: pi,
            offset_in_piece: off,
            length: 3,
            priority: 0,
            attributes: attrs(&[("bold", Value::Bool(true))]),
        });

        let current = apply(
            &base,
            &Op::Style {
                position: 2,
                length: 3,
                attributes: attrs(&[("underline", Value::Bool(true))]),
            },
        );

        let client_op = Op::Style {
            position: 2,
            length: 3,
            attributes: attrs(&[("bold", Value::Bool(false)), ("italic", Value::Bool(true))]),
        };
        let merged = MergeEngine::merge(&base, &current, &client_op).unwrap();
        match merged {
            Op::Style { attributes, .. } => {
                assert_eq!(attributes.get("bold"), Some(&Value::Bool(false)));
                assert_eq!(attributes.get("italic"), Some(&Value::Bool(true)));
                assert_eq!(attributes.get("underline"), Some(&Value::Bool(true)));
            }
            _ => panic!("expected style op"),
        }
    }

    #[test]
    fn overlapping_text_edits_last_writer_wins() {
        let base = with_text("hello");
        let current = apply(&base, &Op::Delete { position: 1, length: 3 }); // "ho"
        assert_eq!(current.text(), "ho");

        let client_op = Op::Insert { position: 3, content: "X".into() };
        let merged = MergeEngine::merge(&base, &current, &client_op).unwrap();
        assert_eq!(merged, Op::Insert { position: 1, content: "X".into() });

        let result = apply(&current, &merged);
        assert_eq!(result.text(), "hXo");
    }

    #[test]
    fn stale_merge_out_of_range_is_version_conflict() {
        let base = with_text("hi");
        let current = apply(&base, &Op::Delete { position: 0, length: 2 });
        assert_eq!(current.text(), "");

        let client_op = Op::Insert { position: 1, content: "x".into() };
        let err = MergeEngine::merge(&base, &current, &client_op).unwrap_err();
        assert!(matches!(err, CoreError::VersionConflict { .. }));
    }

    #[test]
    fn unused_line_type_import_is_exercised() {
        let _ = LineType::Paragraph;
    }
}
