//! Drain batch selection

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use crate::models::{OperationId, OperationStatus, SyncOperation};

/// Priority desc, then timestamp asc, then id asc.
pub fn drain_order(a: &SyncOperation, b: &SyncOperation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.timestamp.cmp(&b.timestamp))
        .then(a.id.cmp(&b.id))
}

/// Pick up to `limit` operations to claim from `candidates`.
///
/// `candidates` is in drain order and must include, for every entity it
/// touches, each unsettled (PENDING, IN_PROGRESS or CONFLICT) operation that
/// precedes a candidate in that entity's write order. An operation is eligible
/// when it is PENDING, due at `now_ms`, and first among the not-yet-picked
/// operations of its entity. Selection repeats until the batch is full or a
/// pass picks nothing new, so a high-priority write queued behind a
/// low-priority one on the same entity still goes out in the same batch,
/// right after it.
pub fn select_batch(candidates: &[SyncOperation], limit: usize, now_ms: i64) -> Vec<OperationId> {
    let mut chains: HashMap<(&str, &str), Vec<&SyncOperation>> = HashMap::new();
    for op in candidates {
        chains
            .entry((op.entity_type.as_str(), op.entity_id.as_str()))
            .or_default()
            .push(op);
    }
    let mut fronts: HashMap<(&str, &str), VecDeque<OperationId>> = chains
        .into_iter()
        .map(|(key, mut chain)| {
            chain.sort_by_key(|op| (op.sequence, op.id));
            (key, chain.into_iter().map(|op| op.id).collect())
        })
        .collect();

    let mut picked = Vec::new();
    while picked.len() < limit {
        let mut progressed = false;

        for op in candidates {
            if picked.len() >= limit {
                break;
            }
            if op.status != OperationStatus::Pending || !op.is_due(now_ms) {
                continue;
            }
            let Some(chain) = fronts.get_mut(&(op.entity_type.as_str(), op.entity_id.as_str()))
            else {
                continue;
            };
            if chain.front() != Some(&op.id) {
                continue;
            }

            chain.pop_front();
            picked.push(op.id);
            progressed = true;
        }

        if !progressed {
            break;
        }
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use pretty_assertions::assert_eq;

    fn op(id: i64, entity_id: &str, priority: i32) -> SyncOperation {
        SyncOperation {
            id: OperationId::new(id),
            sequence: id,
            method: HttpMethod::Put,
            url: format!("/orders/{entity_id}"),
            body: None,
            priority,
            timestamp: id,
            retry_count: 0,
            max_retries: None,
            status: OperationStatus::Pending,
            last_error: None,
            entity_type: "order".to_string(),
            entity_id: entity_id.to_string(),
            conflict_data: None,
            next_attempt_at: 0,
            updated_at: id,
            completed_at: None,
        }
    }

    fn sorted(mut ops: Vec<SyncOperation>) -> Vec<SyncOperation> {
        ops.sort_by(drain_order);
        ops
    }

    fn ids(raw: &[i64]) -> Vec<OperationId> {
        raw.iter().copied().map(OperationId::new).collect()
    }

    #[test]
    fn priority_then_fifo() {
        let active = sorted(vec![op(1, "a", 1), op(2, "b", 5), op(3, "c", 1)]);
        assert_eq!(select_batch(&active, 3, 0), ids(&[2, 1, 3]));
    }

    #[test]
    fn respects_limit() {
        let active = sorted(vec![op(1, "a", 0), op(2, "b", 0), op(3, "c", 0)]);
        assert_eq!(select_batch(&active, 2, 0), ids(&[1, 2]));
        assert!(select_batch(&active, 0, 0).is_empty());
    }

    #[test]
    fn same_entity_keeps_write_order_despite_priority() {
        // Newer op on entity "a" has higher priority but must follow op 1.
        let active = sorted(vec![op(1, "a", 0), op(2, "b", 3), op(3, "a", 9)]);
        assert_eq!(select_batch(&active, 3, 0), ids(&[2, 1, 3]));
    }

    #[test]
    fn blocked_entity_waits_for_older_op_outside_batch() {
        let active = sorted(vec![op(1, "a", 0), op(2, "a", 9)]);
        assert_eq!(select_batch(&active, 1, 0), ids(&[1]));
    }

    #[test]
    fn not_yet_due_op_blocks_its_entity() {
        let mut waiting = op(1, "a", 0);
        waiting.next_attempt_at = 500;
        let active = sorted(vec![waiting, op(2, "a", 0), op(3, "b", 0)]);

        assert_eq!(select_batch(&active, 3, 100), ids(&[3]));
        assert_eq!(select_batch(&active, 3, 500), ids(&[1, 2, 3]));
    }

    #[test]
    fn in_progress_op_blocks_its_entity() {
        let mut running = op(1, "a", 0);
        running.status = OperationStatus::InProgress;
        let active = sorted(vec![running, op(2, "a", 0), op(3, "b", 0)]);
        assert_eq!(select_batch(&active, 3, 0), ids(&[3]));
    }

    #[test]
    fn conflicted_op_blocks_its_entity() {
        let mut conflicted = op(1, "a", 0);
        conflicted.status = OperationStatus::Conflict;
        let active = sorted(vec![conflicted, op(2, "a", 0), op(3, "b", 0)]);
        assert_eq!(select_batch(&active, 3, 0), ids(&[3]));
    }

    #[test]
    fn replacement_keeps_original_write_position() {
        // Op 3 replaced a conflicted op that was queued before op 2.
        let mut replacement = op(3, "a", 0);
        replacement.sequence = 1;
        let active = sorted(vec![op(2, "a", 0), replacement]);
        assert_eq!(select_batch(&active, 2, 0), ids(&[3, 2]));
    }

    #[test]
    fn long_chain_drains_in_one_batch() {
        let active = sorted((1..=200).map(|id| op(id, "a", 0)).collect());
        let picked = select_batch(&active, 200, 0);
        assert_eq!(picked, ids(&(1..=200).collect::<Vec<_>>()));
    }
}
