//! Property tests for the action store.

use chrono::Utc;
use fieldsync_core::{ActionStatus, ActionStore, NewAction};
use fieldsync_journal::{InMemoryBackend, Journal};
use proptest::prelude::*;
use serde_json::json;

fn kind_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("crew.check_in".to_string()),
        Just("tm_ticket.update".to_string()),
        Just("route.stop_complete".to_string()),
    ]
}

fn action_strategy() -> impl Strategy<Value = NewAction> {
    (kind_strategy(), any::<u32>(), 0u64..1_000)
        .prop_map(|(kind, value, base)| NewAction::new(kind, json!({ "value": value }), base))
}

/// Store operations interleaved with enqueues.
#[derive(Debug, Clone)]
enum Op {
    Enqueue(NewAction),
    RemoveNth(usize),
    FailNth(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => action_strategy().prop_map(Op::Enqueue),
        1 => any::<usize>().prop_map(Op::RemoveNth),
        1 => any::<usize>().prop_map(Op::FailNth),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn list_pending_follows_enqueue_order(actions in prop::collection::vec(action_strategy(), 0..40)) {
        let store = ActionStore::in_memory();
        let ids: Vec<_> = actions
            .into_iter()
            .map(|a| store.enqueue(a).unwrap())
            .collect();

        let listed: Vec<_> = store.list_pending().iter().map(|a| a.id).collect();
        prop_assert_eq!(listed, ids);
    }

    #[test]
    fn order_and_attempts_survive_replay(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let backend = InMemoryBackend::new();
        let store = ActionStore::open(Journal::new(Box::new(backend.clone()))).unwrap();
        let mut expected = Vec::new();
        let mut last_attempts = std::collections::HashMap::new();

        for op in ops {
            match op {
                Op::Enqueue(action) => expected.push(store.enqueue(action).unwrap()),
                Op::RemoveNth(n) if !expected.is_empty() => {
                    let id = expected.remove(n % expected.len());
                    store.remove(&id).unwrap();
                }
                Op::FailNth(n) if !expected.is_empty() => {
                    let id = expected[n % expected.len()];
                    store.mark_status(&id, ActionStatus::InFlight).unwrap();
                    let action = store.record_failure(&id, "timeout", Some(Utc::now())).unwrap();
                    let previous = last_attempts.insert(id, action.attempt_count).unwrap_or(0);
                    prop_assert!(action.attempt_count > previous);
                }
                _ => {}
            }
        }

        let reopened = ActionStore::open(Journal::new(Box::new(backend))).unwrap();
        let listed: Vec<_> = reopened.list_pending().iter().map(|a| a.id).collect();
        prop_assert_eq!(listed, expected);
        for action in reopened.list_pending() {
            let recorded = last_attempts.get(&action.id).copied().unwrap_or(0);
            prop_assert_eq!(action.attempt_count, recorded);
        }
    }
}
