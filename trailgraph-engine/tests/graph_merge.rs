//! Merge idempotency over arbitrary event streams

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use trailgraph_core::*;
use trailgraph_engine::*;

fn event_strategy() -> impl Strategy<Value = Event> {
    (
        1u64..4,
        0usize..5,
        prop::sample::select(vec!["visit", "like", "comment_generated"]),
        0usize..3,
        prop::option::of((0usize..3, prop::sample::select(vec!["repost", "comment"]))),
        0i64..1_000_000,
    )
        .prop_map(|(user, post, action, author, interactor, secs)| {
            let (interactor_slug, interaction_type) = match interactor {
                Some((i, kind)) => (format!("fan-{}", i), kind.to_string()),
                None => (String::new(), String::new()),
            };
            EventPayload {
                post_urn: format!("urn:li:activity:{}", post),
                action: action.to_string(),
                author_slug: format!("author-{}", author),
                author_name: format!("Author {}", author),
                interactor_slug,
                interactor_name: "Fan".to_string(),
                interaction_type,
                timestamp: Utc.timestamp_opt(secs, 0).single(),
                ..Default::default()
            }
            .stamp(UserId::new(user), Utc::now())
            .unwrap()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn replaying_a_stream_changes_nothing(events in prop::collection::vec(event_strategy(), 1..20)) {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let graph = engine.graph().unwrap();

        let mut txn = graph.transaction();
        for event in &events {
            txn.merge_event(event).unwrap();
        }
        txn.commit().unwrap();
        let first = graph.stats().unwrap();

        let mut txn = graph.transaction();
        for event in &events {
            txn.merge_event(event).unwrap();
        }
        txn.commit().unwrap();

        prop_assert_eq!(graph.stats().unwrap(), first);
    }

    #[test]
    fn one_transaction_equals_many(events in prop::collection::vec(event_strategy(), 1..20)) {
        let (batched_engine, _a) = StorageEngine::temp().unwrap();
        let batched = batched_engine.graph().unwrap();
        let mut txn = batched.transaction();
        for event in &events {
            txn.merge_event(event).unwrap();
        }
        txn.commit().unwrap();

        let (single_engine, _b) = StorageEngine::temp().unwrap();
        let single = single_engine.graph().unwrap();
        for event in &events {
            single.merge_event(event).unwrap();
        }

        prop_assert_eq!(batched.stats().unwrap(), single.stats().unwrap());
    }
}

#[test]
fn buffered_records_merge_through_one_transaction() {
    let (engine, _temp) = StorageEngine::temp().unwrap();
    let graph = engine.graph().unwrap();

    let batch = ConnectionBatch {
        connections: vec![
            Connection {
                name: "Ada".to_string(),
                slug: "ada".to_string(),
                headline: "Engineer".to_string(),
                connected_at: "2024-03-01".to_string(),
            },
            Connection {
                name: "Grace".to_string(),
                slug: "grace".to_string(),
                ..Default::default()
            },
        ],
    };
    let (records, skipped) = batch.into_records(UserId::new(1));
    assert_eq!(skipped, 0);

    let mut txn = graph.transaction();
    for record in &records {
        txn.merge_record(record).unwrap();
    }
    assert_eq!(txn.merged(), 2);
    txn.commit().unwrap();

    let stats = graph.stats().unwrap();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.persons, 2);
    assert_eq!(stats.connections, 2);
}
