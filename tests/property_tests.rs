//! Property-based tests using proptest.
//!
//! These drive the data engine directly and check invariants that should
//! hold for any sequence of operations.

use bytes::Bytes;
use proptest::prelude::*;
use rivulet::types::{RangeBound, StreamIdSpec};
use rivulet::{Database, StreamId};

const NOW: i64 = 1_000_000;

/// Generate arbitrary list elements
fn arb_element() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..32).prop_map(Bytes::from)
}

#[derive(Debug, Clone)]
enum ListOp {
    PushLeft(Vec<Bytes>),
    PushRight(Vec<Bytes>),
    Pop(usize),
}

fn arb_list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        prop::collection::vec(arb_element(), 1..5).prop_map(ListOp::PushLeft),
        prop::collection::vec(arb_element(), 1..5).prop_map(ListOp::PushRight),
        (1usize..6).prop_map(ListOp::Pop),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The engine's list behaves like a deque fed the same operations.
    #[test]
    fn prop_list_matches_model(ops in prop::collection::vec(arb_list_op(), 0..40)) {
        let mut db = Database::new();
        let mut model = std::collections::VecDeque::new();
        let key = Bytes::from_static(b"l");

        for op in ops {
            match op {
                ListOp::PushLeft(items) => {
                    for item in &items {
                        model.push_front(item.clone());
                    }
                    let len = db.list_push_left(key.clone(), items, NOW).unwrap();
                    prop_assert_eq!(len, model.len());
                }
                ListOp::PushRight(items) => {
                    model.extend(items.iter().cloned());
                    let len = db.list_push_right(key.clone(), items, NOW).unwrap();
                    prop_assert_eq!(len, model.len());
                }
                ListOp::Pop(n) => {
                    let expected: Vec<Bytes> = model.drain(..n.min(model.len())).collect();
                    let popped = db.list_pop(&key, n, NOW).unwrap_or_default();
                    prop_assert_eq!(popped, expected);
                }
            }
            prop_assert_eq!(db.list_len(&key, NOW).unwrap(), model.len());
        }

        let all = db.list_range(&key, 0, -1, NOW).unwrap();
        prop_assert_eq!(all, model.into_iter().collect::<Vec<_>>());
    }

    /// Stream ids handed out by XADD are strictly increasing, whatever mix
    /// of explicit, partial and automatic ids is used.
    #[test]
    fn prop_stream_ids_strictly_increase(
        specs in prop::collection::vec((0u64..5, 0u64..5, 0u8..3), 1..40),
        clock in prop::collection::vec(0i64..5, 1..40),
    ) {
        let mut db = Database::new();
        let key = Bytes::from_static(b"s");
        let mut last = StreamId::MIN;

        for (i, (ms, seq, kind)) in specs.into_iter().enumerate() {
            let spec = match kind {
                0 => StreamIdSpec::Explicit(StreamId::new(ms, seq)),
                1 => StreamIdSpec::AutoSeq(ms),
                _ => StreamIdSpec::Auto,
            };
            let now = clock[i % clock.len()];
            let fields = vec![(Bytes::from_static(b"f"), Bytes::from_static(b"v"))];
            if let Ok(id) = db.stream_append(key.clone(), spec, fields, now) {
                prop_assert!(id > last, "{} not above {}", id, last);
                last = id;
            }
            prop_assert_eq!(db.stream_last_id(&key, now).unwrap(), last);
        }

        let entries = db
            .stream_range(&key, RangeBound::Start.parse("-").unwrap(), StreamId::MAX, None, NOW)
            .unwrap();
        prop_assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
    }

    /// INCR on a numeric string adds exactly one.
    #[test]
    fn prop_incr_adds_one(initial in -1_000_000i64..1_000_000i64) {
        let mut db = Database::new();
        let key = Bytes::from_static(b"n");
        db.set(key.clone(), Bytes::from(initial.to_string()), None, NOW);
        prop_assert_eq!(db.increment_if_numeric(&key, NOW).unwrap(), Some(initial + 1));
    }
}
