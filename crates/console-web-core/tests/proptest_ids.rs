//! Property-based tests for stable id assignment and entity stores.

use std::collections::HashMap;

use proptest::prelude::*;

use console_web_core::ids::{IdMap, SpanId, StableId};
use console_web_core::store::Store;

// =============================================================================
// Strategies
// =============================================================================

/// Span ids drawn from a small range so that repeats are common.
fn arb_spans() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..40, 0..200)
}

fn first_seen_order(spans: &[u64]) -> Vec<u64> {
    let mut seen = Vec::new();
    for span in spans {
        if !seen.contains(span) {
            seen.push(*span);
        }
    }
    seen
}

// =============================================================================
// IdMap
// =============================================================================

proptest! {
    #[test]
    fn ids_follow_first_seen_order(spans in arb_spans()) {
        let mut ids = IdMap::new();
        for span in &spans {
            ids.id_for(SpanId(*span));
        }
        for (index, span) in first_seen_order(&spans).into_iter().enumerate() {
            prop_assert_eq!(ids.get(SpanId(span)), Some(StableId(index as u64 + 1)));
        }
    }

    #[test]
    fn mapping_is_stable_across_repeats(spans in arb_spans()) {
        let mut ids = IdMap::new();
        let mut first: HashMap<u64, StableId> = HashMap::new();
        for span in spans {
            let id = ids.id_for(SpanId(span));
            let expected = *first.entry(span).or_insert(id);
            prop_assert_eq!(id, expected);
        }
        prop_assert_eq!(ids.len(), first.len());
    }

    #[test]
    fn distinct_spans_never_share_an_id(spans in arb_spans()) {
        let mut ids = IdMap::new();
        let mut owners: HashMap<StableId, u64> = HashMap::new();
        for span in spans {
            let id = ids.id_for(SpanId(span));
            let owner = *owners.entry(id).or_insert(span);
            prop_assert_eq!(owner, span);
        }
    }

    #[test]
    fn two_maps_fed_the_same_sequence_agree(spans in arb_spans()) {
        let mut a = IdMap::new();
        let mut b = IdMap::new();
        for span in spans {
            prop_assert_eq!(a.id_for(SpanId(span)), b.id_for(SpanId(span)));
        }
    }
}

// =============================================================================
// Store
// =============================================================================

proptest! {
    #[test]
    fn evicted_ids_are_never_reissued(
        before in prop::collection::vec(0u64..40, 1..60),
        after in prop::collection::vec(40u64..80, 1..60),
    ) {
        let mut store = Store::new();
        for span in &before {
            let id = store.id_for(SpanId(*span));
            store.insert(id, *span);
        }
        let max_before = store.ids().len() as u64;
        let evicted = store.retain(|_| false);
        prop_assert_eq!(evicted, first_seen_order(&before).len());
        prop_assert!(store.is_empty());

        for span in &after {
            let id = store.id_for(SpanId(*span));
            prop_assert!(id.0 > max_before);
        }
        // old spans keep their original ids
        for (index, span) in first_seen_order(&before).into_iter().enumerate() {
            prop_assert_eq!(store.id_for(SpanId(span)), StableId(index as u64 + 1));
        }
    }

    #[test]
    fn span_lookup_matches_direct_lookup(spans in arb_spans()) {
        let mut store = Store::new();
        for span in &spans {
            let id = store.id_for(SpanId(*span));
            store.insert(id, *span);
        }
        for span in spans {
            let id = store.ids().get(SpanId(span));
            prop_assert!(id.is_some());
            prop_assert_eq!(store.get_by_span_id(SpanId(span)), Some(&span));
        }
    }
}
