//! Property-based tests for the stopping policy using proptest.

use glyphtrain_core::{StopReason, StoppingDecision, StoppingPolicy};
use proptest::prelude::*;

fn errors() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..100.0, 1..400)
}

proptest! {
    #[test]
    fn best_error_never_increases(errors in errors()) {
        let mut policy = StoppingPolicy::default();
        let mut previous = f64::INFINITY;
        for error in errors {
            policy.evaluate(error, false);
            let best = policy.minimum().best_error;
            prop_assert!(best <= previous);
            prop_assert!(best <= error);
            previous = best;
        }
    }

    #[test]
    fn warmup_always_continues(errors in prop::collection::vec(0.0f64..1.0e6, 1..150)) {
        let mut policy = StoppingPolicy::default();
        for error in errors {
            prop_assert_eq!(policy.evaluate(error, false), StoppingDecision::Continue);
        }
    }

    #[test]
    fn divergence_beyond_margin_stops(
        base in 0.0f64..50.0,
        excess in 0.001f64..50.0,
        warmup in 150usize..300,
    ) {
        let mut policy = StoppingPolicy::default();
        for _ in 0..warmup {
            prop_assert_eq!(policy.evaluate(base, false), StoppingDecision::Continue);
        }
        prop_assert_eq!(
            policy.evaluate(base + 2.0 + excess, false),
            StoppingDecision::Stop(StopReason::Diverged)
        );
    }

    #[test]
    fn error_exactly_at_margin_continues(base in 0u32..50, warmup in 150usize..300) {
        // Integral bases keep `base + 2.0` exact.
        let base = f64::from(base);
        let mut policy = StoppingPolicy::default();
        for _ in 0..warmup {
            policy.evaluate(base, false);
        }
        prop_assert_eq!(policy.evaluate(base + 2.0, false), StoppingDecision::Continue);
    }

    #[test]
    fn cancellation_always_stops(errors in errors(), at in 0usize..400) {
        let mut policy = StoppingPolicy::default();
        let at = at % errors.len();
        for (i, error) in errors.iter().enumerate() {
            let decision = policy.evaluate(*error, i == at);
            if i == at {
                prop_assert_eq!(decision, StoppingDecision::Stop(StopReason::UserCancelled));
                break;
            }
            prop_assert_ne!(decision, StoppingDecision::Stop(StopReason::UserCancelled));
        }
    }
}
