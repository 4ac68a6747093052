// crates/trialstore-core/tests/proptest_distributions.rs
// ============================================================================
// Module: Distribution Property Tests
// Description: Property checks for the parameter codec.
// Purpose: Ensure stored values decode to the value that was written.
// ============================================================================

//! Property-based tests for distribution encoding.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use trialstore_core::Distribution;
use trialstore_core::ParamValue;
use trialstore_core::distributions::check_distribution_compatibility;

fn choice_strategy() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        Just(ParamValue::None),
        any::<bool>().prop_map(ParamValue::Bool),
        (-1_000i64 .. 1_000).prop_map(ParamValue::Int),
        "[a-z]{1,8}".prop_map(ParamValue::Str),
    ]
}

proptest! {
    #[test]
    fn categorical_index_decodes_to_same_choice(
        choices in proptest::collection::vec(choice_strategy(), 1 .. 12),
        pick in any::<prop::sample::Index>(),
    ) {
        let distribution = Distribution::categorical(choices.clone()).unwrap();
        let chosen = &choices[pick.index(choices.len())];
        let internal = distribution.to_internal_repr(chosen).unwrap();
        prop_assert!(distribution.contains(internal));
        let external = distribution.to_external_repr(internal).unwrap();
        // Duplicate choices decode to the first equal entry.
        prop_assert_eq!(&external, chosen);
    }

    #[test]
    fn int_uniform_values_on_grid_are_contained(
        low in -500i64 .. 500,
        span in 0i64 .. 200,
        step in 1i64 .. 7,
        offset in 0i64 .. 50,
    ) {
        let high = low + span;
        let distribution = Distribution::int_uniform(low, high, step).unwrap();
        let value = low + (offset * step).min(span - span % step);
        let internal = distribution.to_internal_repr(&ParamValue::Int(value)).unwrap();
        prop_assert!(distribution.contains(internal));
        prop_assert_eq!(distribution.to_external_repr(internal).unwrap(), ParamValue::Int(value));
    }

    #[test]
    fn int_uniform_handles_full_i64_range(
        low in prop_oneof![Just(i64::MIN), Just(i64::MIN + 1), -5i64 .. 5],
        high in prop_oneof![Just(i64::MAX), Just(i64::MAX - 1), 5i64 .. 10],
        step in prop_oneof![Just(1i64), Just(i64::MAX), 1i64 .. 1_000],
        value in any::<i32>(),
    ) {
        let distribution = Distribution::int_uniform(low, high, step).unwrap();
        let span = i128::from(high) - i128::from(low);
        prop_assert_eq!(distribution.is_single(), span < i128::from(step));
        let internal = f64::from(value);
        let value = i64::from(value);
        let on_grid = low <= value
            && value <= high
            && (i128::from(value) - i128::from(low)) % i128::from(step) == 0;
        prop_assert_eq!(distribution.contains(internal), on_grid);
    }

    #[test]
    fn uniform_bounds_changes_stay_compatible(
        low_a in -10.0f64 .. 0.0,
        low_b in -10.0f64 .. 0.0,
        width_a in 0.0f64 .. 10.0,
        width_b in 0.0f64 .. 10.0,
    ) {
        let old = Distribution::uniform(low_a, low_a + width_a).unwrap();
        let new = Distribution::uniform(low_b, low_b + width_b).unwrap();
        prop_assert!(check_distribution_compatibility(&old, &new).is_ok());
    }
}
