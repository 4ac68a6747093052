// crates/trialstore-core/tests/distributions.rs
// ============================================================================
// Module: Distribution Codec Tests
// Description: Validation, codec, compatibility, and JSON form of distributions.
// Purpose: Pin the value-space rules that storage relies on for parameters.
// ============================================================================

//! Distribution codec and compatibility tests.

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
    clippy::float_cmp,
    reason = "Test-only assertions and helpers are permitted."
)]

use trialstore_core::Distribution;
use trialstore_core::DistributionError;
use trialstore_core::ParamValue;
use trialstore_core::StorageError;
use trialstore_core::distributions::check_distribution_compatibility;
use trialstore_core::distributions::distribution_to_json;
use trialstore_core::distributions::json_to_distribution;

// ============================================================================
// SECTION: Construction
// ============================================================================

#[test]
fn constructors_reject_invalid_bounds() {
    assert!(matches!(Distribution::uniform(1.0, 0.0), Err(DistributionError::Invalid(_))));
    assert!(matches!(Distribution::log_uniform(0.0, 1.0), Err(DistributionError::Invalid(_))));
    assert!(matches!(
        Distribution::discrete_uniform(0.0, 1.0, 0.0),
        Err(DistributionError::Invalid(_))
    ));
    assert!(matches!(Distribution::int_uniform(0, 10, 0), Err(DistributionError::Invalid(_))));
    assert!(matches!(Distribution::int_log_uniform(0, 10, 1), Err(DistributionError::Invalid(_))));
    assert!(matches!(Distribution::categorical(Vec::new()), Err(DistributionError::Invalid(_))));
    assert!(matches!(Distribution::uniform(f64::NAN, 1.0), Err(DistributionError::Invalid(_))));
}

#[test]
fn single_point_distributions_are_detected() {
    assert!(Distribution::uniform(2.0, 2.0).unwrap().is_single());
    assert!(!Distribution::uniform(0.0, 1.0).unwrap().is_single());
    assert!(Distribution::int_uniform(3, 4, 2).unwrap().is_single());
    assert!(Distribution::categorical(vec![ParamValue::from("only")]).unwrap().is_single());
}

#[test]
fn full_range_int_uniform_does_not_overflow() {
    let full = Distribution::int_uniform(i64::MIN, i64::MAX, 1).unwrap();
    assert!(!full.is_single());
    assert!(full.contains(0.0));
    assert!(full.contains(-1.0));
    let coarse = Distribution::int_uniform(i64::MIN, i64::MAX, i64::MAX).unwrap();
    assert!(!coarse.is_single());
    assert!(coarse.contains(-1.0));
    assert!(!coarse.contains(0.0));
}

// ============================================================================
// SECTION: Codec
// ============================================================================

#[test]
fn categorical_values_are_stored_as_choice_index() {
    let distribution = Distribution::categorical(vec![
        ParamValue::from("adam"),
        ParamValue::from("sgd"),
        ParamValue::None,
    ])
    .unwrap();
    assert_eq!(distribution.to_internal_repr(&ParamValue::from("sgd")).unwrap(), 1.0);
    assert_eq!(distribution.to_internal_repr(&ParamValue::None).unwrap(), 2.0);
    assert_eq!(distribution.to_external_repr(0.0).unwrap(), ParamValue::from("adam"));
    assert!(matches!(
        distribution.to_internal_repr(&ParamValue::from("rmsprop")),
        Err(DistributionError::OutOfDomain(_))
    ));
    assert!(matches!(distribution.to_external_repr(3.0), Err(DistributionError::OutOfDomain(_))));
    assert!(matches!(distribution.to_external_repr(0.5), Err(DistributionError::OutOfDomain(_))));
}

#[test]
fn integer_distributions_restore_integers() {
    let distribution = Distribution::int_uniform(0, 10, 2).unwrap();
    assert_eq!(distribution.to_internal_repr(&ParamValue::Int(4)).unwrap(), 4.0);
    assert_eq!(distribution.to_external_repr(4.0).unwrap(), ParamValue::Int(4));
    assert!(distribution.contains(4.0));
    assert!(!distribution.contains(5.0));
    assert!(!distribution.contains(12.0));
    assert!(matches!(
        distribution.to_internal_repr(&ParamValue::Float(1.5)),
        Err(DistributionError::OutOfDomain(_))
    ));
}

#[test]
fn float_distributions_accept_integers_and_floats() {
    let distribution = Distribution::uniform(0.0, 1.0).unwrap();
    assert_eq!(distribution.to_internal_repr(&ParamValue::Float(0.5)).unwrap(), 0.5);
    assert_eq!(distribution.to_internal_repr(&ParamValue::Int(0)).unwrap(), 0.0);
    assert!(distribution.contains(0.0));
    assert!(!distribution.contains(1.0));
    assert!(matches!(
        distribution.to_internal_repr(&ParamValue::from("x")),
        Err(DistributionError::OutOfDomain(_))
    ));
}

// ============================================================================
// SECTION: Compatibility
// ============================================================================

#[test]
fn different_kinds_are_incompatible() {
    let uniform = Distribution::uniform(0.0, 1.0).unwrap();
    let categorical = Distribution::categorical(vec![ParamValue::Int(1)]).unwrap();
    let err = check_distribution_compatibility(&categorical, &uniform).unwrap_err();
    assert!(matches!(err, DistributionError::Incompatible(_)));
    assert!(matches!(StorageError::from(err), StorageError::IncompatibleDistribution(_)));
}

#[test]
fn same_kind_with_new_bounds_is_compatible() {
    let old = Distribution::uniform(0.0, 1.0).unwrap();
    let new = Distribution::uniform(-5.0, 5.0).unwrap();
    assert!(check_distribution_compatibility(&old, &new).is_ok());
}

#[test]
fn categorical_choices_must_match() {
    let old = Distribution::categorical(vec![ParamValue::from("a"), ParamValue::from("b")]).unwrap();
    let same = old.clone();
    let reordered =
        Distribution::categorical(vec![ParamValue::from("b"), ParamValue::from("a")]).unwrap();
    assert!(check_distribution_compatibility(&old, &same).is_ok());
    assert!(matches!(
        check_distribution_compatibility(&old, &reordered),
        Err(DistributionError::Incompatible(_))
    ));
}

// ============================================================================
// SECTION: JSON Form
// ============================================================================

#[test]
fn json_form_uses_name_and_attributes() {
    let distribution = Distribution::uniform(0.0, 1.0).unwrap();
    let json = distribution_to_json(&distribution).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["name"], "UniformDistribution");
    assert_eq!(value["attributes"]["high"], 1.0);
    assert_eq!(json_to_distribution(&json).unwrap(), distribution);
}

#[test]
fn json_decoding_validates_attributes() {
    let json = r#"{"name":"IntUniformDistribution","attributes":{"low":5,"high":1,"step":1}}"#;
    assert!(matches!(json_to_distribution(json), Err(DistributionError::Invalid(_))));
    assert!(matches!(json_to_distribution("{\"name\":\"Nope\"}"), Err(DistributionError::Json(_))));
}

#[test]
fn categorical_json_keeps_mixed_choice_types() {
    let json = r#"{"name":"CategoricalDistribution","attributes":{"choices":[null,true,3,2.5,"x"]}}"#;
    let distribution = json_to_distribution(json).unwrap();
    let Distribution::Categorical {
        choices,
    } = distribution
    else {
        panic!("expected categorical distribution");
    };
    assert_eq!(
        choices,
        vec![
            ParamValue::None,
            ParamValue::Bool(true),
            ParamValue::Int(3),
            ParamValue::Float(2.5),
            ParamValue::from("x"),
        ]
    );
}
