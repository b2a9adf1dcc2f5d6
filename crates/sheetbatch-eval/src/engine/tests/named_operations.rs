//! Named operations dispatched through the engine's exclusive backend.
use super::common::config;
use crate::backend::{Column, CpuBackend};
use crate::engine::Engine;
use sheetbatch_common::{ErrorKind, TaggedValue};

fn column(values: &[f64]) -> Column {
    values.iter().map(|v| TaggedValue::number(*v)).collect()
}

#[test]
fn test_black_scholes_batch() {
    let engine = Engine::new(CpuBackend::seeded(5), config(false));
    // two instances, differing only in strike
    let args = vec![
        column(&[100.0, 100.0]),
        column(&[1.0, 1.0]),
        column(&[100.0, 120.0]),
        column(&[0.05, 0.05]),
        column(&[0.2, 0.2]),
    ];
    let out = engine.compute_named("BLACK-SCHOLES-CALL", &args, 2);
    assert_eq!(out.len(), 2);
    let at_the_money = out[0].as_number().unwrap();
    let out_of_the_money = out[1].as_number().unwrap();
    assert!((at_the_money - 10.4506).abs() < 1e-3);
    assert!(out_of_the_money < at_the_money);
    assert_eq!(engine.backend().calls(), 1);
}

#[test]
fn test_random_produces_one_value_per_instance() {
    let engine = Engine::new(CpuBackend::seeded(5), config(false));
    let out = engine.compute_named("RANDOM", &[], 4);
    assert_eq!(out.len(), 4);
    assert!(out.iter().all(|v| v.as_number().is_some_and(|x| (0.0..1.0).contains(&x))));
}

#[test]
fn test_unknown_named_operation() {
    let engine = Engine::new(CpuBackend::seeded(5), config(false));
    let out = engine.compute_named("NOT-A-THING", &[column(&[1.0, 2.0, 3.0])], 3);
    assert_eq!(out.len(), 3);
    assert!(out.iter().all(|v| v.as_error() == Some(ErrorKind::UnknownNamedOp)));
}

#[test]
fn test_missing_argument_values_are_value_errors() {
    let engine = Engine::new(CpuBackend::seeded(5), config(false));
    // the strike column is one instance short
    let args = vec![
        column(&[100.0, 100.0]),
        column(&[1.0, 1.0]),
        column(&[100.0]),
        column(&[0.05, 0.05]),
        column(&[0.2, 0.2]),
    ];
    let out = engine.compute_named("BLACK-SCHOLES-PUT", &args, 2);
    assert!(out[0].as_number().is_some());
    assert_eq!(out[1].as_error(), Some(ErrorKind::Value));
}
