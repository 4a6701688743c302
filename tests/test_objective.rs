use nalgebra::{Point3, Vector3};
use shellfit::core::domain::{Lattice, Structure, TrainingPool};
use shellfit::core::error::FitError;
use shellfit::engine::evaluator::{MechanicsEngine, Prediction};
use shellfit::engine::objective::{ChiSquaredObjective, ErrorTerms, DEFAULT_STRESS_WEIGHT};
use shellfit::solvers::Objective;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::common::{lno_pool, lno_potential, stub, FixedEngine, StubEngine};

mod common;

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn objective(
    engine: Arc<dyn MechanicsEngine>,
    pool: &TrainingPool,
    subset: &[usize],
    supercell: Option<[usize; 3]>,
) -> ChiSquaredObjective {
    ChiSquaredObjective::new(
        engine,
        Arc::new(lno_potential()),
        &labels(&["q_scaling"]),
        pool,
        subset,
        supercell,
        DEFAULT_STRESS_WEIGHT,
    )
    .unwrap()
}

#[test]
fn test_reference_error_value() {
    let v = |x: f64, y: f64, z: f64| Vector3::new(x, y, z);
    let structure = Structure::new(
        Lattice::orthorhombic(5.0, 5.0, 5.0).unwrap(),
        labels(&["Li", "Ni", "O"]),
        vec![Point3::new(0.0, 0.0, 0.0), Point3::new(2.5, 2.5, 0.0), Point3::new(2.5, 0.0, 2.5)],
        vec![v(0.2, 0.2, 0.3), v(0.3, 0.3, 0.4), v(0.3, 0.4, 0.5)],
        [0.1, 0.3, 0.4, 0.2, 0.3, 0.2],
    )
    .unwrap();
    let pool = TrainingPool::new(vec![structure]);

    let engine = Arc::new(FixedEngine {
        prediction: Prediction {
            forces: vec![v(0.1, 0.2, 0.3), v(0.2, 0.3, 0.4), v(0.3, 0.4, 0.5)],
            stress: [0.1, 0.2, 0.3, 0.2, 0.3, 0.4],
        },
    });
    let obj = objective(engine, &pool, &[0], None);

    let terms = obj.error_terms(&[1.0]).unwrap();
    assert!((terms.force - 0.02 / 9.0).abs() < 1e-12);
    assert!((terms.stress - 0.01).abs() < 1e-12);
    assert!((obj.evaluate(&[1.0]).unwrap() - 0.00223222222).abs() < 1e-9);
}

#[test]
fn test_error_terms_accumulate_per_structure_means() {
    let mut terms = ErrorTerms::default();
    let zero = [0.0; 6];
    terms.accumulate(&[Vector3::new(1.0, 0.0, 0.0)], &[Vector3::zeros()], &zero, &[6.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    terms.accumulate(&[Vector3::new(3.0, 0.0, 0.0)], &[Vector3::zeros()], &zero, &zero);

    assert!((terms.force - (1.0 / 3.0 + 9.0 / 3.0)).abs() < 1e-12);
    assert!((terms.stress - 6.0).abs() < 1e-12);
    assert!((terms.total(0.5) - (terms.force + 3.0)).abs() < 1e-12);
}

#[test]
fn test_evaluate_is_deterministic_and_decomposes() {
    let pool = lno_pool(6);
    let obj = objective(stub(), &pool, &[1, 3, 4], None);

    for q in [0.3, 0.55, 0.8, 1.0] {
        let e1 = obj.evaluate(&[q]).unwrap();
        let e2 = obj.evaluate(&[q]).unwrap();
        assert_eq!(e1, e2);

        let terms = obj.error_terms(&[q]).unwrap();
        assert!((e1 - (terms.force + 0.001 * terms.stress)).abs() < 1e-15);
    }

    // The stub reproduces the reference exactly at full charge
    assert!(obj.evaluate(&[1.0]).unwrap().abs() < 1e-15);
    assert!(obj.evaluate(&[0.5]).unwrap() > 0.0);
    assert_eq!(obj.evaluations(), 14);
}

#[test]
fn test_detailed_evaluation_matches_scalar() {
    let pool = lno_pool(6);
    let obj = objective(stub(), &pool, &[0, 2, 5], None);

    let (error, comparisons) = obj.evaluate_detailed(&[0.7]).unwrap();
    assert_eq!(error, obj.evaluate(&[0.7]).unwrap());

    let indices: Vec<usize> = comparisons.iter().map(|c| c.pool_index).collect();
    assert_eq!(indices, vec![0, 2, 5]);

    let c = &comparisons[1];
    assert_eq!(c.reference_forces, pool.get(2).unwrap().reference_forces());
    assert!((c.predicted_forces[0] - c.reference_forces[0] * 0.7).norm() < 1e-12);
    assert!((c.predicted_stress[0] - 0.7 * c.reference_stress[0]).abs() < 1e-12);
}

#[test]
fn test_supercell_keeps_per_component_means() {
    let pool = lno_pool(3);
    let plain = objective(stub(), &pool, &[0, 1], None);
    let bigger = objective(stub(), &pool, &[0, 1], Some([2, 2, 1]));

    let a = plain.evaluate(&[0.6]).unwrap();
    let b = bigger.evaluate(&[0.6]).unwrap();
    assert!((a - b).abs() < 1e-12);
}

#[test]
fn test_engine_error_names_pool_structure() {
    let pool = lno_pool(6);
    let obj = objective(Arc::new(StubEngine::failing_on(1)), &pool, &[3, 5], None);

    match obj.evaluate(&[0.9]) {
        Err(FitError::Engine { structure, source }) => {
            assert_eq!(structure, 5);
            assert!(source.to_string().contains("told to fail"));
        }
        other => panic!("expected an engine error, got {:?}", other),
    }
}

#[test]
fn test_session_failures_blame_no_structure() {
    let pool = lno_pool(3);

    let refusing = StubEngine { refuse_sessions: true, ..Default::default() };
    let obj = objective(Arc::new(refusing), &pool, &[0, 2], None);
    match obj.evaluate(&[0.9]) {
        Err(FitError::Session(source)) => assert!(source.to_string().contains("refuses")),
        other => panic!("expected a session error, got {:?}", other),
    }

    let rejecting = StubEngine { reject_potential: true, ..Default::default() };
    let closed = rejecting.closed.clone();
    let obj = objective(Arc::new(rejecting), &pool, &[0, 2], None);
    match obj.evaluate(&[0.9]) {
        Err(FitError::Session(source)) => assert!(source.to_string().contains("rejects")),
        other => panic!("expected a session error, got {:?}", other),
    }
    drop(obj);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_invalid_construction() {
    let pool = lno_pool(2);
    let base = Arc::new(lno_potential());

    let out_of_range =
        ChiSquaredObjective::new(stub(), base.clone(), &labels(&["q_scaling"]), &pool, &[0, 2], None, 0.001);
    assert!(matches!(out_of_range, Err(FitError::InvalidArgument(_))));

    let empty = ChiSquaredObjective::new(stub(), base.clone(), &labels(&["q_scaling"]), &pool, &[], None, 0.001);
    assert!(matches!(empty, Err(FitError::InvalidArgument(_))));

    let bad_label = ChiSquaredObjective::new(stub(), base, &labels(&["dq_Li"]), &pool, &[0], None, 0.001);
    assert!(matches!(bad_label, Err(FitError::InvalidLabel { .. })));
}

#[test]
fn test_sessions_are_reused_and_torn_down() {
    let pool = lno_pool(4);
    let engine = StubEngine::default();
    let opened = engine.sessions.clone();
    let closed = engine.closed.clone();

    let obj = objective(Arc::new(engine), &pool, &[0, 1, 2], None);
    for i in 0..10 {
        Objective::evaluate(&obj, &[0.3 + 0.05 * i as f64]).unwrap();
    }
    // Sequential use needs only one session
    assert_eq!(obj.sessions_opened(), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    drop(obj);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
