use shellfit::core::codec::{self, Bounds};
use shellfit::core::domain::{subset_identifier, TrainingPool};
use shellfit::core::error::FitError;
use shellfit::core::labels::ParamLabel;
use shellfit::core::potential::{SpeciesPair, SpeciesValue};
use shellfit::core::random::Seed;
use shellfit::core::sampling;
use std::collections::HashSet;

use crate::common::{lno_potential, lno_structure};

mod common;

fn strings(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

// --- Sampling ---

#[test]
fn test_sampler_returns_distinct_sorted_subsets() {
    let subsets = sampling::sample(20, 10, 4, &mut Seed::Fixed(11)).unwrap();
    assert_eq!(subsets.len(), 20);

    let mut seen = HashSet::new();
    for s in &subsets {
        assert_eq!(s.len(), 4);
        assert!(s.windows(2).all(|w| w[0] < w[1]), "not strictly ascending: {:?}", s);
        assert!(s.iter().all(|&i| i < 10));
        assert!(seen.insert(s.clone()), "duplicate subset {:?}", s);
    }
}

#[test]
fn test_sampler_is_reproducible() {
    let a = sampling::sample(5, 30, 3, &mut Seed::Fixed(42)).unwrap();
    let b = sampling::sample(5, 30, 3, &mut Seed::Fixed(42)).unwrap();
    assert_eq!(a, b);

    // A held stream moves on between calls
    let mut stream = Seed::stream(42);
    let first = sampling::sample(5, 30, 3, &mut stream).unwrap();
    let second = sampling::sample(5, 30, 3, &mut stream).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_sampler_whole_pool_gives_single_subset() {
    let subsets = sampling::sample(7, 4, 4, &mut Seed::Fixed(1)).unwrap();
    assert_eq!(subsets, vec![vec![0, 1, 2, 3]]);
}

#[test]
fn test_sampler_rejects_bad_requests() {
    let cases = [(0, 5, 2), (1, 0, 1), (1, 5, 0), (1, 3, 4), (11, 5, 2)];
    for (n, pool, k) in cases {
        let res = sampling::sample(n, pool, k, &mut Seed::Fixed(0));
        assert!(
            matches!(res, Err(FitError::InvalidArgument(_))),
            "sample({}, {}, {}) should fail",
            n,
            pool,
            k
        );
    }
    // C(5, 2) = 10 subsets exist, so asking for all of them works
    assert_eq!(sampling::sample(10, 5, 2, &mut Seed::Fixed(0)).unwrap().len(), 10);
}

#[test]
fn test_validation_sets_avoid_fitted_structures() {
    let fitted = [1, 4, 7];
    let sets = sampling::validation_sets(6, 10, 3, &fitted, &mut Seed::Fixed(5)).unwrap();
    assert_eq!(sets.len(), 6);

    let mut seen = HashSet::new();
    for s in &sets {
        assert_eq!(s.len(), 3);
        assert!(s.windows(2).all(|w| w[0] < w[1]), "not strictly ascending: {:?}", s);
        assert!(s.iter().all(|i| *i < 10 && !fitted.contains(i)), "{:?}", s);
        assert!(seen.insert(s.clone()), "duplicate set {:?}", s);
    }

    let again = sampling::validation_sets(6, 10, 3, &fitted, &mut Seed::Fixed(5)).unwrap();
    assert_eq!(sets, again);

    // Everything left over forms the only possible set
    let rest = sampling::validation_sets(3, 5, 2, &[0, 2, 3], &mut Seed::Fixed(0)).unwrap();
    assert_eq!(rest, vec![vec![1, 4]]);
}

#[test]
fn test_validation_sets_reject_bad_requests() {
    let bad = [
        sampling::validation_sets(1, 4, 1, &[4], &mut Seed::Fixed(0)),
        sampling::validation_sets(1, 3, 1, &[0, 1, 2], &mut Seed::Fixed(0)),
        sampling::validation_sets(1, 5, 3, &[0, 1, 2], &mut Seed::Fixed(0)),
        sampling::validation_sets(4, 5, 1, &[0, 1], &mut Seed::Fixed(0)),
    ];
    for res in bad {
        assert!(matches!(res, Err(FitError::InvalidArgument(_))), "{:?}", res);
    }
}

#[test]
fn test_subset_identifier() {
    assert_eq!(subset_identifier(&[0, 2, 9]), "1-3-10");
    assert_eq!(subset_identifier(&[9, 0, 2]), "1-3-10");
    assert_eq!(subset_identifier(&[4]), "5");
}

// --- Codec ---

#[test]
fn test_decode_empty_labels_is_identity() {
    let base = lno_potential();
    let spec = codec::decode(&base, &[], &[]).unwrap();
    assert_eq!(spec, base);
}

#[test]
fn test_dq_round_trip_restores_charges() {
    let base = lno_potential();
    let labels = strings(&["dq_O"]);

    let moved = codec::decode_labels(&base, &labels, &[0.5]).unwrap();
    match moved.charge("O") {
        Some(SpeciesValue::CoreShell { core, shell }) => {
            assert!((core - 1.3).abs() < 1e-12);
            assert!((shell + 3.3).abs() < 1e-12);
        }
        other => panic!("unexpected O charge {:?}", other),
    }

    let back = codec::decode_labels(&moved, &labels, &[-0.5]).unwrap();
    match (back.charge("O"), base.charge("O")) {
        (
            Some(SpeciesValue::CoreShell { core: c1, shell: s1 }),
            Some(SpeciesValue::CoreShell { core: c0, shell: s0 }),
        ) => {
            assert!((c1 - c0).abs() < 1e-12);
            assert!((s1 - s0).abs() < 1e-12);
        }
        other => panic!("unexpected charges {:?}", other),
    }
}

#[test]
fn test_q_scaling_applies_after_charge_separation() {
    let base = lno_potential();
    let labels = strings(&["q_scaling", "dq_O"]);
    let spec = codec::decode_labels(&base, &labels, &[0.5, 1.0]).unwrap();

    assert_eq!(spec.charge("Li"), Some(&SpeciesValue::Scalar(0.5)));
    assert_eq!(spec.charge("Ni"), Some(&SpeciesValue::Scalar(1.5)));
    match spec.charge("O") {
        Some(SpeciesValue::CoreShell { core, shell }) => {
            assert!((core - 0.9).abs() < 1e-12);
            assert!((shell + 1.9).abs() < 1e-12);
        }
        other => panic!("unexpected O charge {:?}", other),
    }
}

#[test]
fn test_decode_springs_and_pairs() {
    let base = lno_potential();
    let labels = strings(&["O-O spring", "O_Li_a", "Li_O_rho", "Ni_O_c"]);
    let spec = codec::decode_labels(&base, &labels, &[42.0, 700.0, 0.31, 1.5]).unwrap();

    assert_eq!(spec.spring("O").map(|s| s.k2), Some(42.0));
    let li_o = spec.pair(&SpeciesPair::new("Li", "O")).unwrap();
    assert_eq!((li_o.a, li_o.rho), (700.0, 0.31));
    assert_eq!(spec.pair(&SpeciesPair::new("O", "Ni")).unwrap().c, 1.5);

    // Untouched entries survive
    assert_eq!(spec.pair(&SpeciesPair::new("O", "O")), base.pair(&SpeciesPair::new("O", "O")));
}

#[test]
fn test_decode_length_mismatch() {
    let base = lno_potential();
    let res = codec::decode_labels(&base, &strings(&["q_scaling"]), &[0.5, 0.2]);
    assert!(matches!(res, Err(FitError::InvalidArgument(_))));
}

// --- Validation ---

#[test]
fn test_dq_on_rigid_ion_is_rejected() {
    let base = lno_potential();
    let res = codec::validate(&strings(&["dq_Ni"]), &[Bounds::new(0.1, 1.0)], &base);
    match res {
        Err(FitError::Validation(report)) => assert!(report.mentions("dq_Ni"), "{}", report),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_validation_collects_every_violation() {
    let base = lno_potential();
    let labels = strings(&["dq_Ni", "q_scaling", "Li_Li_a", "bogus", "q_scaling"]);
    let bounds = [
        Bounds::new(0.1, 1.0),
        Bounds::new(0.0, 1.5),
        Bounds::new(1.0, 2.0),
        Bounds::new(0.0, 1.0),
        Bounds::new(0.5, 1.0),
    ];
    match codec::validate(&labels, &bounds, &base) {
        Err(FitError::Validation(report)) => {
            for label in ["dq_Ni", "q_scaling", "Li_Li_a", "bogus"] {
                assert!(report.mentions(label), "missing {} in {}", label, report);
            }
            assert!(report.violations.len() >= 5);
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_validation_bound_rules() {
    let base = lno_potential();
    let check = |label: &str, low: f64, high: f64| {
        codec::validate(&strings(&[label]), &[Bounds::new(low, high)], &base).is_ok()
    };

    assert!(check("q_scaling", 0.3, 1.0));
    assert!(!check("q_scaling", 0.3, 1.2));
    assert!(check("dq_O", 0.01, 4.0));
    assert!(!check("dq_O", 0.01, 4.5)); // more than twice |q(O)| = 2
    assert!(!check("dq_O", -0.1, 1.0));
    assert!(!check("O-O spring", 0.0, 100.0));
    assert!(!check("Li_O_rho", 0.0, 0.5));
    assert!(check("Li_O_c", 0.0, 10.0));
    assert!(!check("Li_O_a", 5.0, 1.0));
    assert!(!check("Li_O_a", 1.0, f64::INFINITY));

    let res = codec::validate(&strings(&["q_scaling"]), &[], &base);
    assert!(matches!(res, Err(FitError::Validation(_))));
}

#[test]
fn test_heteronuclear_spring_is_rejected() {
    let base = lno_potential();
    let res = codec::validate(&strings(&["Li-O spring"]), &[Bounds::new(1.0, 10.0)], &base);
    assert!(matches!(res, Err(FitError::Validation(r)) if r.mentions("Li-O spring")));
}

#[test]
fn test_default_labels() {
    let base = lno_potential();
    let labels = codec::default_labels(&base, true, true, &[SpeciesPair::new("O", "Li")]);
    assert_eq!(labels, strings(&["dq_O", "q_scaling", "O-O spring", "Li_O_a", "Li_O_rho"]));

    // Every generated label parses back to something in the potential
    let parsed = ParamLabel::parse_all(&labels, &base).unwrap();
    assert_eq!(parsed.len(), labels.len());
}

#[test]
fn test_schema_check_reports_mismatched_shapes() {
    let mut spec = lno_potential();
    assert!(spec.check_schema().is_ok());

    spec.charges.insert("Li".into(), SpeciesValue::CoreShell { core: 2.0, shell: -1.0 });
    spec.springs.clear();
    match spec.check_schema() {
        Err(FitError::Validation(report)) => assert_eq!(report.violations.len(), 2, "{}", report),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

// --- Structures ---

#[test]
fn test_supercell_replicates_atoms() {
    let s = lno_structure(0);
    let sc = s.supercell([2, 1, 3]).unwrap();

    assert_eq!(sc.num_atoms(), 6 * s.num_atoms());
    assert_eq!(sc.reference_stress(), s.reference_stress());
    // Atom-major: the first six atoms are images of atom 0
    assert!(sc.species()[..6].iter().all(|x| x == "Li"));
    assert_eq!(sc.reference_forces()[5], s.reference_forces()[0]);
    assert!((sc.lattice().vector(2).z - 3.0 * s.lattice().vector(2).z).abs() < 1e-12);

    assert_eq!(s.supercell([1, 1, 1]).unwrap(), s);
    assert!(s.supercell([0, 1, 1]).is_err());
}

#[test]
fn test_training_pool_json() {
    let json = r#"{
        "structures": [{
            "lattice": [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]],
            "species": ["Li", "O"],
            "positions": [[0.0, 0.0, 0.0], [2.0, 2.0, 2.0]],
            "forces": [[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]],
            "stress": [1.0, 2.0, 3.0, 0.0, 0.0, 0.0]
        }]
    }"#;
    let pool: TrainingPool = serde_json::from_str(json).unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get(0).unwrap().distinct_species(), vec!["Li", "O"]);

    let bad = json.replace(r#""species": ["Li", "O"]"#, r#""species": ["Li"]"#);
    assert!(serde_json::from_str::<TrainingPool>(&bad).is_err());
}
