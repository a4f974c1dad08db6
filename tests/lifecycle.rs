//! Context lifecycle tests: parameter validation, teardown isolation and
//! re-initialization.

use std::collections::BTreeMap;
use std::thread;

use hedoc::params::{HeConfig, SecurityLevel};
use hedoc::pipeline::PipelineConfig;
use hedoc::service::{ComputeOp, HeService};
use hedoc::{ErrorClass, HeError};

fn test_config(seed: u64) -> HeConfig {
    HeConfig {
        seed: Some(seed),
        ..HeConfig::insecure_test(256)
    }
}

#[test]
fn test_teardown_makes_handles_stale() {
    let service = HeService::new(PipelineConfig::default()).unwrap();
    service.initialize(test_config(1)).unwrap();

    let a = service.encrypt(&[1.0, 2.0]).unwrap();
    let b = service.encrypt(&[3.0, 4.0]).unwrap();
    service.teardown();
    assert!(!service.is_initialized());
    assert!(service.store().is_empty());

    let err = service.decrypt(&a).unwrap_err();
    assert!(matches!(err, HeError::StaleContext(_)), "{:?}", err);
    assert_eq!(err.class(), ErrorClass::Conflict);

    for op in [ComputeOp::Add, ComputeOp::Multiply] {
        let err = service.compute(&op, &[a, b]).unwrap_err();
        assert!(matches!(err, HeError::StaleContext(_)), "{:?}: {:?}", op, err);
    }
    let err = service
        .compute(&ComputeOp::SlotTotal { width: 2 }, &[a])
        .unwrap_err();
    assert!(matches!(err, HeError::StaleContext(_)));
    assert!(matches!(service.stats(&a), Err(HeError::StaleContext(_))));
    assert!(matches!(service.release(&b), Err(HeError::StaleContext(_))));

    assert!(matches!(
        service.encrypt_value(1.0),
        Err(HeError::NotInitialized)
    ));
}

#[test]
fn test_reinitialize_isolates_generations() {
    let service = HeService::new(PipelineConfig::default()).unwrap();
    service.initialize(test_config(2)).unwrap();
    let old = service.encrypt_value(5.0).unwrap();

    let summary = service.reinitialize(test_config(3)).unwrap();
    assert_eq!(service.context_summary().unwrap().id, summary.id);
    assert_ne!(old.context(), summary.id);

    let err = service.decrypt(&old).unwrap_err();
    assert!(matches!(err, HeError::StaleContext(_)));

    let new = service.encrypt_value(5.0).unwrap();
    let err = service.compute(&ComputeOp::Add, &[old, new]).unwrap_err();
    assert!(matches!(err, HeError::StaleContext(_)));
    assert!((service.decrypt_value(&new).unwrap() - 5.0).abs() < 1e-6);
}

#[test]
fn test_failed_reinitialize_keeps_context() {
    let service = HeService::new(PipelineConfig::default()).unwrap();
    let before = service.initialize(test_config(4)).unwrap();
    let handle = service.encrypt_value(2.0).unwrap();

    let bad = HeConfig {
        poly_degree: 1000,
        ..test_config(5)
    };
    let err = service.reinitialize(bad).unwrap_err();
    assert!(matches!(err, HeError::Parameter(_)));

    assert_eq!(service.context_summary().unwrap().id, before.id);
    assert!((service.decrypt_value(&handle).unwrap() - 2.0).abs() < 1e-6);
    assert!(service.submit_document(b"still open".to_vec()).is_ok());
}

#[test]
fn test_insecure_parameters_rejected() {
    let service = HeService::new(PipelineConfig::default()).unwrap();

    // n = 1024 admits 27 bits of modulus at 128-bit security.
    let config = HeConfig {
        poly_degree: 1024,
        security_level: SecurityLevel::Bits128,
        ..test_config(6)
    };
    let err = service.initialize(config).unwrap_err();
    assert!(matches!(err, HeError::Parameter(ref msg) if msg.contains("exceeds")), "{:?}", err);
    assert_eq!(err.status_code(), 400);
    assert!(!service.is_initialized());

    // Degrees outside the security table cannot claim a level.
    let config = HeConfig {
        security_level: SecurityLevel::Bits128,
        ..test_config(6)
    };
    assert!(matches!(service.initialize(config), Err(HeError::Parameter(_))));
}

#[test]
fn test_chain_too_shallow_for_pipeline() {
    let mut weights = BTreeMap::new();
    weights.insert("urgent".to_string(), 2.0);
    let pipeline = PipelineConfig {
        vocabulary: vec!["urgent".into()],
        term_weights: weights,
        ..PipelineConfig::default()
    };
    let service = HeService::new(pipeline).unwrap();

    // Base and special prime only: depth 0, the weighted score needs 1.
    let shallow = HeConfig {
        coeff_modulus_bits: vec![60, 60],
        ..test_config(7)
    };
    let err = service.initialize(shallow).unwrap_err();
    assert!(matches!(err, HeError::Parameter(ref msg) if msg.contains("depth")), "{:?}", err);

    assert!(service.initialize(test_config(7)).is_ok());
}

#[test]
fn test_malformed_configs() {
    let cases = [
        HeConfig {
            coeff_modulus_bits: vec![60],
            ..test_config(8)
        },
        HeConfig {
            coeff_modulus_bits: vec![60, 40, 40, 30],
            ..test_config(8)
        },
        HeConfig {
            scale_bits: 59,
            ..test_config(8)
        },
        HeConfig {
            sigma: 0.0,
            ..test_config(8)
        },
        HeConfig {
            coeff_modulus_bits: vec![60, 70, 60],
            ..test_config(8)
        },
    ];
    for config in cases {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HeError::Parameter(_)), "{:?}", config);
    }
}

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("he.json");

    let config = test_config(9);
    config.save(&path).unwrap();
    let loaded = HeConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    let service = HeService::new(PipelineConfig::default()).unwrap();
    let summary = service.initialize(loaded).unwrap();
    assert_eq!(summary.poly_degree, 256);
    assert_eq!(summary.coeff_modulus_bits, vec![60, 40, 40, 60]);

    // Missing fields fall back to the defaults.
    std::fs::write(&path, r#"{"poly_degree": 4096, "security_level": "bits128"}"#).unwrap();
    let partial = HeConfig::load(&path).unwrap();
    assert_eq!(partial.poly_degree, 4096);
    assert_eq!(partial.coeff_modulus_bits, HeConfig::default().coeff_modulus_bits);

    let err = HeConfig::load(dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, HeError::Io(_)));
}

#[test]
fn test_independent_services() {
    let a = HeService::new(PipelineConfig::default()).unwrap();
    let b = HeService::new(PipelineConfig::default()).unwrap();
    a.initialize(test_config(10)).unwrap();
    b.initialize(test_config(10)).unwrap();

    let ha = a.encrypt_value(1.0).unwrap();
    a.teardown();
    assert!(b.encrypt_value(1.0).is_ok());
    assert!(matches!(a.decrypt(&ha), Err(HeError::StaleContext(_))));
    assert!(matches!(b.decrypt(&ha), Err(HeError::StaleContext(_))));
}

#[test]
fn test_teardown_racing_encrypt_leaves_store_empty() {
    let service = HeService::new(PipelineConfig::default()).unwrap();

    for round in 0..5 {
        service.initialize(test_config(20 + round)).unwrap();
        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    while service.encrypt(&[1.0, 2.0]).is_ok() {}
                });
            }
            thread::sleep(std::time::Duration::from_millis(20));
            service.teardown();
        });
        assert!(service.store().is_empty(), "round {}", round);
    }
}
