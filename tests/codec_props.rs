use std::sync::OnceLock;

use proptest::prelude::*;

use hedoc::codec::Codec;
use hedoc::params::HeConfig;
use hedoc::{Context, HeError};

const BASE_PRIME: u64 = 1 << 59;

fn shared_context() -> &'static Context {
    static CTX: OnceLock<Context> = OnceLock::new();
    CTX.get_or_init(|| {
        Context::new(
            HeConfig {
                seed: Some(99),
                ..HeConfig::insecure_test(256)
            },
            2,
        )
        .unwrap()
    })
}

fn max_error(got: &[f64], want: &[f64]) -> f64 {
    got.iter()
        .zip(want)
        .map(|(g, w)| (g - w).abs())
        .fold(0.0, f64::max)
}

proptest! {
    #[test]
    fn prop_codec_roundtrip(values in prop::collection::vec(-1000.0f64..1000.0, 1..=64)) {
        let codec = Codec::new(128, 40, BASE_PRIME);
        let coeffs: Vec<f64> = codec
            .embed(&values, codec.scale())
            .unwrap()
            .into_iter()
            .map(|c| c as f64)
            .collect();
        let decoded = codec.project(&coeffs, codec.scale());

        prop_assert_eq!(decoded.len(), codec.slot_count());
        prop_assert!(max_error(&decoded, &values) < codec.precision());
        prop_assert!(decoded[values.len()..].iter().all(|v| v.abs() < codec.precision()));
    }

    #[test]
    fn prop_codec_rejects_out_of_range(excess in 1.0f64..1e6, negative in any::<bool>()) {
        let codec = Codec::new(128, 40, BASE_PRIME);
        let magnitude = codec.max_value() + excess;
        let value = if negative { -magnitude } else { magnitude };
        let err = codec.embed(&[0.0, value], codec.scale()).unwrap_err();
        prop_assert!(matches!(err, HeError::Range(_)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_plaintext_roundtrip(values in prop::collection::vec(-1000.0f64..1000.0, 1..=128)) {
        let ctx = shared_context();
        let pt = ctx.encode(&values).unwrap();
        let decoded = ctx.decode(&pt).unwrap();
        prop_assert!(max_error(&decoded, &values) < ctx.codec().precision());
    }

    #[test]
    fn prop_encrypted_add_multiply(
        a in prop::collection::vec(-100.0f64..100.0, 8),
        b in prop::collection::vec(-100.0f64..100.0, 8),
    ) {
        let ctx = shared_context();
        let ev = ctx.evaluator();
        let ca = ctx.encrypt_values(&a).unwrap();
        let cb = ctx.encrypt_values(&b).unwrap();

        let sum = ctx.decrypt(&ev.add(&ca, &cb).unwrap()).unwrap();
        let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        prop_assert!(max_error(&sum, &want) < 1e-5);

        let product = ev.multiply(&ca, &cb).unwrap();
        let product = ev.rescale(&ev.relinearize(&product).unwrap()).unwrap();
        let got = ctx.decrypt(&product).unwrap();
        let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
        prop_assert!(max_error(&got, &want) < 1e-2);
    }
}
