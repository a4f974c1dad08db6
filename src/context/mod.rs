//! HE context: parameters, derived tables and key material.
//!
//! A [`Context`] is built once from an [`HeConfig`] and is immutable
//! afterwards. Everything encrypted under it carries its [`ContextId`];
//! mixing data across contexts is always an error.
//!
//! # Example
//!
//! ```
//! use hedoc::context::Context;
//! use hedoc::params::HeConfig;
//!
//! let config = HeConfig { seed: Some(7), ..HeConfig::insecure_test(256) };
//! let ctx = Context::new(config, 1).unwrap();
//!
//! let ct = ctx.encrypt_values(&[1.0, 2.0, 3.0]).unwrap();
//! let values = ctx.decrypt(&ct).unwrap();
//! assert!((values[2] - 3.0).abs() < ctx.codec().precision());
//! ```

mod manager;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ckks::{centered_coeffs, decrypt_parts, encrypt_parts, Ciphertext, Evaluator, Plaintext};
use crate::codec::Codec;
use crate::error::{param_err, HeError, Result};
use crate::keys::{generate_key_set, KeySet};
use crate::math::{ntt_prime_chain, CrtComposer, RnsBasis, RnsPoly, Sampler};
use crate::params::HeConfig;

pub use manager::ContextManager;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one context generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub(crate) u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable CKKS context.
pub struct Context {
    id: ContextId,
    config: HeConfig,
    basis: RnsBasis,
    codec: Codec,
    /// CRT constants for `q_0..q_l`, indexed by level
    crt: Vec<CrtComposer>,
    keys: KeySet,
}

impl Context {
    /// Validate `config`, derive the prime chain and generate keys.
    ///
    /// `required_depth` is the number of rescales the caller's operation
    /// graph needs; a shallower chain is a parameter error.
    pub fn new(config: HeConfig, required_depth: usize) -> Result<Self> {
        config.validate()?;
        config.validate_depth(required_depth)?;

        let n = config.poly_degree;
        let primes = ntt_prime_chain(&config.coeff_modulus_bits, n).map_err(|bits| {
            param_err!("not enough {}-bit NTT-friendly primes for n = {}", bits, n)
        })?;
        let basis = RnsBasis::new(n, &primes);

        let crt = (0..=basis.max_level())
            .map(|level| {
                CrtComposer::new(&primes[..=level])
                    .ok_or_else(|| HeError::Internal("prime chain is not pairwise coprime".into()))
            })
            .collect::<Result<Vec<_>>>()?;

        let codec = Codec::new(n, config.scale_bits, primes[0]);

        let mut sampler = match config.seed {
            Some(seed) => Sampler::with_seed(config.sigma, seed),
            None => Sampler::from_entropy(config.sigma),
        };
        let keys = generate_key_set(&basis, &mut sampler);

        let id = ContextId::next();
        info!(
            context = %id,
            poly_degree = n,
            depth = basis.max_level(),
            scale_bits = config.scale_bits,
            security = ?config.security_level,
            galois_keys = keys.galois.steps().len(),
            "built HE context"
        );

        Ok(Self {
            id,
            config,
            basis,
            codec,
            crt,
            keys,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &HeConfig {
        &self.config
    }

    pub fn basis(&self) -> &RnsBasis {
        &self.basis
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Level of a fresh ciphertext.
    pub fn max_level(&self) -> usize {
        self.basis.max_level()
    }

    pub fn slot_count(&self) -> usize {
        self.codec.slot_count()
    }

    /// Evaluator over this context's keys.
    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.basis, &self.keys, &self.codec, self.id)
    }

    /// Fail with `ContextMismatch` unless `id` is this context.
    pub fn check_owned(&self, id: ContextId) -> Result<()> {
        if id != self.id {
            return Err(HeError::ContextMismatch(format!(
                "data from context {} used with context {}",
                id, self.id
            )));
        }
        Ok(())
    }

    /// Noise budget of a ciphertext at `level` and `scale`.
    pub fn capacity_bits(&self, level: usize, scale: f64) -> f64 {
        self.evaluator().capacity_bits(level, scale)
    }

    /// Encode at the top level and the default scale.
    pub fn encode(&self, values: &[f64]) -> Result<Plaintext> {
        self.encode_at(values, self.max_level(), self.codec.scale())
    }

    /// Encode at an explicit level and scale.
    pub fn encode_at(&self, values: &[f64], level: usize, scale: f64) -> Result<Plaintext> {
        if level > self.max_level() {
            return Err(HeError::InvalidArgument(format!(
                "level {} above the top level {}",
                level,
                self.max_level()
            )));
        }
        let coeffs = self.codec.embed(values, scale)?;
        let tables = self.basis.level_tables(level);
        let mut poly = RnsPoly::from_i128(&coeffs, &tables);
        poly.to_ntt(&tables);
        Ok(Plaintext {
            poly,
            level,
            scale,
            context_id: self.id,
        })
    }

    /// All slot values of a plaintext.
    pub fn decode(&self, pt: &Plaintext) -> Result<Vec<f64>> {
        self.check_owned(pt.context_id)?;
        let mut poly = pt.poly.clone();
        poly.from_ntt(&self.basis.level_tables(pt.level));
        let coeffs = centered_coeffs(&poly, &self.crt[pt.level]);
        Ok(self.codec.project(&coeffs, pt.scale))
    }

    /// Public-key encryption with fresh OS randomness.
    pub fn encrypt(&self, pt: &Plaintext) -> Result<Ciphertext> {
        self.check_owned(pt.context_id)?;
        let mut sampler = Sampler::from_entropy(self.config.sigma);
        let parts = encrypt_parts(pt, &self.keys.public, &self.basis, &mut sampler);
        Ok(self.evaluator().fresh(parts, pt.level, pt.scale))
    }

    /// Encode then encrypt.
    pub fn encrypt_values(&self, values: &[f64]) -> Result<Ciphertext> {
        self.encrypt(&self.encode(values)?)
    }

    /// Decrypt and decode every slot.
    pub fn decrypt(&self, ct: &Ciphertext) -> Result<Vec<f64>> {
        self.check_owned(ct.context_id)?;
        let poly = decrypt_parts(&ct.parts, ct.level, &self.keys.secret, &self.basis);
        let coeffs = centered_coeffs(&poly, &self.crt[ct.level]);
        Ok(self.codec.project(&coeffs, ct.scale))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("poly_degree", &self.config.poly_degree)
            .field("primes", &self.basis.primes())
            .field("keys", &self.keys)
            .finish()
    }
}
