//! Randomness for key generation and encryption.
//!
//! One [`Sampler`] wraps a ChaCha20 stream and draws the three distributions
//! the scheme needs: discrete Gaussian errors, ternary secrets and uniform
//! residues.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::ntt::NttTable;
use super::rns::RnsPoly;

/// Default Gaussian standard deviation
pub const DEFAULT_SIGMA: f64 = 3.2;

/// Discrete Gaussian / ternary / uniform sampler.
pub struct Sampler {
    sigma: f64,
    tailcut: i64,
    rng: ChaCha20Rng,
}

impl Sampler {
    /// Sampler seeded from OS entropy.
    pub fn from_entropy(sigma: f64) -> Self {
        Self::with_rng(sigma, ChaCha20Rng::from_entropy())
    }

    /// Deterministic sampler for reproducible key generation.
    pub fn with_seed(sigma: f64, seed: u64) -> Self {
        Self::with_rng(sigma, ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(sigma: f64, rng: ChaCha20Rng) -> Self {
        Self {
            sigma,
            tailcut: (sigma * 6.0).ceil() as i64,
            rng,
        }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// One sample from D_σ, rejection-sampled within 6σ.
    pub fn gaussian(&mut self) -> i64 {
        let two_sigma_sq = 2.0 * self.sigma * self.sigma;
        loop {
            let x = self.rng.gen_range(-self.tailcut..=self.tailcut);
            let accept = (-(x as f64).powi(2) / two_sigma_sq).exp();
            if self.rng.gen::<f64>() < accept {
                return x;
            }
        }
    }

    pub fn gaussian_vec(&mut self, len: usize) -> Vec<i64> {
        (0..len).map(|_| self.gaussian()).collect()
    }

    /// Uniform ternary coefficients in {-1, 0, 1}.
    pub fn ternary_vec(&mut self, len: usize) -> Vec<i64> {
        (0..len).map(|_| self.rng.gen_range(-1i64..=1)).collect()
    }

    /// Uniform polynomial over the tables' primes, produced directly in the
    /// evaluation domain.
    pub fn uniform_ntt(&mut self, degree: usize, tables: &[&NttTable]) -> RnsPoly {
        let limbs = tables
            .iter()
            .map(|t| {
                let q = t.modulus();
                (0..degree).map(|_| self.rng.gen_range(0..q)).collect()
            })
            .collect();
        RnsPoly::from_limbs(limbs, true)
    }

    /// Gaussian error polynomial in the evaluation domain.
    pub fn error_ntt(&mut self, degree: usize, tables: &[&NttTable]) -> RnsPoly {
        let coeffs = self.gaussian_vec(degree);
        let mut poly = RnsPoly::from_signed(&coeffs, tables);
        poly.to_ntt(tables);
        poly
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("sigma", &self.sigma)
            .field("tailcut", &self.tailcut)
            .finish()
    }
}
