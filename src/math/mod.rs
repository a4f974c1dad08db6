//! Lattice arithmetic backend.
//!
//! Everything above this module treats it as the HE backend: primes, the
//! negacyclic NTT, RNS polynomials over `R_Q = Z_Q[X]/(X^n + 1)`, samplers,
//! Galois automorphisms and CRT reconstruction.
//!
//! # Example
//!
//! ```
//! use hedoc::math::{ntt_prime_chain, RnsBasis, RnsPoly};
//!
//! let primes = ntt_prime_chain(&[50, 40, 50], 64).unwrap();
//! let basis = RnsBasis::new(64, &primes);
//! let tables = basis.all_tables();
//!
//! let mut poly = RnsPoly::from_signed(&[1; 64], &tables);
//! poly.to_ntt(&tables);
//! assert!(poly.is_ntt());
//! ```

pub mod crt;
pub mod galois;
pub mod modular;
pub mod ntt;
pub mod primes;
pub mod rns;
pub mod sampler;

pub use crt::CrtComposer;
pub use modular::ModQ;
pub use ntt::NttTable;
pub use primes::{is_prime, ntt_prime, ntt_prime_chain};
pub use rns::{RnsBasis, RnsPoly};
pub use sampler::{Sampler, DEFAULT_SIGMA};
