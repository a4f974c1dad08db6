//! RNS-CKKS scheme layer.
//!
//! # Overview
//!
//! CKKS encrypts approximate real numbers: a slot vector `z` is encoded as a
//! polynomial `m ≈ Δ·z` (see [`crate::codec`]) and encrypted RLWE-style over
//! the ciphertext primes `q_0..q_l`. Arithmetic is approximate; every
//! multiplication doubles the scale and a rescale divides it back down by
//! the last prime, consuming one level.
//!
//! # Levels
//!
//! ```text
//! level L  ──multiply──▶ size 3, Δ²  ──relinearize──▶ size 2  ──rescale──▶ level L-1, Δ
//! ```
//!
//! At level 0 only the base prime is left and no further multiplication is
//! possible. The [`Evaluator`] rejects such operations with
//! [`HeError::DepthExceeded`](crate::error::HeError::DepthExceeded) before
//! doing any arithmetic.

mod enc;
mod eval;
mod types;

pub(crate) use enc::{centered_coeffs, decrypt_parts, encrypt_parts};
pub use eval::{Evaluator, SCALE_TOLERANCE};
pub use types::{Ciphertext, Plaintext};
