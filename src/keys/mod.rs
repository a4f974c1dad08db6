//! Key material and hybrid key switching.
//!
//! # Overview
//!
//! A context owns one [`KeySet`]:
//! - a ternary secret key s, kept in coefficient and NTT form;
//! - a public key `(-a·s + e, a)` over the ciphertext primes;
//! - a relinearization key switching `s²` back to `s`;
//! - Galois keys switching `τ_{5^{2^k}}(s)` back to `s`, one per power-of-two
//!   rotation.
//!
//! # Key-Switching Key
//!
//! Keys live over the extended basis `q_0..q_L, P`. Digit `i` encrypts the
//! source key scaled by `P` and projected onto prime `q_i`:
//! ```text
//! K[i] = (-a_i·s + e_i + P·[i = j]·s', a_i)   (mod q_j),   (-a_i·s + e_i, a_i)   (mod P)
//! ```
//! Switching multiplies the RNS digits of the input by `K[i]` and divides the
//! accumulated result by `P`, which removes the digit noise. The same key
//! serves every level because unused rows and limbs are simply skipped.
//!
//! Nothing in this module implements `Serialize`: key material never leaves
//! the process.

mod setup;
mod switch;

use std::collections::BTreeMap;

use zeroize::Zeroize;

use crate::math::RnsPoly;

pub(crate) use setup::generate_key_set;
pub(crate) use switch::key_switch;

/// Ternary secret key.
pub(crate) struct SecretKey {
    /// Coefficients in {-1, 0, 1}
    pub(crate) coeffs: Vec<i64>,
    /// NTT form over every prime of the basis, special prime included
    pub(crate) ntt: RnsPoly,
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.coeffs.zeroize();
        self.ntt.zeroize();
    }
}

/// Public encryption key `(b, a)` with `b = -a·s + e`.
pub struct PublicKey {
    pub(crate) b: RnsPoly,
    pub(crate) a: RnsPoly,
}

/// One `(b_i, a_i)` pair per ciphertext prime.
pub struct KeySwitchKey {
    pub(crate) digits: Vec<(RnsPoly, RnsPoly)>,
}

impl KeySwitchKey {
    pub fn digit_count(&self) -> usize {
        self.digits.len()
    }
}

/// Rotation keys indexed by their power-of-two step.
pub struct GaloisKeys {
    pub(crate) keys: BTreeMap<usize, (usize, KeySwitchKey)>,
}

impl GaloisKeys {
    /// Galois element and key for a left rotation of `step` slots.
    pub fn get(&self, step: usize) -> Option<(usize, &KeySwitchKey)> {
        self.keys.get(&step).map(|(g, key)| (*g, key))
    }

    /// The rotation steps keys exist for.
    pub fn steps(&self) -> Vec<usize> {
        self.keys.keys().copied().collect()
    }
}

/// All key material of one context.
pub struct KeySet {
    pub(crate) secret: SecretKey,
    pub public: PublicKey,
    pub relin: KeySwitchKey,
    pub galois: GaloisKeys,
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("secret", &"<redacted>")
            .field("relin_digits", &self.relin.digit_count())
            .field("galois_steps", &self.galois.steps())
            .finish()
    }
}
