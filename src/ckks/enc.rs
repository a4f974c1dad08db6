//! CKKS encryption and decryption
//!
//! Public-key encryption of a plaintext `m` at level `l`:
//! ```text
//! u ← ternary,  e_0, e_1 ← χ
//! c_0 = b·u + e_0 + m,   c_1 = a·u + e_1        (mod q_0 ⋯ q_l)
//! ```
//! so that `c_0 + c_1·s = m + e·u + e_0 + e_1·s ≈ m`.

use rayon::prelude::*;

use crate::keys::{PublicKey, SecretKey};
use crate::math::{CrtComposer, RnsBasis, RnsPoly, Sampler};

use super::types::Plaintext;

/// Encrypt `pt` under `pk`, returning the two ciphertext components.
pub(crate) fn encrypt_parts(
    pt: &Plaintext,
    pk: &PublicKey,
    basis: &RnsBasis,
    sampler: &mut Sampler,
) -> Vec<RnsPoly> {
    let n = basis.degree();
    let tables = basis.level_tables(pt.level);

    let mut u = RnsPoly::from_signed(&sampler.ternary_vec(n), &tables);
    u.to_ntt(&tables);

    // b·u + e_0 + m
    let mut c0 = sampler.error_ntt(n, &tables);
    c0.mul_add_assign(&u, &pk.b, &tables);
    c0.add_assign(&pt.poly, &tables);

    // a·u + e_1
    let mut c1 = sampler.error_ntt(n, &tables);
    c1.mul_add_assign(&u, &pk.a, &tables);

    vec![c0, c1]
}

/// `Σ c_i · s^i` in coefficient form over the ciphertext's primes.
pub(crate) fn decrypt_parts(parts: &[RnsPoly], level: usize, sk: &SecretKey, basis: &RnsBasis) -> RnsPoly {
    let tables = basis.level_tables(level);
    let s = sk.ntt.prefix(level + 1);

    let mut acc = parts[0].clone();
    let mut s_power = s.clone();
    for (i, part) in parts.iter().enumerate().skip(1) {
        if i > 1 {
            s_power = s_power.mul(&s, &tables);
        }
        acc.mul_add_assign(part, &s_power, &tables);
    }
    acc.from_ntt(&tables);
    acc
}

/// Centered coefficients of a coefficient-form polynomial as floats.
///
/// `crt` must cover exactly the polynomial's primes.
pub(crate) fn centered_coeffs(poly: &RnsPoly, crt: &CrtComposer) -> Vec<f64> {
    debug_assert!(!poly.is_ntt());
    debug_assert_eq!(poly.num_limbs(), crt.moduli().len());
    (0..poly.degree())
        .into_par_iter()
        .map(|i| {
            let residues: Vec<u64> = (0..poly.num_limbs()).map(|l| poly.limb(l)[i]).collect();
            crt.compose_f64(&residues)
        })
        .collect()
}
