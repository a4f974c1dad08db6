//! Key-switching operation

use rayon::prelude::*;

use crate::math::{ModQ, RnsBasis, RnsPoly};

use super::KeySwitchKey;

/// Switch `input` (NTT form, `level + 1` limbs) from the key's source secret
/// to `s`.
///
/// Returns `(k0, k1)` with `k0 + k1·s ≈ input·s'` modulo `q_0 ⋯ q_level`.
///
/// # Algorithm
///
/// 1. Take the residue of `input` modulo each `q_i` as digit `d_i`, lifted
///    (centered) into every prime of `q_0..q_level, P`.
/// 2. Accumulate `Σ d_i · K[i]` over that extended basis.
/// 3. Divide by `P` with rounding (mod-down) to drop the special prime.
///
/// The digit decomposition is the RNS one, so the key needs one digit per
/// ciphertext prime and the result carries only key noise scaled by `1/P`.
pub(crate) fn key_switch(
    input: &RnsPoly,
    key: &KeySwitchKey,
    basis: &RnsBasis,
    level: usize,
) -> (RnsPoly, RnsPoly) {
    debug_assert!(input.is_ntt());
    debug_assert_eq!(input.num_limbs(), level + 1);

    let n = basis.degree();
    let special = basis.special_index();
    let level_tables = basis.level_tables(level);
    let ext_tables = basis.extended_tables(level);
    // Position in the extended accumulator -> limb index in key material
    let key_limbs: Vec<usize> = (0..=level).chain(std::iter::once(special)).collect();

    let mut coeffs = input.clone();
    coeffs.from_ntt(&level_tables);

    let mut acc0 = RnsPoly::zero(n, level + 2, true);
    let mut acc1 = RnsPoly::zero(n, level + 2, true);

    for (i, (key_b, key_a)) in key.digits.iter().enumerate().take(level + 1) {
        let qi = basis.modulus(i);
        let digit = coeffs.limb(i);

        let lifted: Vec<Vec<u64>> = ext_tables
            .par_iter()
            .map(|table| {
                let qj = table.modulus();
                let mut limb: Vec<u64> = digit
                    .iter()
                    .map(|&r| ModQ::from_signed(ModQ::to_signed(r, qi), qj))
                    .collect();
                table.forward(&mut limb);
                limb
            })
            .collect();

        for (pos, &k) in key_limbs.iter().enumerate() {
            let table = ext_tables[pos];
            let qj = table.modulus();
            let (b, a) = (key_b.limb(k), key_a.limb(k));

            let out0 = acc0.limb_mut(pos);
            for ((r, &d), &kb) in out0.iter_mut().zip(&lifted[pos]).zip(b) {
                *r = ModQ::add(*r, table.mul(d, kb), qj);
            }
            let out1 = acc1.limb_mut(pos);
            for ((r, &d), &ka) in out1.iter_mut().zip(&lifted[pos]).zip(a) {
                *r = ModQ::add(*r, table.mul(d, ka), qj);
            }
        }
    }

    acc0.drop_last_rounded(&ext_tables);
    acc1.drop_last_rounded(&ext_tables);
    (acc0, acc1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key_set;
    use crate::math::{ntt_prime_chain, Sampler, DEFAULT_SIGMA};

    fn basis() -> RnsBasis {
        RnsBasis::new(64, &ntt_prime_chain(&[60, 40, 40, 60], 64).unwrap())
    }

    /// Centered coefficients of `poly` modulo `q_0`.
    fn centered_q0(poly: &RnsPoly, basis: &RnsBasis) -> Vec<i64> {
        let mut p = poly.prefix(1);
        p.from_ntt(&basis.level_tables(0));
        let q0 = basis.modulus(0);
        p.limb(0).iter().map(|&c| ModQ::to_signed(c, q0)).collect()
    }

    #[test]
    fn test_relin_key_switches_s_squared() {
        let basis = basis();
        let mut sampler = Sampler::with_seed(DEFAULT_SIGMA, 5);
        let keys = generate_key_set(&basis, &mut sampler);

        for level in 0..=basis.max_level() {
            let tables = basis.level_tables(level);
            // Random input c; expect k0 + k1·s ≈ c·s²
            let c = sampler.uniform_ntt(basis.degree(), &tables);
            let (k0, k1) = key_switch(&c, &keys.relin, &basis, level);

            let s = keys.secret.ntt.prefix(level + 1);
            let s2 = s.mul(&s, &tables);
            let mut diff = k0.clone();
            diff.mul_add_assign(&k1, &s, &tables);
            diff.sub_assign(&c.mul(&s2, &tables), &tables);

            let noise = centered_q0(&diff, &basis);
            let max = noise.iter().map(|x| x.abs()).max().unwrap();
            assert!(max < 1 << 20, "key-switch noise too large at level {}: {}", level, max);
        }
    }
}
