//! Key generation

use std::collections::BTreeMap;

use crate::math::galois::{apply_automorphism_signed, rotation_element};
use crate::math::{ModQ, RnsBasis, RnsPoly, Sampler};

use super::{GaloisKeys, KeySet, KeySwitchKey, PublicKey, SecretKey};

/// Generate the full key set for a basis.
///
/// Galois keys cover left rotations by every power of two below the slot
/// count; other rotations are composed from them.
pub(crate) fn generate_key_set(basis: &RnsBasis, sampler: &mut Sampler) -> KeySet {
    let secret = generate_secret_key(basis, sampler);
    let public = generate_public_key(&secret, basis, sampler);

    let all = basis.all_tables();
    let s_squared = secret.ntt.mul(&secret.ntt, &all);
    let relin = generate_switch_key(&secret, &s_squared, basis, sampler);

    let slots = basis.degree() / 2;
    let mut keys = BTreeMap::new();
    let mut step = 1;
    while step < slots {
        let g = rotation_element(step, basis.degree());
        let rotated = apply_automorphism_signed(&secret.coeffs, g);
        let mut target = RnsPoly::from_signed(&rotated, &all);
        target.to_ntt(&all);
        keys.insert(step, (g, generate_switch_key(&secret, &target, basis, sampler)));
        step <<= 1;
    }

    KeySet {
        secret,
        public,
        relin,
        galois: GaloisKeys { keys },
    }
}

fn generate_secret_key(basis: &RnsBasis, sampler: &mut Sampler) -> SecretKey {
    let all = basis.all_tables();
    let coeffs = sampler.ternary_vec(basis.degree());
    let mut ntt = RnsPoly::from_signed(&coeffs, &all);
    ntt.to_ntt(&all);
    SecretKey { coeffs, ntt }
}

fn generate_public_key(sk: &SecretKey, basis: &RnsBasis, sampler: &mut Sampler) -> PublicKey {
    let n = basis.degree();
    let tables = basis.level_tables(basis.max_level());

    let a = sampler.uniform_ntt(n, &tables);
    let mut b = sampler.error_ntt(n, &tables);
    let a_s = a.mul(&sk.ntt, &tables);
    b.sub_assign(&a_s, &tables);

    PublicKey { b, a }
}

/// Key switching `target → s`. `target` is in NTT form over the full basis.
pub(crate) fn generate_switch_key(
    sk: &SecretKey,
    target: &RnsPoly,
    basis: &RnsBasis,
    sampler: &mut Sampler,
) -> KeySwitchKey {
    let n = basis.degree();
    let all = basis.all_tables();
    let p = basis.modulus(basis.special_index());

    let digits = (0..=basis.max_level())
        .map(|i| {
            let a = sampler.uniform_ntt(n, &all);
            let mut b = sampler.error_ntt(n, &all);
            b.sub_assign(&a.mul(&sk.ntt, &all), &all);

            // + P·s' on limb i only
            let qi = basis.modulus(i);
            let p_mod = p % qi;
            let limb = b.limb_mut(i);
            for (x, &t) in limb.iter_mut().zip(target.limb(i)) {
                *x = ModQ::add(*x, ModQ::mul(t, p_mod, qi), qi);
            }
            (b, a)
        })
        .collect();

    KeySwitchKey { digits }
}
