//! Galois automorphisms τ_g(X) = X^g of `Z[X]/(X^n + 1)`.
//!
//! With the slot ordering used by the codec (slot j evaluated at ζ^{5^j}),
//! τ_{5^k} rotates the slot vector left by k positions.

use super::modular::ModQ;

/// Generator of the rotation subgroup of (Z/2nZ)^*.
pub const ROTATION_GENERATOR: usize = 5;

/// Galois element realising a left rotation by `steps` slots.
pub fn rotation_element(steps: usize, degree: usize) -> usize {
    let two_n = 2 * degree as u64;
    ModQ::pow(ROTATION_GENERATOR as u64, steps as u64, two_n) as usize
}

/// Check if g is a valid Galois element (odd and below 2n)
pub fn is_valid_galois_element(g: usize, degree: usize) -> bool {
    g % 2 == 1 && g < 2 * degree
}

/// Target index and sign of coefficient `i` under τ_g.
#[inline]
fn permuted_index(i: usize, g: usize, degree: usize) -> (usize, bool) {
    let idx = (g * i) % (2 * degree);
    if idx < degree {
        (idx, false)
    } else {
        (idx - degree, true)
    }
}

/// Apply τ_g to signed coefficients (secret keys).
pub fn apply_automorphism_signed(coeffs: &[i64], g: usize) -> Vec<i64> {
    let degree = coeffs.len();
    debug_assert!(is_valid_galois_element(g, degree));
    let mut out = vec![0i64; degree];
    for (i, &c) in coeffs.iter().enumerate() {
        let (j, negate) = permuted_index(i, g, degree);
        out[j] = if negate { -c } else { c };
    }
    out
}

/// Apply τ_g to one residue limb in coefficient form.
pub fn apply_automorphism_limb(limb: &[u64], g: usize, q: u64) -> Vec<u64> {
    let degree = limb.len();
    debug_assert!(is_valid_galois_element(g, degree));
    let mut out = vec![0u64; degree];
    for (i, &c) in limb.iter().enumerate() {
        let (j, negate) = permuted_index(i, g, degree);
        out[j] = if negate { ModQ::negate(c, q) } else { c };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_element() {
        let coeffs: Vec<i64> = (0..16).collect();
        assert_eq!(apply_automorphism_signed(&coeffs, 1), coeffs);
    }

    #[test]
    fn test_rotation_elements() {
        let n = 1024;
        assert_eq!(rotation_element(0, n), 1);
        assert_eq!(rotation_element(1, n), 5);
        assert_eq!(rotation_element(2, n), 25);
        // 5 has order n/2 in (Z/2nZ)^*
        assert_eq!(rotation_element(n / 2, n), 1);
    }

    #[test]
    fn test_composition() {
        let n = 64;
        let coeffs: Vec<i64> = (0..n as i64).map(|i| i * 3 - 7).collect();
        let g1 = rotation_element(3, n);
        let g2 = rotation_element(5, n);

        let composed = apply_automorphism_signed(&apply_automorphism_signed(&coeffs, g1), g2);
        let direct = apply_automorphism_signed(&coeffs, rotation_element(8, n));
        assert_eq!(composed, direct);
    }

    #[test]
    fn test_limb_matches_signed() {
        let n = 32;
        let q = 97u64;
        let coeffs: Vec<i64> = (0..n as i64).map(|i| i - 16).collect();
        let limb: Vec<u64> = coeffs.iter().map(|&c| ModQ::from_signed(c, q)).collect();
        let g = rotation_element(7, n);

        let expected: Vec<u64> = apply_automorphism_signed(&coeffs, g)
            .iter()
            .map(|&c| ModQ::from_signed(c, q))
            .collect();
        assert_eq!(apply_automorphism_limb(&limb, g, q), expected);
    }
}
