//! Polynomials in residue-number-system (RNS) form.
//!
//! A polynomial modulo `Q = q_0 · q_1 ⋯ q_k` is stored as one limb of `n`
//! residues per prime. Limb `i` is always reduced modulo the `i`-th table
//! passed alongside it, so the same polynomial type serves ciphertext
//! components (limbs `q_0..q_l`) and key material (limbs `q_0..q_L, P`).
//!
//! Binary operations walk the limbs of `self` and require the other operand
//! to have at least as many; a key with more limbs than a ciphertext is
//! therefore used as-is at any lower level.

use rayon::prelude::*;
use zeroize::Zeroize;

use super::modular::ModQ;
use super::ntt::NttTable;

/// Polynomial over a chain of word-sized primes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RnsPoly {
    limbs: Vec<Vec<u64>>,
    is_ntt: bool,
}

impl RnsPoly {
    /// The zero polynomial with `num_limbs` limbs.
    pub fn zero(degree: usize, num_limbs: usize, is_ntt: bool) -> Self {
        Self {
            limbs: vec![vec![0u64; degree]; num_limbs],
            is_ntt,
        }
    }

    /// Build from raw limbs.
    pub fn from_limbs(limbs: Vec<Vec<u64>>, is_ntt: bool) -> Self {
        Self { limbs, is_ntt }
    }

    /// Reduce signed coefficients into every table's prime (coefficient form).
    pub fn from_signed(coeffs: &[i64], tables: &[&NttTable]) -> Self {
        let limbs = tables
            .iter()
            .map(|t| {
                let q = t.modulus();
                coeffs.iter().map(|&c| ModQ::from_signed(c, q)).collect()
            })
            .collect();
        Self {
            limbs,
            is_ntt: false,
        }
    }

    /// Reduce wide signed coefficients into every table's prime (coefficient form).
    pub fn from_i128(coeffs: &[i128], tables: &[&NttTable]) -> Self {
        let limbs = tables
            .iter()
            .map(|t| {
                let q = t.modulus();
                coeffs.iter().map(|&c| ModQ::from_i128(c, q)).collect()
            })
            .collect();
        Self {
            limbs,
            is_ntt: false,
        }
    }

    pub fn degree(&self) -> usize {
        self.limbs.first().map_or(0, Vec::len)
    }

    pub fn num_limbs(&self) -> usize {
        self.limbs.len()
    }

    pub fn is_ntt(&self) -> bool {
        self.is_ntt
    }

    pub fn limb(&self, i: usize) -> &[u64] {
        &self.limbs[i]
    }

    pub fn limb_mut(&mut self, i: usize) -> &mut [u64] {
        &mut self.limbs[i]
    }

    /// Append a limb (used when assembling extended-basis polynomials).
    pub fn push_limb(&mut self, limb: Vec<u64>) {
        self.limbs.push(limb);
    }

    /// Copy of the first `count` limbs.
    pub fn prefix(&self, count: usize) -> Self {
        Self {
            limbs: self.limbs[..count].to_vec(),
            is_ntt: self.is_ntt,
        }
    }

    /// Drop limbs beyond the first `count`. Value is unchanged modulo the
    /// remaining primes.
    pub fn truncate(&mut self, count: usize) {
        self.limbs.truncate(count);
    }

    /// Remove and return the last limb.
    pub fn pop_limb(&mut self) -> Option<Vec<u64>> {
        self.limbs.pop()
    }

    /// Transform every limb into the evaluation domain.
    pub fn to_ntt(&mut self, tables: &[&NttTable]) {
        if self.is_ntt {
            return;
        }
        debug_assert!(tables.len() >= self.limbs.len());
        self.limbs
            .par_iter_mut()
            .zip(tables.par_iter())
            .for_each(|(limb, table)| table.forward(limb));
        self.is_ntt = true;
    }

    /// Transform every limb back to coefficients.
    pub fn from_ntt(&mut self, tables: &[&NttTable]) {
        if !self.is_ntt {
            return;
        }
        debug_assert!(tables.len() >= self.limbs.len());
        self.limbs
            .par_iter_mut()
            .zip(tables.par_iter())
            .for_each(|(limb, table)| table.inverse(limb));
        self.is_ntt = false;
    }

    pub fn add_assign(&mut self, other: &RnsPoly, tables: &[&NttTable]) {
        debug_assert_eq!(self.is_ntt, other.is_ntt);
        debug_assert!(other.limbs.len() >= self.limbs.len());
        for ((a, b), t) in self.limbs.iter_mut().zip(&other.limbs).zip(tables) {
            let q = t.modulus();
            for (x, &y) in a.iter_mut().zip(b) {
                *x = ModQ::add(*x, y, q);
            }
        }
    }

    pub fn sub_assign(&mut self, other: &RnsPoly, tables: &[&NttTable]) {
        debug_assert_eq!(self.is_ntt, other.is_ntt);
        debug_assert!(other.limbs.len() >= self.limbs.len());
        for ((a, b), t) in self.limbs.iter_mut().zip(&other.limbs).zip(tables) {
            let q = t.modulus();
            for (x, &y) in a.iter_mut().zip(b) {
                *x = ModQ::sub(*x, y, q);
            }
        }
    }

    pub fn negate(&mut self, tables: &[&NttTable]) {
        for (a, t) in self.limbs.iter_mut().zip(tables) {
            let q = t.modulus();
            for x in a.iter_mut() {
                *x = ModQ::negate(*x, q);
            }
        }
    }

    /// Pointwise product in the evaluation domain.
    pub fn mul(&self, other: &RnsPoly, tables: &[&NttTable]) -> RnsPoly {
        debug_assert!(self.is_ntt && other.is_ntt, "mul requires NTT form");
        debug_assert!(other.limbs.len() >= self.limbs.len());
        let limbs = self
            .limbs
            .par_iter()
            .zip(other.limbs.par_iter())
            .zip(tables.par_iter())
            .map(|((a, b), t)| a.iter().zip(b).map(|(&x, &y)| t.mul(x, y)).collect())
            .collect();
        RnsPoly {
            limbs,
            is_ntt: true,
        }
    }

    /// `self += a * b` in the evaluation domain.
    pub fn mul_add_assign(&mut self, a: &RnsPoly, b: &RnsPoly, tables: &[&NttTable]) {
        debug_assert!(self.is_ntt && a.is_ntt && b.is_ntt);
        self.limbs
            .par_iter_mut()
            .zip(a.limbs.par_iter())
            .zip(b.limbs.par_iter())
            .zip(tables.par_iter())
            .for_each(|(((acc, x), y), t)| {
                let q = t.modulus();
                for ((r, &u), &v) in acc.iter_mut().zip(x).zip(y) {
                    *r = ModQ::add(*r, t.mul(u, v), q);
                }
            });
    }

    /// Divide by the last limb's prime with rounding and drop that limb.
    ///
    /// `tables` holds one table per limb, the divisor's last. With `p` the
    /// last prime, each remaining limb becomes `(x - [x]_p) · p^{-1}`, where
    /// `[x]_p` is the centered residue lifted into that limb's prime. Used
    /// both for rescaling and for the mod-down step of key switching.
    pub fn drop_last_rounded(&mut self, tables: &[&NttTable]) {
        debug_assert!(self.is_ntt);
        debug_assert_eq!(tables.len(), self.limbs.len());
        let Some(mut last) = self.limbs.pop() else {
            return;
        };
        let (p_table, rest) = match tables.split_last() {
            Some(split) => split,
            None => return,
        };
        let p = p_table.modulus();
        p_table.inverse(&mut last);

        self.limbs
            .par_iter_mut()
            .zip(rest.par_iter())
            .for_each(|(limb, table)| {
                let q = table.modulus();
                let mut correction: Vec<u64> = last
                    .iter()
                    .map(|&r| ModQ::from_signed(ModQ::to_signed(r, p), q))
                    .collect();
                table.forward(&mut correction);

                // Distinct primes, so p is always invertible here.
                let p_inv = ModQ::inverse(p % q, q).unwrap_or(0);
                for (x, &c) in limb.iter_mut().zip(&correction) {
                    *x = ModQ::mul(ModQ::sub(*x, c, q), p_inv, q);
                }
            });
    }

    /// Multiply limb `i` by the plain scalar `scalars[i]`.
    ///
    /// Valid in either domain; see the note on Montgomery form in
    /// [`ntt`](super::ntt).
    pub fn mul_scalars(&mut self, scalars: &[u64], tables: &[&NttTable]) {
        for ((a, &s), t) in self.limbs.iter_mut().zip(scalars).zip(tables) {
            let q = t.modulus();
            for x in a.iter_mut() {
                *x = ModQ::mul(*x, s, q);
            }
        }
    }
}

impl Zeroize for RnsPoly {
    fn zeroize(&mut self) {
        for limb in self.limbs.iter_mut() {
            limb.zeroize();
        }
    }
}

/// The prime chain of a context: `q_0, …, q_L` followed by the special
/// key-switching prime `P`.
#[derive(Clone, Debug)]
pub struct RnsBasis {
    degree: usize,
    tables: Vec<NttTable>,
}

impl RnsBasis {
    /// `primes` lists the chain in order with the special prime last.
    pub fn new(degree: usize, primes: &[u64]) -> Self {
        debug_assert!(primes.len() >= 2);
        let tables = primes
            .par_iter()
            .map(|&q| NttTable::new(degree, q))
            .collect();
        Self { degree, tables }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Highest ciphertext level, `L`.
    pub fn max_level(&self) -> usize {
        self.tables.len() - 2
    }

    /// Index of the special prime.
    pub fn special_index(&self) -> usize {
        self.tables.len() - 1
    }

    pub fn table(&self, i: usize) -> &NttTable {
        &self.tables[i]
    }

    pub fn modulus(&self, i: usize) -> u64 {
        self.tables[i].modulus()
    }

    /// Ciphertext primes `q_0..q_L` followed by `P`.
    pub fn primes(&self) -> Vec<u64> {
        self.tables.iter().map(NttTable::modulus).collect()
    }

    /// Tables for a ciphertext at `level` (`q_0..q_level`).
    pub fn level_tables(&self, level: usize) -> Vec<&NttTable> {
        self.tables[..=level].iter().collect()
    }

    /// Tables for `q_0..q_level` followed by `P`.
    pub fn extended_tables(&self, level: usize) -> Vec<&NttTable> {
        self.tables[..=level]
            .iter()
            .chain(std::iter::once(&self.tables[self.special_index()]))
            .collect()
    }

    /// Every table, in storage order of key material.
    pub fn all_tables(&self) -> Vec<&NttTable> {
        self.tables.iter().collect()
    }

    /// `log2(q_0 ⋯ q_level)`.
    pub fn log2_modulus(&self, level: usize) -> f64 {
        self.tables[..=level]
            .iter()
            .map(|t| (t.modulus() as f64).log2())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::primes::ntt_prime_chain;

    fn basis(n: usize) -> RnsBasis {
        RnsBasis::new(n, &ntt_prime_chain(&[50, 40, 50], n).unwrap())
    }

    #[test]
    fn test_signed_roundtrip_through_ntt() {
        let b = basis(64);
        let tables = b.all_tables();
        let coeffs: Vec<i64> = (0..64).map(|i| i - 32).collect();

        let mut p = RnsPoly::from_signed(&coeffs, &tables);
        let original = p.clone();
        p.to_ntt(&tables);
        assert!(p.is_ntt());
        p.from_ntt(&tables);
        assert_eq!(p, original);
    }

    #[test]
    fn test_mul_matches_per_prime_product() {
        let n = 32;
        let b = basis(n);
        let tables = b.level_tables(1);

        // (1 + x) * (1 - x) = 1 - x^2
        let mut a = vec![0i64; n];
        let mut c = vec![0i64; n];
        a[0] = 1;
        a[1] = 1;
        c[0] = 1;
        c[1] = -1;

        let mut pa = RnsPoly::from_signed(&a, &tables);
        let mut pc = RnsPoly::from_signed(&c, &tables);
        pa.to_ntt(&tables);
        pc.to_ntt(&tables);
        let mut prod = pa.mul(&pc, &tables);
        prod.from_ntt(&tables);

        let mut expected = vec![0i64; n];
        expected[0] = 1;
        expected[2] = -1;
        assert_eq!(prod, RnsPoly::from_signed(&expected, &tables));
    }

    #[test]
    fn test_key_limbs_usable_at_lower_level() {
        let n = 16;
        let b = basis(n);
        let all = b.all_tables();
        let low = b.level_tables(0);

        let ones = vec![1i64; n];
        let mut key = RnsPoly::from_signed(&ones, &all);
        key.to_ntt(&all);
        let mut ct = RnsPoly::from_signed(&ones, &low);
        ct.to_ntt(&low);

        let mut acc = RnsPoly::zero(n, 1, true);
        acc.mul_add_assign(&ct, &key, &low);
        assert_eq!(acc.num_limbs(), 1);
        assert_eq!(acc, ct.mul(&key, &low));
    }

    #[test]
    fn test_drop_last_rounded_divides() {
        let n = 16;
        let b = basis(n);
        let tables = b.level_tables(1);
        let q1 = b.modulus(1) as i64;

        // 3·q1 + 5 divided by q1 rounds to 3; -2·q1 - 7 rounds to -2
        let mut coeffs = vec![0i64; n];
        coeffs[0] = 3 * q1 + 5;
        coeffs[1] = -2 * q1 - 7;
        let mut p = RnsPoly::from_signed(&coeffs, &tables);
        p.to_ntt(&tables);
        p.drop_last_rounded(&tables);
        assert_eq!(p.num_limbs(), 1);

        let low = b.level_tables(0);
        p.from_ntt(&low);
        let q0 = b.modulus(0);
        assert_eq!(ModQ::to_signed(p.limb(0)[0], q0), 3);
        assert_eq!(ModQ::to_signed(p.limb(0)[1], q0), -2);
        assert!(p.limb(0)[2..].iter().all(|&c| c == 0));
    }

    #[test]
    fn test_basis_layout() {
        let b = basis(16);
        assert_eq!(b.max_level(), 1);
        assert_eq!(b.special_index(), 2);
        assert_eq!(b.extended_tables(0).len(), 2);
        assert_eq!(b.extended_tables(0)[1].modulus(), b.modulus(2));
        assert!((b.log2_modulus(1) - 90.0).abs() < 0.01);
    }
}
