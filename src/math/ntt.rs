//! Negacyclic Number-Theoretic Transform over a single prime.
//!
//! Evaluates polynomials of `Z_q[X]/(X^n + 1)` at the odd powers of a
//! primitive 2n-th root of unity ψ, so ring multiplication becomes pointwise
//! multiplication. The forward transform is Cooley-Tukey with bit-reversed
//! twiddles, the inverse is Gentleman-Sande.
//!
//! Values in the evaluation domain are kept in Montgomery form. Addition,
//! subtraction and multiplication by a plain (non-Montgomery) scalar with
//! [`ModQ::mul`](super::ModQ::mul) all stay consistent with that form; only
//! products of two evaluation-domain values need [`NttTable::mul`].
//!
//! An RNS polynomial carries one table per prime of its basis.

use super::modular::ModQ;

/// Precomputed twiddles and Montgomery constants for one `(n, q)` pair.
#[derive(Clone, Debug)]
pub struct NttTable {
    n: usize,
    q: u64,
    /// -q^{-1} mod 2^64
    q_inv_neg: u64,
    /// 2^128 mod q
    r_squared: u64,
    /// ψ^{bitrev(i)} in Montgomery form
    psi_rev: Vec<u64>,
    /// ψ^{-bitrev(i)} in Montgomery form
    psi_inv_rev: Vec<u64>,
    /// n^{-1} in Montgomery form
    n_inv: u64,
}

impl NttTable {
    /// Build the table for ring degree `n` and prime `q`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is not a power of two or `q` is not `1 mod 2n`. Chain
    /// primes come from [`ntt_prime`](super::primes::ntt_prime), which
    /// guarantees both.
    pub fn new(n: usize, q: u64) -> Self {
        assert!(n.is_power_of_two() && n >= 2, "n must be a power of two");
        assert!(q % (2 * n as u64) == 1, "q must be 1 mod 2n");
        assert!(q < (1 << 62), "q must fit Montgomery reduction");

        let q_inv_neg = Self::compute_q_inv_neg(q);
        let r_mod_q = ((1u128 << 64) % q as u128) as u64;
        let r_squared = ModQ::mul(r_mod_q, r_mod_q, q);

        let psi = Self::find_primitive_root(2 * n as u64, q);
        let psi_inv = ModQ::pow(psi, q - 2, q);
        let n_inv = ModQ::pow(n as u64, q - 2, q);

        let mut table = Self {
            n,
            q,
            q_inv_neg,
            r_squared,
            psi_rev: Vec::new(),
            psi_inv_rev: Vec::new(),
            n_inv: 0,
        };
        table.psi_rev = table.bit_reversed_powers(psi);
        table.psi_inv_rev = table.bit_reversed_powers(psi_inv);
        table.n_inv = table.to_mont(n_inv);
        table
    }

    /// Ring degree.
    pub fn degree(&self) -> usize {
        self.n
    }

    /// The prime modulus.
    pub fn modulus(&self) -> u64 {
        self.q
    }

    /// Forward transform. Input is a reduced coefficient vector; output is
    /// the evaluation vector in Montgomery form.
    pub fn forward(&self, coeffs: &mut [u64]) {
        debug_assert_eq!(coeffs.len(), self.n);
        for c in coeffs.iter_mut() {
            *c = self.to_mont(*c);
        }

        let q = self.q;
        let mut t = self.n;
        let mut m = 1;
        while m < self.n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let w = self.psi_rev[m + i];
                for j in j1..j1 + t {
                    let u = coeffs[j];
                    let v = self.mul(coeffs[j + t], w);
                    coeffs[j] = ModQ::add(u, v, q);
                    coeffs[j + t] = ModQ::sub(u, v, q);
                }
            }
            m <<= 1;
        }
    }

    /// Inverse transform, undoing [`forward`](Self::forward) including the
    /// Montgomery conversion.
    pub fn inverse(&self, values: &mut [u64]) {
        debug_assert_eq!(values.len(), self.n);

        let q = self.q;
        let mut t = 1;
        let mut m = self.n;
        while m > 1 {
            m >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let w = self.psi_inv_rev[m + i];
                for j in j1..j1 + t {
                    let u = values[j];
                    let v = values[j + t];
                    values[j] = ModQ::add(u, v, q);
                    values[j + t] = self.mul(ModQ::sub(u, v, q), w);
                }
            }
            t <<= 1;
        }

        // n^{-1} scaling and leaving Montgomery form in one pass
        for v in values.iter_mut() {
            let scaled = self.mul(*v, self.n_inv);
            *v = self.mul(scaled, 1);
        }
    }

    /// Montgomery product of two evaluation-domain values.
    #[inline]
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        let ab = (a as u128) * (b as u128);
        let m = (ab as u64).wrapping_mul(self.q_inv_neg) as u128;
        let t = ((ab + m * self.q as u128) >> 64) as u64;
        if t >= self.q {
            t - self.q
        } else {
            t
        }
    }

    /// Convert a reduced value into Montgomery form.
    #[inline]
    pub fn to_mont(&self, a: u64) -> u64 {
        self.mul(a, self.r_squared)
    }

    fn compute_q_inv_neg(q: u64) -> u64 {
        // Newton iteration doubles the number of correct low bits each step.
        let mut inv: u64 = 1;
        for _ in 0..6 {
            inv = inv.wrapping_mul(2u64.wrapping_sub(q.wrapping_mul(inv)));
        }
        inv.wrapping_neg()
    }

    /// Primitive `order`-th root of unity modulo q (order a power of two).
    fn find_primitive_root(order: u64, q: u64) -> u64 {
        let exp = (q - 1) / order;
        (2..q)
            .map(|g| ModQ::pow(g, exp, q))
            .find(|&candidate| ModQ::pow(candidate, order / 2, q) == q - 1)
            .unwrap_or(1)
    }

    /// `root^{bitrev_{log n}(i)}` for `i in 0..n`, in Montgomery form.
    fn bit_reversed_powers(&self, root: u64) -> Vec<u64> {
        let log_n = self.n.trailing_zeros();
        let mut out = vec![0u64; self.n];
        let mut power = 1u64;
        for i in 0..self.n {
            let rev = (i.reverse_bits() >> (usize::BITS - log_n)) as usize;
            out[rev] = self.to_mont(power);
            power = ModQ::mul(power, root, self.q);
        }
        out
    }
}
