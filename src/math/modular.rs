//! Scalar arithmetic over Z_q for word-sized moduli (q < 2^62).

/// Modular arithmetic operations over Z_q
pub struct ModQ;

impl ModQ {
    /// Add two reduced values modulo q
    #[inline]
    pub fn add(a: u64, b: u64, q: u64) -> u64 {
        let sum = a + b;
        if sum >= q {
            sum - q
        } else {
            sum
        }
    }

    /// Subtract two reduced values modulo q
    #[inline]
    pub fn sub(a: u64, b: u64, q: u64) -> u64 {
        if a >= b {
            a - b
        } else {
            q - (b - a)
        }
    }

    /// Multiply two values modulo q
    #[inline]
    pub fn mul(a: u64, b: u64, q: u64) -> u64 {
        ((a as u128 * b as u128) % q as u128) as u64
    }

    /// Negate a reduced value modulo q
    #[inline]
    pub fn negate(a: u64, q: u64) -> u64 {
        if a == 0 {
            0
        } else {
            q - a
        }
    }

    /// `base^exp mod q` by square-and-multiply
    pub fn pow(base: u64, mut exp: u64, q: u64) -> u64 {
        let mut result = 1u64 % q;
        let mut base = base % q;
        while exp > 0 {
            if exp & 1 == 1 {
                result = Self::mul(result, base, q);
            }
            base = Self::mul(base, base, q);
            exp >>= 1;
        }
        result
    }

    /// Multiplicative inverse of `a` modulo `q`, if it exists
    pub fn inverse(a: u64, q: u64) -> Option<u64> {
        let (mut t, mut new_t): (i128, i128) = (0, 1);
        let (mut r, mut new_r): (i128, i128) = (q as i128, (a % q) as i128);

        while new_r != 0 {
            let quotient = r / new_r;
            (t, new_t) = (new_t, t - quotient * new_t);
            (r, new_r) = (new_r, r - quotient * new_r);
        }

        if r != 1 {
            return None;
        }
        if t < 0 {
            t += q as i128;
        }
        Some(t as u64)
    }

    /// Map a signed integer into Z_q
    #[inline]
    pub fn from_signed(val: i64, q: u64) -> u64 {
        if val >= 0 {
            (val as u64) % q
        } else {
            Self::negate(val.unsigned_abs() % q, q)
        }
    }

    /// Map a 128-bit signed integer into Z_q
    #[inline]
    pub fn from_i128(val: i128, q: u64) -> u64 {
        let r = val.rem_euclid(q as i128);
        r as u64
    }

    /// Centered representative in [-q/2, q/2]
    #[inline]
    pub fn to_signed(val: u64, q: u64) -> i64 {
        if val <= q / 2 {
            val as i64
        } else {
            -((q - val) as i64)
        }
    }
}
