//! NTT-friendly prime generation.
//!
//! A modulus chain entry of `b` bits is realised as the largest unused prime
//! `q < 2^b` with `q ≡ 1 (mod 2n)`, so every prime in the chain admits a
//! primitive 2n-th root of unity for the negacyclic NTT.

use super::modular::ModQ;

const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Deterministic Miller-Rabin for all 64-bit inputs
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &p in &WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }

    let mut d = n - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }

    'witness: for &a in &WITNESSES {
        let mut x = ModQ::pow(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = ModQ::mul(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Find the largest prime below `2^bits` that is `1 mod 2n` and not in `exclude`.
///
/// The search stays above `2^(bits-1)` so the prime really has `bits` bits.
pub fn ntt_prime(bits: u32, degree: usize, exclude: &[u64]) -> Option<u64> {
    if !(2..=62).contains(&bits) {
        return None;
    }
    let step = 2 * degree as u64;
    let upper = 1u64 << bits;
    let lower = 1u64 << (bits - 1);

    let mut candidate = (upper - 1) / step * step + 1;
    if candidate >= upper {
        candidate = candidate.checked_sub(step)?;
    }

    while candidate > lower {
        if !exclude.contains(&candidate) && is_prime(candidate) {
            return Some(candidate);
        }
        candidate = candidate.checked_sub(step)?;
    }
    None
}

/// Generate one distinct NTT-friendly prime per requested bit size.
///
/// Returns the bit size that could not be satisfied on failure.
pub fn ntt_prime_chain(bit_sizes: &[u32], degree: usize) -> Result<Vec<u64>, u32> {
    let mut primes: Vec<u64> = Vec::with_capacity(bit_sizes.len());
    for &bits in bit_sizes {
        let prime = ntt_prime(bits, degree, &primes).ok_or(bits)?;
        primes.push(prime);
    }
    Ok(primes)
}
