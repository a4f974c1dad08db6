//! CRT reconstruction of RNS residues.
//!
//! Decryption needs the centered integer behind a set of residues before it
//! can be scaled back to a real number; the product of several 40-60 bit
//! primes does not fit a machine word, so composition goes through
//! `num-bigint`.

use num_bigint::{BigInt, BigUint};
use num_traits::{ToPrimitive, Zero};

use super::modular::ModQ;

/// Precomputed CRT constants for one set of coprime moduli.
#[derive(Clone, Debug)]
pub struct CrtComposer {
    moduli: Vec<u64>,
    product: BigUint,
    half: BigUint,
    /// Q / q_i
    q_hat: Vec<BigUint>,
    /// (Q / q_i)^{-1} mod q_i
    q_hat_inv: Vec<u64>,
}

impl CrtComposer {
    /// Returns `None` if the moduli are not pairwise coprime.
    pub fn new(moduli: &[u64]) -> Option<Self> {
        let product = moduli
            .iter()
            .fold(BigUint::from(1u32), |acc, &q| acc * BigUint::from(q));
        let half = &product >> 1usize;

        let mut q_hat = Vec::with_capacity(moduli.len());
        let mut q_hat_inv = Vec::with_capacity(moduli.len());
        for &q in moduli {
            let hat = &product / BigUint::from(q);
            let hat_mod = (&hat % BigUint::from(q)).to_u64()?;
            q_hat_inv.push(ModQ::inverse(hat_mod, q)?);
            q_hat.push(hat);
        }

        Some(Self {
            moduli: moduli.to_vec(),
            product,
            half,
            q_hat,
            q_hat_inv,
        })
    }

    pub fn moduli(&self) -> &[u64] {
        &self.moduli
    }

    /// The unique value in `(-Q/2, Q/2]` with the given residues.
    pub fn compose_centered(&self, residues: &[u64]) -> BigInt {
        debug_assert_eq!(residues.len(), self.moduli.len());
        let mut acc = BigUint::zero();
        for ((&r, &q), (hat, &hat_inv)) in residues
            .iter()
            .zip(&self.moduli)
            .zip(self.q_hat.iter().zip(&self.q_hat_inv))
        {
            let t = ModQ::mul(r, hat_inv, q);
            acc += hat * t;
        }
        acc %= &self.product;

        if acc > self.half {
            BigInt::from(acc) - BigInt::from(self.product.clone())
        } else {
            BigInt::from(acc)
        }
    }

    /// Centered value as a float, for decoding.
    pub fn compose_f64(&self, residues: &[u64]) -> f64 {
        if let [r] = residues {
            return ModQ::to_signed(*r, self.moduli[0]) as f64;
        }
        self.compose_centered(residues).to_f64().unwrap_or(f64::NAN)
    }
}
