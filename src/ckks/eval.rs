//! Homomorphic primitives.
//!
//! Every operation validates its operands from metadata alone (context,
//! size, scale, level, capacity) before touching any polynomial, and returns
//! a fresh ciphertext. Inputs are never mutated.

use tracing::debug;

use crate::codec::Codec;
use crate::context::ContextId;
use crate::error::{HeError, Result};
use crate::keys::{key_switch, KeySet};
use crate::math::galois::apply_automorphism_limb;
use crate::math::{RnsBasis, RnsPoly};

use super::types::Ciphertext;

/// Relative tolerance for treating two scales as equal.
pub const SCALE_TOLERANCE: f64 = 1e-9;

/// Capacity below this is treated as overflow; primes sit slightly below
/// their nominal bit size, so exact-fit chains land a hair under zero.
const CAPACITY_SLACK: f64 = -1.0;

/// Evaluator bound to one context's basis, keys and codec.
pub struct Evaluator<'a> {
    basis: &'a RnsBasis,
    keys: &'a KeySet,
    codec: &'a Codec,
    context_id: ContextId,
    base_bits: f64,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(basis: &'a RnsBasis, keys: &'a KeySet, codec: &'a Codec, context_id: ContextId) -> Self {
        Self {
            basis,
            keys,
            codec,
            context_id,
            base_bits: (basis.modulus(0) as f64).log2(),
        }
    }

    /// Headroom in bits of a ciphertext at `level` with `scale`.
    ///
    /// `log2 Q_level - log2 scale - (log2 q_0 - scale_bits)`: the base prime
    /// keeps `scale_bits` of it for the final scale and the rest for the
    /// integer part of the result.
    pub fn capacity_bits(&self, level: usize, scale: f64) -> f64 {
        let integer_bits = self.base_bits - self.codec.scale().log2();
        self.basis.log2_modulus(level) - scale.log2() - integer_bits
    }

    fn check_owned(&self, ct: &Ciphertext) -> Result<()> {
        if ct.context_id != self.context_id {
            return Err(HeError::ContextMismatch(format!(
                "ciphertext belongs to context {}, evaluator to {}",
                ct.context_id, self.context_id
            )));
        }
        Ok(())
    }

    fn check_scales(a: &Ciphertext, b: &Ciphertext) -> Result<()> {
        let tolerance = SCALE_TOLERANCE * a.scale.abs().max(b.scale.abs());
        if (a.scale - b.scale).abs() > tolerance {
            return Err(HeError::OperandMismatch(format!(
                "scales 2^{:.3} and 2^{:.3} differ; rescale first",
                a.scale.log2(),
                b.scale.log2()
            )));
        }
        Ok(())
    }

    fn output(&self, parts: Vec<RnsPoly>, level: usize, scale: f64, depth: usize) -> Ciphertext {
        Ciphertext {
            parts,
            level,
            scale,
            context_id: self.context_id,
            capacity_bits: self.capacity_bits(level, scale),
            depth,
        }
    }

    /// Fresh ciphertext metadata for newly encrypted parts.
    pub(crate) fn fresh(&self, parts: Vec<RnsPoly>, level: usize, scale: f64) -> Ciphertext {
        self.output(parts, level, scale, 0)
    }

    /// Copy of `ct` reduced to `level` by dropping primes.
    pub fn drop_to_level(&self, ct: &Ciphertext, level: usize) -> Result<Ciphertext> {
        self.check_owned(ct)?;
        if level > ct.level {
            return Err(HeError::InvalidArgument(format!(
                "cannot raise a ciphertext from level {} to {}",
                ct.level, level
            )));
        }
        let parts = ct.parts.iter().map(|p| p.prefix(level + 1)).collect();
        Ok(self.output(parts, level, ct.scale, ct.depth))
    }

    fn combine(&self, a: &Ciphertext, b: &Ciphertext, subtract: bool) -> Result<Ciphertext> {
        self.check_owned(a)?;
        self.check_owned(b)?;
        Self::check_scales(a, b)?;

        let level = a.level.min(b.level);
        let tables = self.basis.level_tables(level);
        let size = a.size().max(b.size());

        let parts = (0..size)
            .map(|i| {
                let mut out = match a.parts.get(i) {
                    Some(p) => p.prefix(level + 1),
                    None => RnsPoly::zero(self.basis.degree(), level + 1, true),
                };
                if let Some(q) = b.parts.get(i) {
                    if subtract {
                        out.sub_assign(q, &tables);
                    } else {
                        out.add_assign(q, &tables);
                    }
                }
                out
            })
            .collect();

        Ok(self.output(parts, level, a.scale, a.depth.max(b.depth)))
    }

    /// `a + b`. Operands at different levels meet at the lower one.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.combine(a, b, false)
    }

    /// `a - b`.
    pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.combine(a, b, true)
    }

    /// `-a`.
    pub fn negate(&self, a: &Ciphertext) -> Result<Ciphertext> {
        self.check_owned(a)?;
        let tables = self.basis.level_tables(a.level);
        let parts = a
            .parts
            .iter()
            .map(|p| {
                let mut out = p.clone();
                out.negate(&tables);
                out
            })
            .collect();
        Ok(self.output(parts, a.level, a.scale, a.depth))
    }

    /// Tensor product `(a_0 b_0, a_0 b_1 + a_1 b_0, a_1 b_1)`.
    ///
    /// The result has size 3 and scale `scale_a · scale_b`; relinearize and
    /// rescale it before the next multiplication.
    pub fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.check_owned(a)?;
        self.check_owned(b)?;
        if a.size() != 2 || b.size() != 2 {
            return Err(HeError::OperandMismatch(format!(
                "multiply needs size-2 operands, got {} and {}; relinearize first",
                a.size(),
                b.size()
            )));
        }

        let level = a.level.min(b.level);
        if level == 0 {
            return Err(HeError::DepthExceeded(
                "multiply at level 0 leaves no prime to rescale".into(),
            ));
        }
        let scale = a.scale * b.scale;
        let capacity = self.capacity_bits(level, scale);
        if capacity < CAPACITY_SLACK {
            return Err(HeError::DepthExceeded(format!(
                "product scale 2^{:.1} overflows the level-{} modulus by {:.1} bits",
                scale.log2(),
                level,
                -capacity
            )));
        }

        let tables = self.basis.level_tables(level);
        let (a0, a1) = (a.parts[0].prefix(level + 1), a.parts[1].prefix(level + 1));
        let (b0, b1) = (&b.parts[0], &b.parts[1]);

        let d0 = a0.mul(b0, &tables);
        let mut d1 = a0.mul(b1, &tables);
        d1.mul_add_assign(&a1, b0, &tables);
        let d2 = a1.mul(b1, &tables);

        Ok(self.output(vec![d0, d1, d2], level, scale, a.depth.max(b.depth) + 1))
    }

    /// Multiply by plaintext `values` encoded at scale `q_level`, so that a
    /// following [`rescale`](Self::rescale) restores the input scale exactly.
    pub fn multiply_plain(&self, a: &Ciphertext, values: &[f64]) -> Result<Ciphertext> {
        self.check_owned(a)?;
        if a.level == 0 {
            return Err(HeError::DepthExceeded(
                "plaintext multiply at level 0 leaves no prime to rescale".into(),
            ));
        }

        let q_last = self.basis.modulus(a.level) as f64;
        let scale = a.scale * q_last;
        let capacity = self.capacity_bits(a.level, scale);
        if capacity < CAPACITY_SLACK {
            return Err(HeError::DepthExceeded(format!(
                "product scale 2^{:.1} overflows the level-{} modulus",
                scale.log2(),
                a.level
            )));
        }

        let tables = self.basis.level_tables(a.level);
        let coeffs = self.codec.embed(values, q_last)?;
        let mut pt = RnsPoly::from_i128(&coeffs, &tables);
        pt.to_ntt(&tables);

        let parts = a.parts.iter().map(|p| p.mul(&pt, &tables)).collect();
        Ok(self.output(parts, a.level, scale, a.depth + 1))
    }

    /// Reduce a size-3 ciphertext to size 2 with the relinearization key.
    ///
    /// A size-2 input comes back as a copy.
    pub fn relinearize(&self, a: &Ciphertext) -> Result<Ciphertext> {
        self.check_owned(a)?;
        if a.size() == 2 {
            return Ok(a.clone());
        }

        let tables = self.basis.level_tables(a.level);
        let (k0, k1) = key_switch(&a.parts[2], &self.keys.relin, self.basis, a.level);
        let mut c0 = a.parts[0].clone();
        let mut c1 = a.parts[1].clone();
        c0.add_assign(&k0, &tables);
        c1.add_assign(&k1, &tables);

        Ok(self.output(vec![c0, c1], a.level, a.scale, a.depth))
    }

    /// Divide by the last prime of the current level and drop it.
    pub fn rescale(&self, a: &Ciphertext) -> Result<Ciphertext> {
        self.check_owned(a)?;
        if a.level == 0 {
            return Err(HeError::DepthExceeded("no prime left to rescale by".into()));
        }

        let tables = self.basis.level_tables(a.level);
        let q_last = self.basis.modulus(a.level) as f64;
        let parts = a
            .parts
            .iter()
            .map(|p| {
                let mut out = p.clone();
                out.drop_last_rounded(&tables);
                out
            })
            .collect();

        Ok(self.output(parts, a.level - 1, a.scale / q_last, a.depth))
    }

    /// Cyclic left rotation of the slots by `steps`; negative steps rotate
    /// right.
    ///
    /// The rotation is decomposed into power-of-two steps, one key switch
    /// each.
    pub fn rotate(&self, a: &Ciphertext, steps: i64) -> Result<Ciphertext> {
        self.check_owned(a)?;
        if a.size() != 2 {
            return Err(HeError::OperandMismatch(
                "rotate needs a size-2 ciphertext; relinearize first".into(),
            ));
        }

        let slots = self.codec.slot_count();
        let mut remaining = steps.rem_euclid(slots as i64) as usize;
        let mut current = a.clone();
        let mut bit = 1usize;
        while remaining > 0 {
            if remaining & bit != 0 {
                current = self.rotate_power_of_two(&current, bit)?;
                remaining &= !bit;
            }
            bit <<= 1;
        }
        debug!(steps, slots, "rotated ciphertext");
        Ok(current)
    }

    fn rotate_power_of_two(&self, a: &Ciphertext, step: usize) -> Result<Ciphertext> {
        let (g, key) = self
            .keys
            .galois
            .get(step)
            .ok_or_else(|| HeError::Internal(format!("no Galois key for rotation step {}", step)))?;

        let tables = self.basis.level_tables(a.level);
        let mut permuted: Vec<RnsPoly> = a
            .parts
            .iter()
            .map(|p| {
                let mut coeffs = p.clone();
                coeffs.from_ntt(&tables);
                let limbs = (0..coeffs.num_limbs())
                    .map(|i| apply_automorphism_limb(coeffs.limb(i), g, tables[i].modulus()))
                    .collect();
                let mut out = RnsPoly::from_limbs(limbs, false);
                out.to_ntt(&tables);
                out
            })
            .collect();

        let (k0, k1) = key_switch(&permuted[1], key, self.basis, a.level);
        permuted[0].add_assign(&k0, &tables);
        permuted[1] = k1;

        Ok(self.output(permuted, a.level, a.scale, a.depth))
    }
}
