//! CKKS plaintext and ciphertext types.

use crate::context::ContextId;
use crate::math::RnsPoly;

/// Encoded slot batch: `m(X)` at `level` in NTT form, scaled by `scale`.
///
/// Plaintexts are transient; they are created by the codec and consumed by
/// encryption or plaintext multiplication.
#[derive(Clone)]
pub struct Plaintext {
    pub(crate) poly: RnsPoly,
    pub(crate) level: usize,
    pub(crate) scale: f64,
    pub(crate) context_id: ContextId,
}

impl Plaintext {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }
}

impl std::fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plaintext")
            .field("level", &self.level)
            .field("scale_bits", &self.scale.log2())
            .field("context_id", &self.context_id)
            .finish()
    }
}

/// CKKS ciphertext `(c_0, c_1[, c_2])` decrypting to `c_0 + c_1·s [+ c_2·s²]`.
///
/// # Fields
///
/// * `parts` - Two or three RNS polynomials in NTT form over `q_0..q_level`
/// * `level` - Remaining modulus level; 0 means only the base prime is left
/// * `scale` - Current fixed-point scale of the encrypted values
/// * `capacity_bits` - Headroom left before the scaled message outgrows the
///   modulus; the noise budget estimate reported to callers
/// * `depth` - Multiplications on the longest path that produced this value
///
/// Operations never mutate a ciphertext; they return a new one.
#[derive(Clone)]
pub struct Ciphertext {
    pub(crate) parts: Vec<RnsPoly>,
    pub(crate) level: usize,
    pub(crate) scale: f64,
    pub(crate) context_id: ContextId,
    pub(crate) capacity_bits: f64,
    pub(crate) depth: usize,
}

impl Ciphertext {
    /// Number of polynomial components (2, or 3 before relinearization).
    pub fn size(&self) -> usize {
        self.parts.len()
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Noise budget estimate in bits.
    pub fn capacity_bits(&self) -> f64 {
        self.capacity_bits
    }

    /// Multiplicative depth consumed so far.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl std::fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ciphertext")
            .field("size", &self.size())
            .field("level", &self.level)
            .field("scale_bits", &self.scale.log2())
            .field("capacity_bits", &self.capacity_bits)
            .field("depth", &self.depth)
            .field("context_id", &self.context_id)
            .finish()
    }
}
