//! CKKS slot codec.
//!
//! Maps a vector of real values onto the coefficients of a real polynomial
//! `m(X) ∈ Z[X]/(X^n + 1)` through the canonical embedding, and back.
//!
//! # Slot Layout
//!
//! With `ζ = exp(iπ/n)` a primitive 2n-th root of unity, slot `j` holds
//! `m(ζ^{5^j}) / Δ` for `j < n/2`. The remaining roots are the conjugates
//! `ζ^{-5^j}`, so real inputs give a real polynomial:
//!
//! ```text
//! m_i = round( (2Δ/n) · Σ_j z_j · cos(π · 5^j · i / n) )
//! z_j = (1/Δ) · Σ_i m_i · cos(π · 5^j · i / n)
//! ```
//!
//! The Galois automorphism `X → X^{5^k}` then rotates the slot vector left by
//! `k`, which is what the rotation keys rely on.
//!
//! Both directions are O(n²/2) dot products over a precomputed cosine table,
//! parallelized with rayon.

use rayon::prelude::*;

use crate::error::{HeError, Result};
use crate::math::galois::ROTATION_GENERATOR;

/// Encoder and decoder for one ring degree and default scale.
#[derive(Debug, Clone)]
pub struct Codec {
    degree: usize,
    scale_bits: u32,
    base_prime: u64,
    /// `5^j mod 2n` for every slot
    rotation: Vec<usize>,
    /// `cos(π·k/n)` for `k < 2n`
    cos_table: Vec<f64>,
}

impl Codec {
    /// Create a codec for ring degree `degree`.
    ///
    /// `base_prime` is the last prime left after every rescale and bounds the
    /// values a fresh encoding may hold.
    pub fn new(degree: usize, scale_bits: u32, base_prime: u64) -> Self {
        debug_assert!(degree.is_power_of_two());
        let two_n = 2 * degree;

        let mut rotation = Vec::with_capacity(degree / 2);
        let mut r = 1usize;
        for _ in 0..degree / 2 {
            rotation.push(r);
            r = (r * ROTATION_GENERATOR) % two_n;
        }

        let cos_table = (0..two_n)
            .map(|k| (std::f64::consts::PI * k as f64 / degree as f64).cos())
            .collect();

        Self {
            degree,
            scale_bits,
            base_prime,
            rotation,
            cos_table,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of real slots (n/2).
    pub fn slot_count(&self) -> usize {
        self.degree / 2
    }

    /// Default encoding scale Δ.
    pub fn scale(&self) -> f64 {
        2f64.powi(self.scale_bits as i32)
    }

    /// Largest magnitude encodable at the default scale.
    pub fn max_value(&self) -> f64 {
        self.max_value_at(self.scale())
    }

    /// Largest magnitude encodable at `scale`: `q0 / (2·scale)`.
    pub fn max_value_at(&self, scale: f64) -> f64 {
        self.base_prime as f64 / (2.0 * scale)
    }

    /// Guaranteed round-trip accuracy at the default scale.
    pub fn precision(&self) -> f64 {
        2f64.powi(-((self.scale_bits / 2) as i32))
    }

    /// Check `values` fit into one plaintext at `scale`.
    pub fn check_range(&self, values: &[f64], scale: f64) -> Result<()> {
        if values.len() > self.slot_count() {
            return Err(HeError::Range(format!(
                "{} values exceed the {} available slots",
                values.len(),
                self.slot_count()
            )));
        }
        let max = self.max_value_at(scale);
        for (i, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(HeError::Range(format!("value {} at index {} is not finite", v, i)));
            }
            if v.abs() > max {
                return Err(HeError::Range(format!(
                    "|{}| at index {} exceeds the encodable maximum {}",
                    v, i, max
                )));
            }
        }
        Ok(())
    }

    /// Scaled integer coefficients encoding `values` (missing slots are zero).
    pub fn embed(&self, values: &[f64], scale: f64) -> Result<Vec<i128>> {
        self.check_range(values, scale)?;
        let mask = 2 * self.degree - 1;
        let factor = 2.0 * scale / self.degree as f64;

        let coeffs = (0..self.degree)
            .into_par_iter()
            .map(|i| {
                let sum: f64 = values
                    .iter()
                    .zip(&self.rotation)
                    .map(|(&z, &rot)| z * self.cos_table[(rot * i) & mask])
                    .sum();
                (factor * sum).round() as i128
            })
            .collect();
        Ok(coeffs)
    }

    /// Slot values of a polynomial with real (centered) coefficients at `scale`.
    pub fn project(&self, coeffs: &[f64], scale: f64) -> Vec<f64> {
        debug_assert_eq!(coeffs.len(), self.degree);
        let mask = 2 * self.degree - 1;

        self.rotation
            .par_iter()
            .map(|&rot| {
                let sum: f64 = coeffs
                    .iter()
                    .enumerate()
                    .map(|(i, &m)| m * self.cos_table[(rot * i) & mask])
                    .sum();
                sum / scale
            })
            .collect()
    }
}
