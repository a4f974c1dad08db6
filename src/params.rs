//! CKKS parameter sets and their validation.
//!
//! The coefficient modulus chain is given SEAL-style as a list of prime bit
//! sizes `[base, rescale…, special]`: the base prime holds the final result,
//! each rescale prime is consumed by one rescale, and the special prime only
//! appears in key-switching keys. Maximum multiplicative depth is therefore
//! `len - 2`.
//!
//! Security bounds follow the homomorphic encryption standard table for
//! ternary secrets (max log2 of the full modulus `QP` per ring degree).

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{param_err, Result};
use crate::math::DEFAULT_SIGMA;

/// Smallest and largest supported prime sizes in bits
pub const MIN_PRIME_BITS: u32 = 20;
pub const MAX_PRIME_BITS: u32 = 60;

/// Supported ring degrees
pub const MIN_DEGREE: usize = 64;
pub const MAX_DEGREE: usize = 32768;

/// Largest admitted Gaussian standard deviation
pub const MAX_SIGMA: f64 = 64.0;

/// Security level for parameter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// 128-bit classical security (recommended)
    #[default]
    Bits128,
    /// 192-bit classical security
    Bits192,
    /// 256-bit classical security (conservative)
    Bits256,
    /// No security bound. Only for tests and benchmarks.
    None,
}

impl SecurityLevel {
    /// Largest total modulus size (bits) admitted at this level for `degree`.
    ///
    /// `None` means the degree is outside the table.
    pub fn max_modulus_bits(self, degree: usize) -> Option<u32> {
        let column = match self {
            SecurityLevel::Bits128 => 0,
            SecurityLevel::Bits192 => 1,
            SecurityLevel::Bits256 => 2,
            SecurityLevel::None => return Some(u32::MAX),
        };
        let row: [u32; 3] = match degree {
            1024 => [27, 19, 14],
            2048 => [54, 37, 29],
            4096 => [109, 75, 58],
            8192 => [218, 152, 118],
            16384 => [438, 305, 237],
            32768 => [881, 611, 476],
            _ => return None,
        };
        Some(row[column])
    }
}

/// Configuration of one HE context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeConfig {
    /// Ring degree n (power of two). Slot count is n/2.
    pub poly_degree: usize,

    /// Prime bit sizes: base, rescale primes, special prime.
    pub coeff_modulus_bits: Vec<u32>,

    /// log2 of the encoding scale
    pub scale_bits: u32,

    /// Target security level
    pub security_level: SecurityLevel,

    /// Standard deviation for Gaussian error sampling
    pub sigma: f64,

    /// Seed for deterministic key generation. Keys come from OS entropy when
    /// unset.
    pub seed: Option<u64>,
}

impl HeConfig {
    /// 128-bit secure, depth 2, n = 8192.
    pub fn secure_128_depth2() -> Self {
        Self {
            poly_degree: 8192,
            coeff_modulus_bits: vec![60, 40, 40, 60],
            scale_bits: 40,
            security_level: SecurityLevel::Bits128,
            sigma: DEFAULT_SIGMA,
            seed: None,
        }
    }

    /// 128-bit secure, depth 1, n = 4096. Values are limited to |v| < 128.
    pub fn depth_one_4096() -> Self {
        Self {
            poly_degree: 4096,
            coeff_modulus_bits: vec![38, 30, 40],
            scale_bits: 30,
            security_level: SecurityLevel::Bits128,
            sigma: DEFAULT_SIGMA,
            seed: None,
        }
    }

    /// Depth-2 chain at a small, insecure degree for tests.
    pub fn insecure_test(poly_degree: usize) -> Self {
        Self {
            poly_degree,
            security_level: SecurityLevel::None,
            ..Self::secure_128_depth2()
        }
    }

    /// Number of rescales the chain supports.
    pub fn depth(&self) -> usize {
        self.coeff_modulus_bits.len().saturating_sub(2)
    }

    pub fn slot_count(&self) -> usize {
        self.poly_degree / 2
    }

    /// Default encoding scale Δ = 2^scale_bits
    pub fn scale(&self) -> f64 {
        2f64.powi(self.scale_bits as i32)
    }

    /// Total bits of `Q·P`.
    pub fn total_modulus_bits(&self) -> u32 {
        self.coeff_modulus_bits.iter().sum()
    }

    /// Check the configuration is well-formed and meets its security level.
    pub fn validate(&self) -> Result<()> {
        let n = self.poly_degree;
        if !n.is_power_of_two() || !(MIN_DEGREE..=MAX_DEGREE).contains(&n) {
            return Err(param_err!(
                "poly_degree must be a power of two in [{}, {}], got {}",
                MIN_DEGREE,
                MAX_DEGREE,
                n
            ));
        }

        let bits = &self.coeff_modulus_bits;
        if bits.len() < 2 {
            return Err(param_err!(
                "coeff_modulus_bits needs a base and a special prime, got {} entries",
                bits.len()
            ));
        }
        if let Some(&b) = bits
            .iter()
            .find(|&&b| !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(&b))
        {
            return Err(param_err!(
                "prime size {} bits outside [{}, {}]",
                b,
                MIN_PRIME_BITS,
                MAX_PRIME_BITS
            ));
        }

        let special = bits[bits.len() - 1];
        let largest = bits[..bits.len() - 1].iter().copied().max().unwrap_or(0);
        if special < largest {
            return Err(param_err!(
                "special prime ({} bits) must be at least as large as every other prime ({} bits)",
                special,
                largest
            ));
        }

        let base = bits[0];
        if self.scale_bits < 10 || self.scale_bits > base.saturating_sub(2) {
            return Err(param_err!(
                "scale_bits {} must lie in [10, {}] for a {}-bit base prime",
                self.scale_bits,
                base.saturating_sub(2),
                base
            ));
        }
        if let Some(&b) = bits[1..bits.len() - 1]
            .iter()
            .find(|&&b| b.abs_diff(self.scale_bits) > 10)
        {
            return Err(param_err!(
                "rescale prime of {} bits is too far from the {}-bit scale",
                b,
                self.scale_bits
            ));
        }

        if !(self.sigma > 0.0 && self.sigma <= MAX_SIGMA) {
            return Err(param_err!(
                "sigma must lie in (0, {}], got {}",
                MAX_SIGMA,
                self.sigma
            ));
        }

        self.validate_security()
    }

    fn validate_security(&self) -> Result<()> {
        let total = self.total_modulus_bits();
        match self.security_level.max_modulus_bits(self.poly_degree) {
            None => Err(param_err!(
                "poly_degree {} is not covered by the {:?} security table (need 1024..=32768)",
                self.poly_degree,
                self.security_level
            )),
            Some(max) if total > max => Err(param_err!(
                "total modulus of {} bits exceeds {} bits allowed for {:?} at n = {}",
                total,
                max,
                self.security_level,
                self.poly_degree
            )),
            Some(_) => Ok(()),
        }
    }

    /// Check the chain supports `required` multiplicative levels.
    pub fn validate_depth(&self, required: usize) -> Result<()> {
        if self.depth() < required {
            return Err(param_err!(
                "modulus chain supports depth {} but the operation graph needs {}",
                self.depth(),
                required
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Save this configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

impl Default for HeConfig {
    fn default() -> Self {
        Self::secure_128_depth2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeError;

    #[test]
    fn test_presets_valid() {
        assert!(HeConfig::default().validate().is_ok());
        assert!(HeConfig::depth_one_4096().validate().is_ok());
        assert!(HeConfig::insecure_test(1024).validate().is_ok());
        assert_eq!(HeConfig::default().depth(), 2);
        assert_eq!(HeConfig::depth_one_4096().depth(), 1);
    }

    #[test]
    fn test_insecure_modulus_rejected() {
        let config = HeConfig {
            poly_degree: 4096,
            ..HeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HeError::Parameter(_)));
        assert!(err.to_string().contains("exceeds 109"));
    }

    #[test]
    fn test_higher_levels_are_stricter() {
        let config = HeConfig {
            security_level: SecurityLevel::Bits256,
            ..HeConfig::default()
        };
        assert!(config.validate().is_err());

        let small = HeConfig {
            poly_degree: 512,
            ..HeConfig::default()
        };
        assert!(small.validate().is_err());
    }

    #[test]
    fn test_malformed_chains_rejected() {
        let base = HeConfig::insecure_test(1024);

        let short = HeConfig {
            coeff_modulus_bits: vec![60],
            ..base.clone()
        };
        assert!(short.validate().is_err());

        let small_special = HeConfig {
            coeff_modulus_bits: vec![60, 40, 40],
            ..base.clone()
        };
        assert!(small_special.validate().is_err());

        let huge_prime = HeConfig {
            coeff_modulus_bits: vec![61, 40, 61],
            ..base.clone()
        };
        assert!(huge_prime.validate().is_err());

        let bad_scale = HeConfig {
            scale_bits: 59,
            ..base.clone()
        };
        assert!(bad_scale.validate().is_err());

        let bad_degree = HeConfig {
            poly_degree: 1000,
            ..base
        };
        assert!(bad_degree.validate().is_err());
    }

    #[test]
    fn test_out_of_range_scalars_rejected() {
        let huge_scale = HeConfig {
            coeff_modulus_bits: vec![60, 60],
            scale_bits: u32::MAX,
            ..HeConfig::insecure_test(256)
        };
        assert!(matches!(huge_scale.validate(), Err(HeError::Parameter(_))));

        for sigma in [1e10, f64::INFINITY, f64::NAN, -1.0, MAX_SIGMA * 2.0] {
            let config = HeConfig {
                sigma,
                ..HeConfig::insecure_test(256)
            };
            assert!(matches!(config.validate(), Err(HeError::Parameter(_))), "sigma {}", sigma);
        }

        let widest = HeConfig {
            sigma: MAX_SIGMA,
            ..HeConfig::insecure_test(256)
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_depth_requirement() {
        let config = HeConfig::depth_one_4096();
        assert!(config.validate_depth(1).is_ok());
        let err = config.validate_depth(2).unwrap_err();
        assert!(err.to_string().contains("needs 2"));
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("he.json");

        let config = HeConfig {
            seed: Some(99),
            ..HeConfig::insecure_test(2048)
        };
        config.save(&path).unwrap();
        assert_eq!(HeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HeConfig =
            serde_json::from_str(r#"{"poly_degree": 16384, "security_level": "bits192"}"#).unwrap();
        assert_eq!(config.poly_degree, 16384);
        assert_eq!(config.security_level, SecurityLevel::Bits192);
        assert_eq!(config.coeff_modulus_bits, vec![60, 40, 40, 60]);
        assert!(config.validate().is_ok());
    }
}
