//! Chain identifiers, amounts and tolerance arithmetic.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parts-per-million denominator for tolerance arithmetic.
const PPM: u128 = 1_000_000;

/// Chain identifier, normalized to upper case (`ETH`, `BSC`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(String);

impl Chain {
    /// Create a chain identifier.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_uppercase())
    }

    /// Identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Amount in the chain's base unit (wei, satoshi, ...).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    /// Wrap a base-unit amount.
    #[must_use]
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    /// Base units.
    #[must_use]
    pub const fn units(self) -> u128 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allowed shortfall between observed and expected amount.
///
/// Stored in parts per million so threshold checks are exact integer
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    ppm: u32,
}

impl Tolerance {
    /// No shortfall allowed.
    pub const EXACT: Self = Self { ppm: 0 };

    /// Tolerance from a fraction in `[0, 1)`, rounded to the nearest ppm.
    ///
    /// # Errors
    ///
    /// Returns an error if the fraction is not finite or outside `[0, 1)`.
    pub fn from_fraction(fraction: f64) -> Result<Self> {
        if !fraction.is_finite() || !(0.0..1.0).contains(&fraction) {
            return Err(Error::Config(format!(
                "tolerance fraction must be in [0, 1), got {fraction}"
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ppm = (fraction * 1_000_000.0).round() as u32;
        Self::from_ppm(ppm)
    }

    /// Tolerance in parts per million.
    ///
    /// # Errors
    ///
    /// Returns an error unless `ppm < 1_000_000`.
    pub fn from_ppm(ppm: u32) -> Result<Self> {
        if u128::from(ppm) >= PPM {
            return Err(Error::Config(format!(
                "tolerance must be below 1_000_000 ppm, got {ppm}"
            )));
        }
        Ok(Self { ppm })
    }

    /// Tolerance as a fraction.
    #[must_use]
    pub fn fraction(self) -> f64 {
        f64::from(self.ppm) / 1_000_000.0
    }

    /// Smallest amount accepted for `expected`: `ceil(expected * (1 - tolerance))`.
    #[must_use]
    pub fn min_acceptable(self, expected: Amount) -> Amount {
        let keep = PPM - u128::from(self.ppm);
        let whole = expected.0 / PPM;
        let rest = expected.0 % PPM;
        // whole * keep <= expected, and the rounded-up remainder never pushes
        // the sum past it.
        Amount(whole * keep + (rest * keep).div_ceil(PPM))
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { ppm: 50_000 }
    }
}

/// Finality policy for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPolicy {
    /// Confirmations before a payment may be confirmed.
    pub required_confirmations: u64,
    /// Depth beyond which the backing block is re-fetched.
    pub reorg_depth: u64,
}

impl ChainPolicy {
    /// Built-in policy for well-known chains; 12/12 for anything else.
    #[must_use]
    pub fn builtin(chain: &str) -> Self {
        match chain.to_ascii_uppercase().as_str() {
            "BSC" => Self {
                required_confirmations: 6,
                reorg_depth: 6,
            },
            _ => Self {
                required_confirmations: 12,
                reorg_depth: 12,
            },
        }
    }
}
