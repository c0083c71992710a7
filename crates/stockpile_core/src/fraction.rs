//! # Fraction Arithmetic
//!
//! **CRITICAL: NO FLOATING POINT IN QUANTITY ACCOUNTING**
//!
//! This module provides exact rational quantities for all storage
//! calculations. Splitting a bucket of fluid across seventeen tanks and
//! merging it back must reproduce the original amount bit-for-bit.
//!
//! ## Representation
//!
//! A value is stored as `whole + numerator / divisor` with the invariants:
//!
//! - `1 <= divisor <= MAX_DIVISOR`
//! - `|numerator| < divisor`
//! - `whole` and `numerator` never have opposite signs
//! - zero is the canonical `(0, 0, 1)`
//!
//! Divisors are granularities (a bucket is 1, a bottle 1/3, a drop 1/81000)
//! and are capped at [`MAX_DIVISOR`] so that every intermediate fits in
//! `i128` with room to spare. Mixing two coprime granularities whose common
//! divisor would exceed the cap truncates toward zero at the cap - "supply
//! at most what is exactly available" semantics.
//!
//! ## Two flavors
//!
//! - [`Fraction`]: immutable, `Copy` - snapshots, wire values, rollback state.
//! - [`MutableFraction`]: in-place arithmetic scratchpad owned by exactly one
//!   store at a time. Never shared across threads.

use serde::{Deserialize, Serialize};

use crate::error::{StockpileError, StockpileResult};

/// Largest permitted divisor. Granularities are small in practice; the cap
/// guarantees overflow-free `i128` intermediates everywhere.
pub const MAX_DIVISOR: i64 = u32::MAX as i64;

/// Greatest common divisor, always non-negative.
const fn gcd(mut a: i128, mut b: i128) -> i128 {
    if a < 0 {
        a = -a;
    }
    if b < 0 {
        b = -b;
    }
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Normalizes a fractional part, returning `(carry, numerator, divisor)`
/// where the carry is the extracted whole units (truncated toward zero).
///
/// If the reduced divisor still exceeds [`MAX_DIVISOR`], the value is
/// re-expressed at the cap, truncating toward zero.
fn normalize_frac(mut numerator: i128, mut divisor: i128) -> (i64, i64, i64) {
    debug_assert!(divisor >= 1);
    let carry = numerator / divisor;
    numerator %= divisor;
    let g = gcd(numerator, divisor);
    if g > 1 {
        numerator /= g;
        divisor /= g;
    }
    if divisor > i128::from(MAX_DIVISOR) {
        numerator = numerator * i128::from(MAX_DIVISOR) / divisor;
        divisor = i128::from(MAX_DIVISOR);
        let g = gcd(numerator, divisor);
        if g > 1 {
            numerator /= g;
            divisor /= g;
        }
    }
    if numerator == 0 {
        divisor = 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    let reduced = (clamp_i64(carry), numerator as i64, divisor as i64);
    reduced
}

/// Saturating `i128` to `i64` conversion.
#[allow(clippy::cast_possible_truncation)]
const fn clamp_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}

/// Raw serialized form of a fraction. Deserialization goes through
/// [`Fraction::try_from`] so persisted data is re-validated and
/// re-normalized on load.
#[derive(Serialize, Deserialize)]
struct RawFraction {
    whole: i64,
    numerator: i64,
    divisor: i64,
}

// =============================================================================
// Fraction - Immutable
// =============================================================================

/// An exact rational quantity: `whole + numerator / divisor`.
///
/// Always normalized (see module docs). [`Fraction::MAX`] is a sentinel
/// meaning "unbounded"; arithmetic saturates at it rather than wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFraction", into = "RawFraction")]
pub struct Fraction {
    whole: i64,
    numerator: i64,
    divisor: i64,
}

impl Fraction {
    /// Zero, the canonical `(0, 0, 1)`.
    pub const ZERO: Self = Self {
        whole: 0,
        numerator: 0,
        divisor: 1,
    };

    /// One whole unit.
    pub const ONE: Self = Self {
        whole: 1,
        numerator: 0,
        divisor: 1,
    };

    /// Sentinel meaning "unbounded". Compares greater than every real
    /// quantity; adding to it or subtracting from it yields itself.
    pub const MAX: Self = Self {
        whole: i64::MAX,
        numerator: 0,
        divisor: 1,
    };

    /// Creates a fraction from a whole number of units.
    #[inline]
    #[must_use]
    pub const fn of_whole(whole: i64) -> Self {
        Self {
            whole,
            numerator: 0,
            divisor: 1,
        }
    }

    /// Creates a fraction from `numerator / divisor`, normalizing.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if `divisor` is below one
    /// or above [`MAX_DIVISOR`].
    pub fn new(numerator: i64, divisor: i64) -> StockpileResult<Self> {
        check_divisor(divisor)?;
        let (whole, numerator, divisor) = normalize_frac(i128::from(numerator), i128::from(divisor));
        Ok(Self {
            whole,
            numerator,
            divisor,
        })
    }

    /// Creates a fraction from `whole + numerator / divisor`, normalizing.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if `divisor` is below one
    /// or above [`MAX_DIVISOR`].
    pub fn of(whole: i64, numerator: i64, divisor: i64) -> StockpileResult<Self> {
        check_divisor(divisor)?;
        Ok(Self::from_parts(whole, numerator, divisor))
    }

    /// Normalizes pre-validated parts. Internal: `divisor` must already be
    /// in range.
    pub(crate) fn from_parts(whole: i64, numerator: i64, divisor: i64) -> Self {
        let (carry, numerator, divisor) = normalize_frac(i128::from(numerator), i128::from(divisor));
        let mut whole = whole.saturating_add(carry);
        let mut numerator = numerator;
        // Re-align signs: whole and numerator must not disagree.
        if whole > 0 && numerator < 0 {
            whole -= 1;
            numerator += divisor;
        } else if whole < 0 && numerator > 0 {
            whole += 1;
            numerator -= divisor;
        }
        let divisor = if numerator == 0 { 1 } else { divisor };
        Self {
            whole,
            numerator,
            divisor,
        }
    }

    /// Returns the whole-unit part (truncated toward zero).
    #[inline]
    #[must_use]
    pub const fn whole(self) -> i64 {
        self.whole
    }

    /// Returns the numerator of the fractional part.
    #[inline]
    #[must_use]
    pub const fn numerator(self) -> i64 {
        self.numerator
    }

    /// Returns the divisor of the fractional part (always at least one).
    #[inline]
    #[must_use]
    pub const fn divisor(self) -> i64 {
        self.divisor
    }

    /// Returns true if this value is exactly zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.whole == 0 && self.numerator == 0
    }

    /// Returns true if this value is below zero.
    #[inline]
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.whole < 0 || self.numerator < 0
    }

    /// Returns true if this is the unbounded sentinel.
    #[inline]
    #[must_use]
    pub const fn is_max(self) -> bool {
        self.whole == i64::MAX && self.numerator == 0
    }

    /// Exact sum. Saturates at [`Fraction::MAX`].
    #[must_use]
    pub fn add(self, rhs: Self) -> Self {
        if self.is_max() || rhs.is_max() {
            return Self::MAX;
        }
        let numerator = i128::from(self.numerator) * i128::from(rhs.divisor)
            + i128::from(rhs.numerator) * i128::from(self.divisor);
        let divisor = i128::from(self.divisor) * i128::from(rhs.divisor);
        let (carry, numerator, divisor) = normalize_frac(numerator, divisor);
        let whole = self.whole.saturating_add(rhs.whole).saturating_add(carry);
        Self::from_parts(whole, numerator, divisor)
    }

    /// Exact difference. The unbounded sentinel stays unbounded.
    #[must_use]
    pub fn subtract(self, rhs: Self) -> Self {
        if self.is_max() {
            return Self::MAX;
        }
        self.add(rhs.negate())
    }

    /// Multiplies by a whole-number scalar.
    #[must_use]
    pub fn multiply(self, scalar: i64) -> Self {
        if self.is_max() {
            return Self::MAX;
        }
        let whole = clamp_i64(i128::from(self.whole) * i128::from(scalar));
        let numerator = i128::from(self.numerator) * i128::from(scalar);
        let (carry, numerator, divisor) = normalize_frac(numerator, i128::from(self.divisor));
        Self::from_parts(whole.saturating_add(carry), numerator, divisor)
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self {
            whole: self.whole.saturating_neg(),
            numerator: -self.numerator,
            divisor: self.divisor,
        }
    }

    /// Absolute value.
    #[must_use]
    pub fn abs(self) -> Self {
        if self.is_negative() {
            self.negate()
        } else {
            self
        }
    }

    /// Smallest whole number greater than or equal to this value.
    #[inline]
    #[must_use]
    pub const fn ceil(self) -> i64 {
        if self.numerator > 0 {
            self.whole + 1
        } else {
            self.whole
        }
    }

    /// Number of `1/divisor` units in this value, truncated toward zero.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if `divisor` is out of
    /// range.
    pub fn to_units(self, divisor: i64) -> StockpileResult<i64> {
        check_divisor(divisor)?;
        let whole_units = i128::from(self.whole) * i128::from(divisor);
        let frac_units = i128::from(self.numerator) * i128::from(divisor) / i128::from(self.divisor);
        Ok(clamp_i64(whole_units + frac_units))
    }

    /// Re-expresses this value at the given granularity, truncating toward
    /// zero. `round_down(3)` of `1/2` is `1/3`.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if `divisor` is out of
    /// range.
    pub fn round_down(self, divisor: i64) -> StockpileResult<Self> {
        let units = self.to_units(divisor)?;
        Self::new(units, divisor)
    }

    /// Returns the smaller of two values.
    #[must_use]
    pub fn min(self, rhs: Self) -> Self {
        if self <= rhs {
            self
        } else {
            rhs
        }
    }

    /// Encodes as three little-endian `i64` fields: whole, numerator,
    /// divisor.
    #[must_use]
    pub fn to_wire_bytes(self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0..8].copy_from_slice(&self.whole.to_le_bytes());
        buf[8..16].copy_from_slice(&self.numerator.to_le_bytes());
        buf[16..24].copy_from_slice(&self.divisor.to_le_bytes());
        buf
    }

    /// Decodes the wire form produced by [`Fraction::to_wire_bytes`],
    /// re-validating and re-normalizing.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if the divisor field is
    /// out of range.
    pub fn from_wire_bytes(buf: &[u8; 24]) -> StockpileResult<Self> {
        let whole = i64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
        let numerator = i64::from_le_bytes(buf[8..16].try_into().unwrap_or_default());
        let divisor = i64::from_le_bytes(buf[16..24].try_into().unwrap_or_default());
        Self::of(whole, numerator, divisor)
    }
}

/// Validates a caller-supplied divisor.
fn check_divisor(divisor: i64) -> StockpileResult<()> {
    if divisor < 1 || divisor > MAX_DIVISOR {
        return Err(StockpileError::invalid_argument(format!(
            "divisor {divisor} outside 1..={MAX_DIVISOR}"
        )));
    }
    Ok(())
}

impl Default for Fraction {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sign alignment makes (whole, fractional part) lexicographic.
        self.whole.cmp(&other.whole).then_with(|| {
            let lhs = i128::from(self.numerator) * i128::from(other.divisor);
            let rhs = i128::from(other.numerator) * i128::from(self.divisor);
            lhs.cmp(&rhs)
        })
    }
}

impl TryFrom<RawFraction> for Fraction {
    type Error = StockpileError;

    fn try_from(raw: RawFraction) -> StockpileResult<Self> {
        Self::of(raw.whole, raw.numerator, raw.divisor)
    }
}

impl From<Fraction> for RawFraction {
    fn from(f: Fraction) -> Self {
        Self {
            whole: f.whole,
            numerator: f.numerator,
            divisor: f.divisor,
        }
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.numerator == 0 {
            write!(f, "{}", self.whole)
        } else {
            write!(f, "{} {}/{}", self.whole, self.numerator, self.divisor)
        }
    }
}

// =============================================================================
// MutableFraction - In-Place Scratchpad
// =============================================================================

/// In-place rational arithmetic for a store's live content.
///
/// Owned by exactly one store instance; [`MutableFraction::snapshot`]
/// produces the immutable [`Fraction`] that crosses every boundary.
/// Subtracting below zero saturates at zero (callers pre-clamp; the debug
/// assertion catches the ones that forgot).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutableFraction {
    value: Fraction,
}

impl MutableFraction {
    /// A new scratchpad holding zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value as an immutable fraction.
    #[inline]
    #[must_use]
    pub const fn snapshot(&self) -> Fraction {
        self.value
    }

    /// Overwrites the current value.
    #[inline]
    pub fn set(&mut self, value: Fraction) {
        self.value = value;
    }

    /// Returns true if the current value is exactly zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Adds a fraction in place.
    #[inline]
    pub fn add(&mut self, rhs: Fraction) {
        self.value = self.value.add(rhs);
    }

    /// Adds `count` units of size `1/divisor` in place. The divisor must
    /// already be validated by the caller.
    pub fn add_units(&mut self, count: i64, divisor: i64) {
        debug_assert!((1..=MAX_DIVISOR).contains(&divisor));
        self.value = self.value.add(Fraction::from_parts(0, count, divisor));
    }

    /// Subtracts a fraction in place, saturating at zero.
    ///
    /// Going below zero is a caller contract violation: storage logic
    /// pre-clamps every removal to what is present.
    pub fn subtract(&mut self, rhs: Fraction) {
        let next = self.value.subtract(rhs);
        debug_assert!(!next.is_negative(), "mutable fraction underflow");
        self.value = if next.is_negative() {
            Fraction::ZERO
        } else {
            next
        };
    }

    /// Subtracts `count` units of size `1/divisor` in place, saturating at
    /// zero. The divisor must already be validated by the caller.
    pub fn subtract_units(&mut self, count: i64, divisor: i64) {
        debug_assert!((1..=MAX_DIVISOR).contains(&divisor));
        self.subtract(Fraction::from_parts(0, count, divisor));
    }

    /// Multiplies by a whole-number scalar in place.
    #[inline]
    pub fn multiply(&mut self, scalar: i64) {
        self.value = self.value.multiply(scalar);
    }

    /// Number of `1/divisor` units currently held, truncated toward zero.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if `divisor` is out of
    /// range.
    pub fn to_units(&self, divisor: i64) -> StockpileResult<i64> {
        self.value.to_units(divisor)
    }

    /// Truncates the current value to the given granularity in place.
    ///
    /// # Errors
    ///
    /// Returns [`StockpileError::InvalidArgument`] if `divisor` is out of
    /// range.
    pub fn round_down(&mut self, divisor: i64) -> StockpileResult<()> {
        self.value = self.value.round_down(divisor)?;
        Ok(())
    }
}

impl From<Fraction> for MutableFraction {
    fn from(value: Fraction) -> Self {
        Self { value }
    }
}
