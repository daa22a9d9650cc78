use std::fmt;
use std::iter::Sum;

/// Fixed-point money with 2 decimal places, stored as a scaled integer (minor units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 100;

    pub const ZERO: Amount = Amount(0);

    /// Largest gross accepted for a single earning (one trillion units).
    pub const MAX_GROSS: Amount = Amount(1_000_000_000_000 * Self::SCALE);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `from_units(1_000)` is `1000.00`.
    pub fn from_units(units: i64) -> Self {
        Amount(units * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn abs(self) -> Self {
        Amount(self.0.abs())
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u64;
        let frac = abs % Self::SCALE as u64;
        write!(f, "{sign}{whole}.{frac:02}")
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

/// Platform fee expressed in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeRate(u32);

impl FeeRate {
    const BPS: i128 = 10_000;

    pub fn from_bps(bps: u32) -> Self {
        FeeRate(bps.min(Self::BPS as u32))
    }

    /// `0.15` becomes 1500 bps. Values outside `[0, 1]` are clamped.
    pub fn from_fraction(fraction: f64) -> Self {
        let bps = (fraction.clamp(0.0, 1.0) * Self::BPS as f64).round() as u32;
        FeeRate(bps)
    }

    pub fn bps(self) -> u32 {
        self.0
    }

    /// Fee withheld from `gross`, rounded half-up to the minor unit.
    pub fn fee_on(self, gross: Amount) -> Amount {
        let scaled = gross.0 as i128 * self.0 as i128;
        let fee = (scaled.abs() + Self::BPS / 2) / Self::BPS;
        Amount(scaled.signum() as i64 * fee as i64)
    }

    /// `gross * (1 - rate)`
    pub fn net_of(self, gross: Amount) -> Amount {
        gross - self.fee_on(gross)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
