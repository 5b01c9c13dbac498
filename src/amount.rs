use std::fmt;

/// Fixed-point decimal with 4 internal decimal places, stored as a scaled integer.
///
/// Arithmetic stays exact on the scaled value; rounding to the 2 decimal
/// places of the reporting boundary happens only in [`Amount::round2`] and
/// [`fmt::Display`], so repeated derivations never compound rounding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 10_000;
    /// Scaled units per cent, the reporting granularity.
    const CENT: i64 = 100;

    pub const ZERO: Amount = Amount(0);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `Amount::from_units(50)` is 50.00.
    pub fn from_units(value: i64) -> Self {
        Amount(value * Self::SCALE)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Round half-up to 2 decimal places. Boundary use only.
    pub fn round2(&self) -> Self {
        let half = Self::CENT / 2;
        let adjusted = if self.0 >= 0 {
            self.0 + half
        } else {
            self.0 - half
        };
        Amount((adjusted / Self::CENT) * Self::CENT)
    }

    /// Fraction of this amount expressed in basis points (100 bps = 1%),
    /// rounded half-up at the cent.
    pub fn percent_of(&self, rate_bps: u32) -> Self {
        let scaled = self.0 as i128 * rate_bps as i128 / 10_000;
        Amount(scaled as i64).round2()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = self.round2().0;
        let sign = if rounded < 0 { "-" } else { "" };
        let abs = rounded.abs();
        let whole = abs / Self::SCALE;
        let cents = (abs % Self::SCALE) / Self::CENT;
        write!(f, "{sign}{whole}.{cents:02}")
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

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_scaled_preserves_value() {
        let amount = Amount::from_scaled(123_456);
        assert_eq!(amount, Amount(123_456));
    }

    #[test]
    fn from_float_converts_correctly() {
        assert_eq!(Amount::from_float(100.0), Amount::from_scaled(1_000_000));
        assert_eq!(Amount::from_float(1.5), Amount::from_scaled(15_000));
        assert_eq!(Amount::from_float(0.0001), Amount::from_scaled(1));
    }

    #[test]
    fn from_units_is_whole_currency() {
        assert_eq!(Amount::from_units(50), Amount::from_float(50.0));
    }

    #[test]
    fn from_float_handles_negative() {
        assert_eq!(Amount::from_float(-50.25), Amount::from_scaled(-502_500));
    }

    #[test]
    fn display_rounds_to_two_places() {
        assert_eq!(Amount::from_scaled(1_000_000).to_string(), "100.00");
        assert_eq!(Amount::from_scaled(15_000).to_string(), "1.50");
        assert_eq!(Amount::from_scaled(12_345).to_string(), "1.23");
        assert_eq!(Amount::from_scaled(12_350).to_string(), "1.24");
        assert_eq!(Amount::from_scaled(0).to_string(), "0.00");
    }

    #[test]
    fn display_formats_negative() {
        assert_eq!(Amount::from_scaled(-502_500).to_string(), "-50.25");
        assert_eq!(Amount::from_scaled(-12_350).to_string(), "-1.24");
    }

    #[test]
    fn round2_is_half_up_in_both_directions() {
        assert_eq!(
            Amount::from_scaled(12_349).round2(),
            Amount::from_scaled(12_300)
        );
        assert_eq!(
            Amount::from_scaled(12_350).round2(),
            Amount::from_scaled(12_400)
        );
        assert_eq!(
            Amount::from_scaled(-12_350).round2(),
            Amount::from_scaled(-12_400)
        );
    }

    #[test]
    fn percent_of_basis_points() {
        // 10% of 50.00 = 5.00
        assert_eq!(
            Amount::from_units(50).percent_of(1_000),
            Amount::from_units(5)
        );
        // 10% of 20.00 = 2.00
        assert_eq!(
            Amount::from_units(20).percent_of(1_000),
            Amount::from_units(2)
        );
        // 2.5% of 19.99 = 0.499750 -> 0.50
        assert_eq!(
            Amount::from_float(19.99).percent_of(250),
            Amount::from_float(0.50)
        );
        assert_eq!(Amount::from_units(100).percent_of(0), Amount::ZERO);
    }

    #[test]
    fn arithmetic() {
        let a = Amount::from_scaled(100);
        let b = Amount::from_scaled(30);
        assert_eq!(a + b, Amount::from_scaled(130));
        assert_eq!(a - b, Amount::from_scaled(70));
        assert_eq!(-a, Amount::from_scaled(-100));

        let mut c = a;
        c += b;
        assert_eq!(c, Amount::from_scaled(130));
        c -= a;
        assert_eq!(c, Amount::from_scaled(30));
    }

    #[test]
    fn sum_over_iterator() {
        let total: Amount = [10, 20, -5].into_iter().map(Amount::from_scaled).sum();
        assert_eq!(total, Amount::from_scaled(25));
    }

    #[test]
    fn ordering() {
        assert!(Amount::from_scaled(-100) < Amount::ZERO);
        assert!(Amount::ZERO < Amount::from_scaled(100));
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Amount::default(), Amount::ZERO);
    }
}
