use std::fmt::{self, Display};
use std::io::prelude::*;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Numeric;

use models::Percent;

const CENTS_IN_UNIT: u64 = 100;
const FIAT_PRECISION: i64 = 2;
/// Percent values are kept in hundredths, so a rate of `p` hundredths applied to `c`
/// cents yields `c * p / 10_000` cents.
const HUNDREDTHS_OF_PERCENT: u128 = 10_000;

/// Monetary amount in minor units (cents).
///
/// The ledger never holds negative amounts, so the inner value is unsigned and every
/// arithmetic operation is checked. At the API and database boundary the amount is a
/// decimal with two fractional digits.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, FromSqlRow, AsExpression, Default)]
#[sql_type = "Numeric"]
pub struct Amount(u64);

#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum ParseAmountError {
    #[fail(display = "amount must not be negative")]
    Negative,
    #[fail(display = "amount must have at most two fractional digits")]
    TooPrecise,
    #[fail(display = "amount is too large")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rounding {
    Exact,
    HalfEven,
}

impl Amount {
    pub fn zero() -> Self {
        Amount(0)
    }

    pub fn new(cents: u64) -> Self {
        Amount(cents)
    }

    pub fn inner(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Make addition, return None on overflow
    pub fn checked_add(&self, other: Amount) -> Option<Self> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Make subtraction, return None on underflow
    pub fn checked_sub(&self, other: Amount) -> Option<Self> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn min(self, other: Amount) -> Amount {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Parses a decimal that must already respect the two-decimal invariant.
    pub fn from_super_unit_exact(value: &BigDecimal) -> Result<Self, ParseAmountError> {
        to_minor_units(value, Rounding::Exact).map(Amount)
    }

    /// Parses a decimal rounding half-to-even to whole cents.
    pub fn from_super_unit_rounded(value: &BigDecimal) -> Result<Self, ParseAmountError> {
        to_minor_units(value, Rounding::HalfEven).map(Amount)
    }

    pub fn to_super_unit(&self) -> BigDecimal {
        (BigDecimal::from(self.0) / BigDecimal::from(CENTS_IN_UNIT)).with_scale(FIAT_PRECISION)
    }

    /// `self * percent / 100 * periods`, rounded half-to-even once at the end.
    pub fn percent_of(&self, percent: Percent, periods: u64) -> Option<Amount> {
        let numerator = (self.0 as u128)
            .checked_mul(percent.inner() as u128)?
            .checked_mul(periods as u128)?;
        let quotient = numerator / HUNDREDTHS_OF_PERCENT;
        let remainder = numerator % HUNDREDTHS_OF_PERCENT;
        let twice_remainder = remainder * 2;
        let rounded = if twice_remainder > HUNDREDTHS_OF_PERCENT || (twice_remainder == HUNDREDTHS_OF_PERCENT && quotient % 2 == 1) {
            quotient + 1
        } else {
            quotient
        };

        if rounded > u64::max_value() as u128 {
            None
        } else {
            Some(Amount(rounded as u64))
        }
    }
}

fn to_minor_units(value: &BigDecimal, rounding: Rounding) -> Result<u64, ParseAmountError> {
    let zero = BigDecimal::from(0);
    if *value < zero {
        return Err(ParseAmountError::Negative);
    }

    let scaled = value.clone() * BigDecimal::from(CENTS_IN_UNIT);
    let truncated = scaled.with_scale(0);
    let remainder = scaled - truncated.clone();
    let units = u64::from_str(&truncated.to_string()).map_err(|_| ParseAmountError::Overflow)?;

    if remainder == zero {
        return Ok(units);
    }

    match rounding {
        Rounding::Exact => Err(ParseAmountError::TooPrecise),
        Rounding::HalfEven => {
            let twice_remainder = remainder * BigDecimal::from(2);
            let one = BigDecimal::from(1);
            let round_up = twice_remainder > one || (twice_remainder == one && units % 2 == 1);
            if round_up {
                units.checked_add(1).ok_or(ParseAmountError::Overflow)
            } else {
                Ok(units)
            }
        }
    }
}

impl From<Amount> for BigDecimal {
    fn from(val: Amount) -> Self {
        val.to_super_unit()
    }
}

impl ToSql<Numeric, Pg> for Amount {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Pg>) -> serialize::Result {
        ToSql::<Numeric, Pg>::to_sql(&self.to_super_unit(), out)
    }
}

impl FromSql<Numeric, Pg> for Amount {
    fn from_sql(numeric: Option<&[u8]>) -> deserialize::Result<Self> {
        let decimal = <BigDecimal as FromSql<Numeric, Pg>>::from_sql(numeric)?;
        Amount::from_super_unit_exact(&decimal).map_err(|e| Box::from(format!("Invalid amount {}: {}", decimal, e)))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / CENTS_IN_UNIT, self.0 % CENTS_IN_UNIT)
    }
}
