use std::fmt::{self, Display};
use std::io::prelude::*;

use bigdecimal::BigDecimal;
use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Numeric;

use models::{Amount, ParseAmountError};

/// Percent rate in hundredths of a percent: `Percent::new(1050)` is 10.50%.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, FromSqlRow, AsExpression, Default)]
#[sql_type = "Numeric"]
pub struct Percent(u32);

impl Percent {
    pub fn new(hundredths: u32) -> Self {
        Percent(hundredths)
    }

    pub fn inner(&self) -> u32 {
        self.0
    }

    pub fn from_decimal(value: &BigDecimal) -> Result<Self, ParseAmountError> {
        let hundredths = Amount::from_super_unit_exact(value)?.inner();
        if hundredths > u32::max_value() as u64 {
            return Err(ParseAmountError::Overflow);
        }
        Ok(Percent(hundredths as u32))
    }

    pub fn to_decimal(&self) -> BigDecimal {
        Amount::new(self.0 as u64).to_super_unit()
    }
}

impl ToSql<Numeric, Pg> for Percent {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Pg>) -> serialize::Result {
        ToSql::<Numeric, Pg>::to_sql(&self.to_decimal(), out)
    }
}

impl FromSql<Numeric, Pg> for Percent {
    fn from_sql(numeric: Option<&[u8]>) -> deserialize::Result<Self> {
        let decimal = <BigDecimal as FromSql<Numeric, Pg>>::from_sql(numeric)?;
        Percent::from_decimal(&decimal).map_err(|e| Box::from(format!("Invalid percent {}: {}", decimal, e)))
    }
}

impl Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
