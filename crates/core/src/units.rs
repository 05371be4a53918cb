//! Length-unit conversion and rate-basis semantics.
//!
//! Every multiplier is an exact `Decimal` so that unit conversion and the
//! downstream quantity math never accumulate float drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Meter multiplier for a recognized length-unit symbol.
///
/// Symbols are matched after lowercasing and trimming. Unknown symbols
/// return `None`; callers record them as invalid fields rather than erroring.
pub fn meter_factor(symbol: &str) -> Option<Decimal> {
    let factor = match symbol.trim().to_lowercase().as_str() {
        "m" | "meter" | "meters" => Decimal::ONE,
        "cm" => Decimal::new(1, 2),
        "mm" => Decimal::new(1, 3),
        "ft" | "foot" | "feet" => Decimal::new(3048, 4),
        "in" | "inch" | "inches" => Decimal::new(254, 4),
        _ => return None,
    };
    Some(factor)
}

/// The geometric basis a rate is expressed per.
///
/// A BOQ line itself is always emitted with `Absolute` basis: the line is a
/// final count, even when the rate that produced it was basis-relative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    PerCubicMetre,
    PerSquareMetre,
    PerMetre,
    PerCount,
    Absolute,
}

impl RateBasis {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "per_m3" => Some(Self::PerCubicMetre),
            "per_m2" => Some(Self::PerSquareMetre),
            "per_m" => Some(Self::PerMetre),
            "per_unit" | "per_count" => Some(Self::PerCount),
            "absolute" => Some(Self::Absolute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerCubicMetre => "per_m3",
            Self::PerSquareMetre => "per_m2",
            Self::PerMetre => "per_m",
            Self::PerCount => "per_unit",
            Self::Absolute => "absolute",
        }
    }
}

impl std::fmt::Display for RateBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a compound unit like `bags_per_m3` into its unit part and basis.
///
/// Units without a `_per_` marker come back unchanged with no basis. A
/// compound whose basis token is unrecognized keeps the split unit part but
/// reports no basis; the item is then only usable where a basis is optional.
pub fn split_compound_unit(unit: &str) -> (String, Option<RateBasis>) {
    match unit.split_once("_per_") {
        Some((unit_part, basis_part)) => {
            let basis = RateBasis::parse(&format!("per_{basis_part}"));
            (unit_part.to_string(), basis)
        }
        None => (unit.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{meter_factor, split_compound_unit, RateBasis};

    #[test]
    fn known_symbols_convert_exactly() {
        let twelve = Decimal::from(12);
        let metres = twelve * meter_factor("ft").expect("ft is supported");
        assert_eq!(metres, "3.6576".parse::<Decimal>().expect("decimal"));

        let metres = twelve * meter_factor("in").expect("in is supported");
        assert_eq!(metres, "0.3048".parse::<Decimal>().expect("decimal"));

        assert_eq!(meter_factor("cm"), Some(Decimal::new(1, 2)));
        assert_eq!(meter_factor("METERS"), Some(Decimal::ONE));
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        assert_eq!(meter_factor("furlong"), None);
        assert_eq!(meter_factor(""), None);
    }

    #[test]
    fn compound_unit_splits_into_unit_and_basis() {
        let (unit, basis) = split_compound_unit("bags_per_m3");
        assert_eq!(unit, "bags");
        assert_eq!(basis, Some(RateBasis::PerCubicMetre));

        let (unit, basis) = split_compound_unit("kg_per_m2");
        assert_eq!(unit, "kg");
        assert_eq!(basis, Some(RateBasis::PerSquareMetre));
    }

    #[test]
    fn plain_unit_has_no_basis() {
        let (unit, basis) = split_compound_unit("multiplier");
        assert_eq!(unit, "multiplier");
        assert_eq!(basis, None);
    }

    #[test]
    fn unrecognized_basis_token_keeps_unit_part() {
        let (unit, basis) = split_compound_unit("m2_per_tile");
        assert_eq!(unit, "m2");
        assert_eq!(basis, None);
    }

    #[test]
    fn basis_round_trips_through_strings() {
        for basis in [
            RateBasis::PerCubicMetre,
            RateBasis::PerSquareMetre,
            RateBasis::PerMetre,
            RateBasis::PerCount,
            RateBasis::Absolute,
        ] {
            assert_eq!(RateBasis::parse(basis.as_str()), Some(basis));
        }
    }
}
