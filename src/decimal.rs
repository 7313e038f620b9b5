//! Exact price/size arithmetic (spec §3).
//!
//! The teacher crate (`betterbot-backend`) prices everything in `f64`
//! (`scrapers::polymarket_book_store::BookSnapshot::mid_price`, etc.) — a
//! pattern spec.md §9 calls out by name as a source of spurious spread
//! classifications near a threshold. `Price`/`Qty` wrap `rust_decimal::Decimal`
//! instead (grounded on the `dawsh2-Torq` pack example's `rust_decimal` use
//! in `libs/amm`), giving exact comparisons and half-to-even rounding at a
//! configured scale.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Sub};

/// Default number of significant fractional digits carried internally.
/// Spec requires "at least 18 significant digits"; `Decimal` carries 28-29.
pub const SCALE: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(pub Decimal);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qty(pub Decimal);

macro_rules! decimal_newtype {
    ($ty:ident) => {
        impl $ty {
            pub fn parse(s: &str) -> Option<Self> {
                s.parse::<Decimal>().ok().map(Self)
            }

            pub fn from_f64(v: f64) -> Option<Self> {
                Decimal::from_f64_retain(v).map(Self)
            }

            /// Rounds half-to-even at the configured scale.
            pub fn rounded(self, scale: u32) -> Self {
                Self(self.0.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl Add for $ty {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $ty {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Div<Decimal> for $ty {
            type Output = Self;
            fn div(self, rhs: Decimal) -> Self {
                Self(self.0 / rhs)
            }
        }
    };
}

decimal_newtype!(Price);
decimal_newtype!(Qty);

impl Price {
    /// Mid of two prices, rounded half-to-even at `scale`.
    pub fn mid(bid: Price, ask: Price, scale: u32) -> Price {
        ((bid + ask) / Decimal::from(2)).rounded(scale)
    }

    pub fn abs_diff(a: Price, b: Price) -> Price {
        Price((a.0 - b.0).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn mid_rounds_half_to_even() {
        let bid = Price(dec!(50000));
        let ask = Price(dec!(50002));
        assert_eq!(Price::mid(bid, ask, 2).0, dec!(50001));
    }

    #[test]
    fn exact_comparison_no_float_drift() {
        let a = Price::parse("50000.000000000000000001").unwrap();
        let b = Price::parse("50000.000000000000000002").unwrap();
        assert!(a < b);
        assert_ne!(a, b);
    }
}
