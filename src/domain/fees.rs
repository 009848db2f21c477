use super::money::Paise;
use crate::error::{EscrowError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PLATFORM_FEE_BPS: u32 = 1_000;
pub const DEFAULT_GATEWAY_FEE_BPS: u32 = 150;

/// Fees charged to the buyer on top of the item price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub item_price: Paise,
    pub platform_fee: Paise,
    pub gateway_fee: Paise,
    pub total: Paise,
}

/// Fee rates in basis points.
///
/// The platform fee applies to the item price; the gateway fee applies to the
/// subtotal (item price plus platform fee). Both are floored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub platform_fee_bps: u32,
    pub gateway_fee_bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            platform_fee_bps: DEFAULT_PLATFORM_FEE_BPS,
            gateway_fee_bps: DEFAULT_GATEWAY_FEE_BPS,
        }
    }
}

impl FeeSchedule {
    pub fn compute(&self, item_price: Paise) -> Result<FeeBreakdown> {
        if item_price.is_zero() {
            return Err(EscrowError::InvalidOperation(
                "Item price must be greater than 0 paise".to_string(),
            ));
        }

        let platform_fee = item_price.apply_bps(self.platform_fee_bps);
        let subtotal = checked_sum(item_price, platform_fee)?;
        let gateway_fee = subtotal.apply_bps(self.gateway_fee_bps);
        let total = checked_sum(subtotal, gateway_fee)?;

        Ok(FeeBreakdown {
            item_price,
            platform_fee,
            gateway_fee,
            total,
        })
    }
}

fn checked_sum(a: Paise, b: Paise) -> Result<Paise> {
    a.checked_add(b).ok_or_else(|| {
        EscrowError::InvalidOperation(format!("Amount overflow adding {} and {} paise", a.0, b.0))
    })
}

/// Computes fees with the default 10% platform and 1.5% gateway rates.
pub fn compute_fees(item_price: Paise) -> Result<FeeBreakdown> {
    FeeSchedule::default().compute(item_price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_price() {
        let fees = compute_fees(Paise::new(50_000)).unwrap();
        assert_eq!(fees.platform_fee, Paise::new(5_000));
        assert_eq!(fees.gateway_fee, Paise::new(825));
        assert_eq!(fees.total, Paise::new(55_825));
    }

    #[test]
    fn test_small_prices_floor_to_zero_fees() {
        let fees = compute_fees(Paise::new(9)).unwrap();
        assert_eq!(fees.platform_fee, Paise::ZERO);
        assert_eq!(fees.gateway_fee, Paise::ZERO);
        assert_eq!(fees.total, Paise::new(9));
    }

    #[test]
    fn test_rejects_zero_price() {
        assert!(matches!(
            compute_fees(Paise::ZERO),
            Err(EscrowError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_custom_schedule() {
        let schedule = FeeSchedule {
            platform_fee_bps: 0,
            gateway_fee_bps: 200,
        };
        let fees = schedule.compute(Paise::new(10_000)).unwrap();
        assert_eq!(fees.platform_fee, Paise::ZERO);
        assert_eq!(fees.gateway_fee, Paise::new(200));
        assert_eq!(fees.total, Paise::new(10_200));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let schedule = FeeSchedule {
            platform_fee_bps: 10_000,
            gateway_fee_bps: 0,
        };
        assert!(schedule.compute(Paise::new(u64::MAX)).is_err());
    }
}
