use crate::config::CoveragePolicy;
use crate::entities::PurchaseStatus;

/// How a lead price is split between the pro's balance and the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPlan {
    pub from_balance: i64,
    pub from_gateway: i64,
}

impl FundingPlan {
    /// Cover as much of `price` as `balance` allows.
    ///
    /// Returns `None` when `coverage` is [`CoveragePolicy::Full`] and the
    /// balance falls short.
    pub fn decide(balance: i64, price: i64, coverage: CoveragePolicy) -> Option<Self> {
        let balance = balance.max(0);
        if balance >= price {
            return Some(Self {
                from_balance: price,
                from_gateway: 0,
            });
        }
        match coverage {
            CoveragePolicy::Full => None,
            CoveragePolicy::Partial => Some(Self {
                from_balance: balance,
                from_gateway: price - balance,
            }),
        }
    }

    pub fn status(&self) -> PurchaseStatus {
        if self.from_gateway == 0 {
            PurchaseStatus::Succeeded
        } else {
            PurchaseStatus::AwaitingPaymentMethod
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_covers_price() {
        let plan = FundingPlan::decide(20_000, 18_000, CoveragePolicy::Partial).unwrap();
        assert_eq!(plan.from_balance, 18_000);
        assert_eq!(plan.from_gateway, 0);
        assert_eq!(plan.status(), PurchaseStatus::Succeeded);

        let exact = FundingPlan::decide(18_000, 18_000, CoveragePolicy::Full).unwrap();
        assert_eq!(exact.from_gateway, 0);
    }

    #[test]
    fn test_partial_balance() {
        let plan = FundingPlan::decide(5_000, 18_000, CoveragePolicy::Partial).unwrap();
        assert_eq!(plan.from_balance, 5_000);
        assert_eq!(plan.from_gateway, 13_000);
        assert_eq!(plan.status(), PurchaseStatus::AwaitingPaymentMethod);
    }

    #[test]
    fn test_empty_balance() {
        let plan = FundingPlan::decide(0, 18_000, CoveragePolicy::Partial).unwrap();
        assert_eq!(plan.from_balance, 0);
        assert_eq!(plan.from_gateway, 18_000);
        assert_eq!(plan.status(), PurchaseStatus::AwaitingPaymentMethod);
    }

    #[test]
    fn test_full_coverage_rejects_shortfall() {
        assert_eq!(FundingPlan::decide(5_000, 18_000, CoveragePolicy::Full), None);
        assert_eq!(FundingPlan::decide(0, 18_000, CoveragePolicy::Full), None);
    }

    #[test]
    fn test_split_always_sums_to_price() {
        for balance in [0, 1, 9_999, 10_000, 10_001, 50_000] {
            let plan = FundingPlan::decide(balance, 10_000, CoveragePolicy::Partial).unwrap();
            assert_eq!(plan.from_balance + plan.from_gateway, 10_000);
            assert!(plan.from_balance <= balance);
        }
    }
}
