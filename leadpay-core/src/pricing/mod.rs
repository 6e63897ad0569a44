//! Lead pricing.
//!
//! A lead price is `round(base_band_price * urgency * city_tier)` in minor
//! currency units. The computation is a pure function of the band catalog and
//! the four job attributes; [`PricingCalculator`] wraps it with the reloadable
//! catalog and the quote expiry.

mod catalog;

pub use catalog::{BandCatalog, PriceBand};

use crate::config::{ConfigStore, PricingPolicy};
use compact_str::CompactString;
use leadpay_sdk::objects::{CityTier, JobSize, PriceBreakdownResponse, RetrySafety, Urgency};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("no price band for {category}:{size}")]
    UnknownBand { category: String, size: JobSize },
    #[error("malformed band id: {0}")]
    MalformedBandId(String),
    #[error("price band {0} is configured more than once")]
    DuplicateBand(String),
    #[error("price band {band_id} has non-positive base price {base_price}")]
    NonPositiveBasePrice { band_id: String, base_price: i64 },
    #[error("lead price overflows")]
    Overflow,
    #[error("quote expired at {expired_at}")]
    QuoteExpired { expired_at: OffsetDateTime },
    #[error("quote no longer matches the current price catalog")]
    StaleQuote,
}

impl PricingError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            PricingError::UnknownBand { .. }
            | PricingError::MalformedBandId(_)
            | PricingError::QuoteExpired { .. }
            | PricingError::StaleQuote => RetrySafety::AfterCorrection,
            PricingError::DuplicateBand(_)
            | PricingError::NonPositiveBasePrice { .. }
            | PricingError::Overflow => RetrySafety::Never,
        }
    }
}

/// Multiplier applied for how soon the job is wanted.
pub fn urgency_multiplier(urgency: Urgency) -> Decimal {
    match urgency {
        Urgency::Asap => Decimal::new(15, 1),
        Urgency::ThisWeek => Decimal::new(125, 2),
        Urgency::ThisMonth => Decimal::new(11, 1),
        Urgency::Flexible => Decimal::ONE,
    }
}

/// Multiplier applied for the size class of the job's city.
pub fn city_tier_multiplier(tier: CityTier) -> Decimal {
    match tier {
        CityTier::BudapestCentral => Decimal::new(12, 1),
        CityTier::BudapestOuter => Decimal::new(11, 1),
        CityTier::MajorCity => Decimal::new(105, 2),
        CityTier::Town => Decimal::ONE,
        CityTier::Rural => Decimal::new(9, 1),
    }
}

/// The derived price of one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub band_id: String,
    pub base_price: i64,
    pub urgency_multiplier: Decimal,
    pub city_tier_multiplier: Decimal,
    pub effective_multiplier: Decimal,
    pub final_price: i64,
    pub currency: CompactString,
}

impl PriceBreakdown {
    fn compute(
        band: &PriceBand,
        urgency_multiplier: Decimal,
        city_tier_multiplier: Decimal,
    ) -> Result<Self, PricingError> {
        let effective_multiplier = urgency_multiplier
            .checked_mul(city_tier_multiplier)
            .ok_or(PricingError::Overflow)?;
        let final_price = Decimal::from(band.base_price)
            .checked_mul(effective_multiplier)
            .ok_or(PricingError::Overflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(PricingError::Overflow)?;
        Ok(Self {
            band_id: band.id(),
            base_price: band.base_price,
            urgency_multiplier,
            city_tier_multiplier,
            effective_multiplier,
            final_price,
            currency: band.currency.clone(),
        })
    }

    pub fn to_response(&self) -> PriceBreakdownResponse {
        PriceBreakdownResponse {
            base_band_id: self.band_id.clone(),
            base_band_lead_price_huf: self.base_price,
            applied_urgency_multiplier: self.urgency_multiplier,
            applied_city_tier_multiplier: self.city_tier_multiplier,
            effective_multiplier: self.effective_multiplier,
            final_lead_price_huf: self.final_price,
        }
    }
}

/// Price one lead against `catalog`.
///
/// Fails with [`PricingError::UnknownBand`] when no band matches; otherwise
/// total and deterministic.
pub fn quote(
    catalog: &BandCatalog,
    category: &str,
    size: JobSize,
    urgency: Urgency,
    city_tier: CityTier,
) -> Result<PriceBreakdown, PricingError> {
    let band = catalog
        .lookup(category, size)
        .ok_or_else(|| PricingError::UnknownBand {
            category: category.to_owned(),
            size,
        })?;
    PriceBreakdown::compute(
        band,
        urgency_multiplier(urgency),
        city_tier_multiplier(city_tier),
    )
}

/// A breakdown together with its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub breakdown: PriceBreakdown,
    pub quoted_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Prices leads against the live band catalog and checks returned quotes.
#[derive(Clone)]
pub struct PricingCalculator {
    catalog: ConfigStore<BandCatalog>,
    policy: ConfigStore<PricingPolicy>,
}

impl PricingCalculator {
    pub fn new(catalog: ConfigStore<BandCatalog>, policy: ConfigStore<PricingPolicy>) -> Self {
        Self { catalog, policy }
    }

    pub async fn quote(
        &self,
        category: &str,
        size: JobSize,
        urgency: Urgency,
        city_tier: CityTier,
        now: OffsetDateTime,
    ) -> Result<Quote, PricingError> {
        let quote_ttl = self.policy.read().await.quote_ttl;
        let catalog = self.catalog.read().await;
        let breakdown = quote(&catalog, category, size, urgency, city_tier)?;
        Ok(Quote {
            breakdown,
            quoted_at: now,
            expires_at: now + quote_ttl,
        })
    }

    /// Check a quote handed back by the client before it is used for a purchase.
    ///
    /// The quote must be unexpired, its band price must match the current
    /// catalog, and its multipliers must be ones this calculator hands out.
    /// Returns the breakdown recomputed from the catalog.
    pub async fn revalidate(
        &self,
        quoted: &PriceBreakdownResponse,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<PriceBreakdown, PricingError> {
        if now > expires_at {
            return Err(PricingError::QuoteExpired {
                expired_at: expires_at,
            });
        }
        let (category, size) = BandCatalog::parse_band_id(&quoted.base_band_id)?;
        let urgency = Urgency::ALL
            .into_iter()
            .find(|u| urgency_multiplier(*u) == quoted.applied_urgency_multiplier)
            .ok_or(PricingError::StaleQuote)?;
        let city_tier = CityTier::ALL
            .into_iter()
            .find(|t| city_tier_multiplier(*t) == quoted.applied_city_tier_multiplier)
            .ok_or(PricingError::StaleQuote)?;

        let catalog = self.catalog.read().await;
        let current = match quote(&catalog, category, size, urgency, city_tier) {
            Ok(breakdown) => breakdown,
            Err(PricingError::UnknownBand { .. }) => return Err(PricingError::StaleQuote),
            Err(e) => return Err(e),
        };
        if current.base_price != quoted.base_band_lead_price_huf
            || current.final_price != quoted.final_lead_price_huf
        {
            return Err(PricingError::StaleQuote);
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::Duration;

    fn catalog() -> BandCatalog {
        BandCatalog::new([
            PriceBand::new("plumbing", JobSize::Medium, 10_000, "HUF"),
            PriceBand::new("plumbing", JobSize::Small, 3_333, "HUF"),
            PriceBand::new("painting", JobSize::Large, 25_000, "HUF"),
        ])
        .unwrap()
    }

    #[test]
    fn test_asap_budapest_central() {
        let breakdown = quote(
            &catalog(),
            "plumbing",
            JobSize::Medium,
            Urgency::Asap,
            CityTier::BudapestCentral,
        )
        .unwrap();
        assert_eq!(breakdown.band_id, "plumbing:medium");
        assert_eq!(breakdown.base_price, 10_000);
        assert_eq!(breakdown.urgency_multiplier, dec!(1.5));
        assert_eq!(breakdown.city_tier_multiplier, dec!(1.2));
        assert_eq!(breakdown.effective_multiplier, dec!(1.8));
        assert_eq!(breakdown.final_price, 18_000);
        assert_eq!(breakdown.currency, "HUF");
    }

    #[test]
    fn test_unknown_band() {
        let err = quote(
            &catalog(),
            "roofing",
            JobSize::Medium,
            Urgency::Flexible,
            CityTier::Town,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PricingError::UnknownBand {
                category: "roofing".into(),
                size: JobSize::Medium
            }
        );
    }

    #[test]
    fn test_round_half_up() {
        // 3333 * 1.25 * 1.2 = 4999.5
        let breakdown = quote(
            &catalog(),
            "plumbing",
            JobSize::Small,
            Urgency::ThisWeek,
            CityTier::BudapestCentral,
        )
        .unwrap();
        assert_eq!(breakdown.effective_multiplier, dec!(1.5));
        assert_eq!(breakdown.final_price, 5_000);

        // 3333 * 1.1 * 0.9 = 3299.67
        let breakdown = quote(
            &catalog(),
            "plumbing",
            JobSize::Small,
            Urgency::ThisMonth,
            CityTier::Rural,
        )
        .unwrap();
        assert_eq!(breakdown.final_price, 3_300);
    }

    #[test]
    fn test_deterministic() {
        let catalog = catalog();
        let painting = || {
            quote(
                &catalog,
                "painting",
                JobSize::Large,
                Urgency::ThisWeek,
                CityTier::MajorCity,
            )
        };
        assert_eq!(painting(), painting());
    }

    #[test]
    fn test_monotonic_in_urgency_and_city_tier() {
        let catalog = catalog();
        for tier in CityTier::ALL {
            let prices: Vec<i64> = Urgency::ALL
                .into_iter()
                .map(|u| {
                    quote(&catalog, "painting", JobSize::Large, u, tier)
                        .unwrap()
                        .final_price
                })
                .collect();
            assert!(prices.windows(2).all(|w| w[0] <= w[1]), "{tier:?}: {prices:?}");
        }
        for urgency in Urgency::ALL {
            let prices: Vec<i64> = CityTier::ALL
                .into_iter()
                .map(|t| {
                    quote(&catalog, "painting", JobSize::Large, urgency, t)
                        .unwrap()
                        .final_price
                })
                .collect();
            assert!(prices.windows(2).all(|w| w[0] <= w[1]), "{urgency:?}: {prices:?}");
        }
    }

    fn calculator() -> PricingCalculator {
        PricingCalculator::new(
            ConfigStore::new(catalog()),
            ConfigStore::new(PricingPolicy::default()),
        )
    }

    #[tokio::test]
    async fn test_quote_carries_expiry() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let quote = calculator()
            .quote("plumbing", JobSize::Medium, Urgency::Flexible, CityTier::Town, now)
            .await
            .unwrap();
        assert_eq!(quote.quoted_at, now);
        assert_eq!(quote.expires_at, now + Duration::minutes(15));
        assert_eq!(quote.breakdown.final_price, 10_000);
    }

    #[tokio::test]
    async fn test_revalidate() {
        let calculator = calculator();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let quote = calculator
            .quote("plumbing", JobSize::Medium, Urgency::Asap, CityTier::BudapestCentral, now)
            .await
            .unwrap();
        let response = quote.breakdown.to_response();

        let checked = calculator
            .revalidate(&response, quote.expires_at, now + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(checked, quote.breakdown);

        let expired = calculator
            .revalidate(&response, quote.expires_at, now + Duration::minutes(16))
            .await;
        assert!(matches!(expired, Err(PricingError::QuoteExpired { .. })));

        let mut discounted = response.clone();
        discounted.final_lead_price_huf = 1;
        let tampered = calculator.revalidate(&discounted, quote.expires_at, now).await;
        assert_eq!(tampered, Err(PricingError::StaleQuote));

        let mut odd_multiplier = response;
        odd_multiplier.applied_urgency_multiplier = dec!(0.1);
        let tampered = calculator
            .revalidate(&odd_multiplier, quote.expires_at, now)
            .await;
        assert_eq!(tampered, Err(PricingError::StaleQuote));
    }

    #[tokio::test]
    async fn test_revalidate_after_catalog_reload() {
        let store = ConfigStore::new(catalog());
        let calculator =
            PricingCalculator::new(store.clone(), ConfigStore::new(PricingPolicy::default()));
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let quote = calculator
            .quote("plumbing", JobSize::Medium, Urgency::Flexible, CityTier::Town, now)
            .await
            .unwrap();

        let repriced =
            BandCatalog::new([PriceBand::new("plumbing", JobSize::Medium, 12_000, "HUF")]).unwrap();
        store.update(repriced).await;

        let result = calculator
            .revalidate(&quote.breakdown.to_response(), quote.expires_at, now)
            .await;
        assert_eq!(result, Err(PricingError::StaleQuote));
    }
}
