//! Lead pricing request and response payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Job size tier of a posted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSize {
    Small,
    Medium,
    Large,
}

impl JobSize {
    pub const ALL: [JobSize; 3] = [JobSize::Small, JobSize::Medium, JobSize::Large];

    pub fn as_str(self) -> &'static str {
        match self {
            JobSize::Small => "small",
            JobSize::Medium => "medium",
            JobSize::Large => "large",
        }
    }
}

impl std::fmt::Display for JobSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How soon the customer wants the job done.
///
/// Variants are declared from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Flexible,
    ThisMonth,
    ThisWeek,
    Asap,
}

impl Urgency {
    pub const ALL: [Urgency; 4] = [
        Urgency::Flexible,
        Urgency::ThisMonth,
        Urgency::ThisWeek,
        Urgency::Asap,
    ];
}

/// Size class of the city the job is located in.
///
/// Variants are declared from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityTier {
    Rural,
    Town,
    MajorCity,
    BudapestOuter,
    BudapestCentral,
}

impl CityTier {
    pub const ALL: [CityTier; 5] = [
        CityTier::Rural,
        CityTier::Town,
        CityTier::MajorCity,
        CityTier::BudapestOuter,
        CityTier::BudapestCentral,
    ];
}

/// `POST /lead-pricing` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPricingRequest {
    pub service_category: String,
    pub job_size: JobSize,
    pub urgency: Urgency,
    pub city_tier: CityTier,
}

/// Price breakdown as shown to the pro and echoed back on purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdownResponse {
    pub base_band_id: String,
    pub base_band_lead_price_huf: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub applied_urgency_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub applied_city_tier_multiplier: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub effective_multiplier: Decimal,
    pub final_lead_price_huf: i64,
}

/// `POST /lead-pricing` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPricingResponse {
    pub currency: String,
    pub lead_price_huf: i64,
    pub breakdown: PriceBreakdownResponse,
    /// Unix timestamp of when the quote was computed.
    pub quoted_at: i64,
    /// Unix timestamp after which the quote must be recomputed.
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&Urgency::ThisWeek).unwrap(),
            "\"this_week\""
        );
        assert_eq!(
            serde_json::to_string(&CityTier::BudapestCentral).unwrap(),
            "\"budapest_central\""
        );
        let size: JobSize = serde_json::from_str("\"large\"").unwrap();
        assert_eq!(size, JobSize::Large);
        assert!(serde_json::from_str::<Urgency>("\"tomorrow\"").is_err());
    }

    #[test]
    fn test_pricing_request_is_camel_case() {
        let json = r#"{
            "serviceCategory": "plumbing",
            "jobSize": "medium",
            "urgency": "asap",
            "cityTier": "town"
        }"#;
        let request: LeadPricingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.service_category, "plumbing");
        assert_eq!(request.job_size, JobSize::Medium);
        assert_eq!(request.urgency, Urgency::Asap);
        assert_eq!(request.city_tier, CityTier::Town);
    }

    #[test]
    fn test_multipliers_serialize_as_numbers() {
        let breakdown = PriceBreakdownResponse {
            base_band_id: "plumbing:medium".into(),
            base_band_lead_price_huf: 10_000,
            applied_urgency_multiplier: dec!(1.5),
            applied_city_tier_multiplier: dec!(1.2),
            effective_multiplier: dec!(1.8),
            final_lead_price_huf: 18_000,
        };
        let value = serde_json::to_value(&breakdown).unwrap();
        assert_eq!(value["appliedUrgencyMultiplier"], serde_json::json!(1.5));
        assert_eq!(value["finalLeadPriceHuf"], serde_json::json!(18_000));
    }
}
