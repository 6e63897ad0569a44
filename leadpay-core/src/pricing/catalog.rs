use super::PricingError;
use compact_str::CompactString;
use leadpay_sdk::objects::JobSize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base lead price for one (service category, job size) combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub category: CompactString,
    pub size: JobSize,
    /// Minor currency units.
    pub base_price: i64,
    pub currency: CompactString,
}

impl PriceBand {
    pub fn new(
        category: impl Into<CompactString>,
        size: JobSize,
        base_price: i64,
        currency: impl Into<CompactString>,
    ) -> Self {
        Self {
            category: category.into(),
            size,
            base_price,
            currency: currency.into(),
        }
    }

    /// `{category}:{size}`
    pub fn id(&self) -> String {
        format!("{}:{}", self.category, self.size)
    }
}

/// Immutable set of price bands keyed by (category, size).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandCatalog {
    bands: HashMap<(CompactString, JobSize), PriceBand>,
}

impl BandCatalog {
    /// Build a catalog, rejecting duplicate bands and non-positive prices.
    pub fn new(bands: impl IntoIterator<Item = PriceBand>) -> Result<Self, PricingError> {
        let mut map = HashMap::new();
        for band in bands {
            if band.base_price <= 0 {
                return Err(PricingError::NonPositiveBasePrice {
                    band_id: band.id(),
                    base_price: band.base_price,
                });
            }
            let key = (band.category.clone(), band.size);
            if map.contains_key(&key) {
                return Err(PricingError::DuplicateBand(band.id()));
            }
            map.insert(key, band);
        }
        Ok(Self { bands: map })
    }

    pub fn lookup(&self, category: &str, size: JobSize) -> Option<&PriceBand> {
        self.bands.get(&(CompactString::from(category), size))
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Split a `{category}:{size}` band id.
    pub fn parse_band_id(band_id: &str) -> Result<(&str, JobSize), PricingError> {
        let malformed = || PricingError::MalformedBandId(band_id.to_owned());
        let (category, size) = band_id.rsplit_once(':').ok_or_else(malformed)?;
        let size = JobSize::ALL
            .into_iter()
            .find(|s| s.as_str() == size)
            .ok_or_else(malformed)?;
        if category.is_empty() {
            return Err(malformed());
        }
        Ok((category, size))
    }
}
