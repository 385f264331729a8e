//! Exchange-rate snapshot types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{SnapshotId, Timestamp};

/// Mapping from currency code to its factor relative to the base currency.
pub type RateTable = BTreeMap<String, f64>;

/// Rates as reported by the upstream provider, before they are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestRates {
    /// Base currency code.
    pub base: String,
    /// Rates relative to `base`.
    pub rates: RateTable,
    /// When the upstream provider reported this data.
    pub observed_at: Timestamp,
}

impl LatestRates {
    /// Create a new set of upstream rates.
    pub fn new(base: impl Into<String>, rates: RateTable, observed_at: Timestamp) -> Self {
        Self {
            base: base.into(),
            rates,
            observed_at,
        }
    }

    /// Whether the rates satisfy the domain expectation: non-empty, every
    /// factor finite and positive.
    pub fn is_well_formed(&self) -> bool {
        !self.rates.is_empty() && self.rates.values().all(|r| r.is_finite() && *r > 0.0)
    }
}

/// One persisted observation of exchange rates.
///
/// Snapshots are immutable; a refresh writes a new one instead of
/// updating an old row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateSnapshot {
    /// Store-assigned identifier.
    pub id: SnapshotId,
    /// Base currency code.
    pub base: String,
    /// Rates relative to `base`.
    pub rates: RateTable,
    /// When the upstream provider reported this data.
    pub observed_at: Timestamp,
    /// When this snapshot was written to the store.
    pub persisted_at: Timestamp,
}

impl ExchangeRateSnapshot {
    /// Build a snapshot from upstream rates and the store-assigned fields.
    pub fn from_latest(id: SnapshotId, latest: LatestRates, persisted_at: Timestamp) -> Self {
        Self {
            id,
            base: latest.base,
            rates: latest.rates,
            observed_at: latest.observed_at,
            persisted_at,
        }
    }

    /// Look up the factor for a currency code.
    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }

    /// Body served to API clients.
    pub fn to_current_rates(&self) -> CurrentRates {
        CurrentRates {
            base: self.base.clone(),
            rates: self.rates.clone(),
            timestamp: self.persisted_at,
        }
    }
}

/// Public view of the current rates: `{base, rates, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CurrentRates {
    /// Base currency code.
    #[cfg_attr(feature = "openapi", schema(example = "USD"))]
    pub base: String,
    /// Factor per currency code, relative to `base`.
    #[cfg_attr(feature = "openapi", schema(value_type = BTreeMap<String, f64>))]
    pub rates: RateTable,
    /// When the served snapshot was persisted.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
}
