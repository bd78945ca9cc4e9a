use std::sync::Arc;

use multisend_core::{error::EngineError, transfer::FeeQuote};

use crate::network::Network;

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Extra uplift forced onto replacement (cancellation) transactions so they
/// reliably outbid the transaction they supersede.
pub const CANCEL_UPLIFT_PERCENT: u32 = 50;

/// Raw fee data as reported by the network. The two-part model is active
/// when `max_fee_per_gas` is present; otherwise only `gas_price` is
/// meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeSnapshot {
    pub base_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub gas_price: Option<u128>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CongestionLevel {
    Normal = 0,
    Mild = 1,
    High = 2,
    Severe = 3,
}

impl CongestionLevel {
    /// Fee uplift added on top of any caller-requested uplift.
    pub fn uplift_percent(self) -> u32 {
        match self {
            CongestionLevel::Normal => 0,
            CongestionLevel::Mild => 10,
            CongestionLevel::High => 20,
            CongestionLevel::Severe => 40,
        }
    }

    pub fn is_congested(self) -> bool {
        self != CongestionLevel::Normal
    }
}

/// Classify how busy the network is from a fee snapshot.
///
/// Two-part model: the ratio of priority fee to base fee, in percent. A
/// zero base fee cannot be classified and reads as normal. Legacy model:
/// absolute gas price thresholds in gwei.
pub fn classify_congestion(snapshot: &FeeSnapshot) -> CongestionLevel {
    if snapshot.max_fee_per_gas.is_some() {
        let base = snapshot.base_fee_per_gas.unwrap_or(0);
        let priority = snapshot.max_priority_fee_per_gas.unwrap_or(0);
        if base == 0 {
            return CongestionLevel::Normal;
        }

        let ratio = priority.saturating_mul(100) / base;
        match ratio {
            r if r >= 50 => CongestionLevel::Severe,
            r if r >= 30 => CongestionLevel::High,
            r if r >= 15 => CongestionLevel::Mild,
            _ => CongestionLevel::Normal,
        }
    } else {
        let gwei = snapshot.gas_price.unwrap_or(0) / WEI_PER_GWEI;
        match gwei {
            g if g > 100 => CongestionLevel::Severe,
            g if g > 50 => CongestionLevel::High,
            g if g > 20 => CongestionLevel::Mild,
            _ => CongestionLevel::Normal,
        }
    }
}

/// Integer percentage scaling; floors, never rounds past the intended cap.
fn scale(value: u128, uplift_percent: u32) -> u128 {
    value.saturating_mul(100 + uplift_percent as u128) / 100
}

pub(crate) fn quote_from_snapshot(
    snapshot: &FeeSnapshot,
    total_uplift_percent: u32,
) -> Result<FeeQuote, EngineError> {
    if let Some(max_fee) = snapshot.max_fee_per_gas {
        let priority = snapshot.max_priority_fee_per_gas.unwrap_or(0);
        let new_priority = scale(priority, total_uplift_percent);
        // Cap at twice the observed base fee plus the tip, which survives
        // several consecutive full blocks of base fee growth.
        let new_max = match snapshot.base_fee_per_gas {
            Some(base) if base > 0 => base.saturating_mul(2).saturating_add(new_priority),
            _ => scale(max_fee, total_uplift_percent),
        };

        Ok(FeeQuote::DynamicFee {
            max_priority_fee_per_gas: new_priority,
            max_fee_per_gas: new_max,
        })
    } else if let Some(gas_price) = snapshot.gas_price {
        Ok(FeeQuote::Legacy {
            gas_price: scale(gas_price, total_uplift_percent),
        })
    } else {
        Err(EngineError::InternalError {
            message: "fee snapshot carries neither pricing model".to_string(),
        })
    }
}

/// Computes fee recommendations from live network data.
///
/// Every quote starts from a fresh snapshot. A failed fetch is retried once
/// on the next endpoint; a second failure propagates, there is no default
/// fee to fall back to.
pub struct FeeEstimator<N: Network> {
    network: Arc<N>,
}

impl<N: Network> Clone for FeeEstimator<N> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
        }
    }
}

impl<N: Network> FeeEstimator<N> {
    pub fn new(network: Arc<N>) -> Self {
        Self { network }
    }

    async fn fetch_snapshot(&self) -> Result<FeeSnapshot, EngineError> {
        match self.network.fee_snapshot().await {
            Ok(snapshot) => Ok(snapshot),
            Err(first) => {
                tracing::warn!(error = %first, "fee data fetch failed, rotating endpoint");
                self.network.rotate();
                self.network.fee_snapshot().await
            }
        }
    }

    pub async fn congestion(&self) -> Result<CongestionLevel, EngineError> {
        Ok(classify_congestion(&self.fetch_snapshot().await?))
    }

    /// Quote a fee with `uplift_percent` on top of the current market data,
    /// plus whatever the congestion level demands.
    pub async fn quote(&self, uplift_percent: u32) -> Result<FeeQuote, EngineError> {
        let snapshot = self.fetch_snapshot().await?;
        let level = classify_congestion(&snapshot);
        if level.is_congested() {
            tracing::debug!(
                level = level as u8,
                extra_percent = level.uplift_percent(),
                "network congested, raising fee uplift"
            );
        }

        quote_from_snapshot(&snapshot, uplift_percent + level.uplift_percent())
    }
}
