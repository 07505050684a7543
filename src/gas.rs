//! Gas price oracle client
//!
//! Fetches fee quotes for a named urgency level, caches the last successful
//! quote per level, and retries with a fixed delay when the upstream source
//! is down and nothing is cached yet.

use crate::error::{ToolError, ToolResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::U256;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Transaction urgency levels recognized by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityLevel {
    Lowest,
    Average,
    Fast,
    Fastest,
}

impl PriorityLevel {
    /// Parse a level name. Unrecognized input falls back to [`Fast`],
    /// the default urgency for submissions.
    ///
    /// [`Fast`]: PriorityLevel::Fast
    pub fn parse(name: &str) -> Self {
        match name {
            "lowest" => PriorityLevel::Lowest,
            "average" => PriorityLevel::Average,
            "fast" => PriorityLevel::Fast,
            "fastest" => PriorityLevel::Fastest,
            other => {
                warn!("unknown gas price level {other:?}, falling back to \"fast\"");
                PriorityLevel::Fast
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Lowest => "lowest",
            PriorityLevel::Average => "average",
            PriorityLevel::Fast => "fast",
            PriorityLevel::Fastest => "fastest",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quote from the upstream API. The upstream reports prices in tenths
/// of a gwei per level.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GasQuote {
    #[serde(rename = "safeLow")]
    pub safe_low: f64,
    pub average: f64,
    pub fast: f64,
    pub fastest: f64,
}

impl GasQuote {
    /// Price for a level in wei. One upstream unit is 10^8 wei.
    pub fn wei(&self, level: PriorityLevel) -> U256 {
        let tenths_of_gwei = match level {
            PriorityLevel::Lowest => self.safe_low,
            PriorityLevel::Average => self.average,
            PriorityLevel::Fast => self.fast,
            PriorityLevel::Fastest => self.fastest,
        };
        U256::from((tenths_of_gwei * 100_000_000.0).round() as u128)
    }
}

/// Upstream quote source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch(&self) -> ToolResult<GasQuote>;
}

/// ethgasstation.info JSON API source.
pub struct EthGasStation {
    client: reqwest::Client,
    endpoint: String,
}

impl EthGasStation {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for EthGasStation {
    async fn fetch(&self) -> ToolResult<GasQuote> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| ToolError::GasOracle(e.to_string()))?
            .error_for_status()
            .map_err(|e| ToolError::GasOracle(e.to_string()))?;

        response
            .json::<GasQuote>()
            .await
            .map_err(|e| ToolError::GasOracle(format!("malformed quote: {e}")))
    }
}

/// Cached gas price oracle.
///
/// The cache is owned by the instance and keyed by level; there is no shared
/// module-level state.
pub struct GasOracle {
    source: Box<dyn QuoteSource>,
    cache: DashMap<PriorityLevel, U256>,
    retry_delay: Duration,
}

impl GasOracle {
    pub fn new(source: Box<dyn QuoteSource>, retry_delay: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            retry_delay,
        }
    }

    /// Current price for a level, in wei.
    ///
    /// A failed fetch serves the cached quote for that level when one
    /// exists; with a cold cache it retries with a fixed delay until the
    /// source recovers, so this never returns an error. Callers that need a
    /// bound should wrap it in their own timeout.
    pub async fn price(&self, level: PriorityLevel) -> U256 {
        loop {
            match self.source.fetch().await {
                Ok(quote) => {
                    let wei = quote.wei(level);
                    self.cache.insert(level, wei);
                    debug!("gas price for {level}: {wei} wei");
                    return wei;
                }
                Err(e) => {
                    if let Some(cached) = self.cache.get(&level) {
                        warn!("gas price fetch failed ({e}), serving cached {level} quote");
                        return *cached;
                    }
                    warn!("no cached gas price for {level} and fetch failed ({e}), retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    const GWEI: u64 = 1_000_000_000;

    fn quote(fast: f64) -> GasQuote {
        GasQuote {
            safe_low: 10.0,
            average: 100.0,
            fast,
            fastest: 900.0,
        }
    }

    #[test]
    fn converts_tenths_of_gwei_to_wei() {
        let quote = quote(420.0);
        assert_eq!(quote.wei(PriorityLevel::Fast), U256::from(42 * GWEI));
        assert_eq!(quote.wei(PriorityLevel::Lowest), U256::from(GWEI));
    }

    #[test]
    fn unknown_level_falls_back_to_fast() {
        assert_eq!(PriorityLevel::parse("warp"), PriorityLevel::Fast);
        assert_eq!(PriorityLevel::parse(""), PriorityLevel::Fast);
        assert_eq!(PriorityLevel::parse("average"), PriorityLevel::Average);
        assert_eq!(PriorityLevel::parse("lowest"), PriorityLevel::Lowest);
    }

    #[tokio::test]
    async fn serves_cached_quote_when_fetch_fails() {
        let mut source = MockQuoteSource::new();
        let mut seq = Sequence::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(quote(420.0)));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ToolError::GasOracle("upstream down".to_string())));

        let oracle = GasOracle::new(Box::new(source), Duration::from_millis(10));
        assert_eq!(oracle.price(PriorityLevel::Fast).await, U256::from(42 * GWEI));
        // Second call fails upstream but the cached quote survives.
        assert_eq!(oracle.price(PriorityLevel::Fast).await, U256::from(42 * GWEI));
    }

    #[tokio::test(start_paused = true)]
    async fn cold_cache_miss_retries_until_success() {
        let mut source = MockQuoteSource::new();
        let mut seq = Sequence::new();
        for _ in 0..2 {
            source
                .expect_fetch()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Err(ToolError::GasOracle("upstream down".to_string())));
        }
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(quote(300.0)));

        let oracle = GasOracle::new(Box::new(source), Duration::from_millis(10));
        assert_eq!(oracle.price(PriorityLevel::Fast).await, U256::from(30 * GWEI));
    }

    #[tokio::test]
    async fn cache_is_per_level() {
        let mut source = MockQuoteSource::new();
        let mut seq = Sequence::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(quote(420.0)));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ToolError::GasOracle("upstream down".to_string())));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(quote(500.0)));

        let oracle = GasOracle::new(Box::new(source), Duration::from_millis(10));
        assert_eq!(oracle.price(PriorityLevel::Fast).await, U256::from(42 * GWEI));
        // Fastest was never fetched, so the failure forces a retry rather
        // than serving the fast-level cache.
        assert_eq!(
            oracle.price(PriorityLevel::Fastest).await,
            U256::from(90 * GWEI)
        );
    }
}
