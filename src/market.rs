//! Hyperliquid info API (read-only market and account data).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::http::JsonFetcher;

pub const DEFAULT_API_URL: &str = "https://api.hyperliquid.xyz";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub coin: String,
    pub szi: String,
    pub entry_px: Option<String>,
    pub position_value: String,
    pub unrealized_pnl: String,
    pub return_on_equity: String,
    #[serde(default)]
    pub liquidation_px: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: Position,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
    pub total_margin_used: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub asset_positions: Vec<AssetPosition>,
    pub margin_summary: MarginSummary,
    #[serde(default)]
    pub withdrawable: Option<String>,
}

impl ClearinghouseState {
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.asset_positions.iter().map(|ap| &ap.position)
    }
}

/// Market-data collaborator used by the trading module
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Account state (positions and margin) for a wallet address
    async fn account(&self, wallet: &str) -> Result<ClearinghouseState, CollaboratorError>;

    /// Mid prices keyed by coin symbol
    async fn mids(&self) -> Result<HashMap<String, f64>, CollaboratorError>;
}

pub struct HyperliquidInfo {
    fetcher: Arc<dyn JsonFetcher>,
    info_url: String,
}

impl HyperliquidInfo {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, api_url: &str) -> Self {
        Self {
            fetcher,
            info_url: format!("{}/info", api_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl MarketData for HyperliquidInfo {
    async fn account(&self, wallet: &str) -> Result<ClearinghouseState, CollaboratorError> {
        let body = serde_json::json!({"type": "clearinghouseState", "user": wallet});
        let value = self.fetcher.fetch_json(&self.info_url, Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn mids(&self) -> Result<HashMap<String, f64>, CollaboratorError> {
        let body = serde_json::json!({"type": "allMids"});
        let value = self.fetcher.fetch_json(&self.info_url, Some(body)).await?;
        let raw: HashMap<String, String> = serde_json::from_value(value)?;
        Ok(raw
            .into_iter()
            .filter_map(|(coin, px)| px.parse().ok().map(|v| (coin, v)))
            .collect())
    }
}
