//! Read-only trading commands: positions, balance and mid prices.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{CapabilityModule, ModuleDescriptor};
use crate::context::ConversationContext;
use crate::error::ModuleError;
use crate::market::{ClearinghouseState, MarketData};

static POSITIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/positions?(?:@\w+)?(?:\s+(0x[0-9a-fA-F]{40}))?$").unwrap()
});
static BALANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/balance(?:@\w+)?(?:\s+(0x[0-9a-fA-F]{40}))?$").unwrap()
});
static PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/price(?:@\w+)?\s+([A-Za-z0-9]{1,12})$").unwrap());

/// Metadata key a caller can set to pin a wallet to a conversation
pub const WALLET_METADATA_KEY: &str = "wallet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingCommand {
    Positions { wallet: Option<String> },
    Balance { wallet: Option<String> },
    Price { coin: String },
}

impl TradingCommand {
    /// Recognise a trading command; `None` for anything else
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(caps) = POSITIONS.captures(text) {
            return Some(Self::Positions {
                wallet: caps.get(1).map(|m| m.as_str().to_string()),
            });
        }
        if let Some(caps) = BALANCE.captures(text) {
            return Some(Self::Balance {
                wallet: caps.get(1).map(|m| m.as_str().to_string()),
            });
        }
        PRICE.captures(text).and_then(|caps| {
            caps.get(1).map(|m| Self::Price {
                coin: m.as_str().to_uppercase(),
            })
        })
    }
}

pub struct TradingModule {
    descriptor: ModuleDescriptor,
    market: Arc<dyn MarketData>,
    default_wallet: Option<String>,
}

impl TradingModule {
    pub fn new(market: Arc<dyn MarketData>, default_wallet: Option<String>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(
                "Trading",
                "/position, /balance [wallet], /price <COIN>: Hyperliquid account and market data",
                10,
            ),
            market,
            default_wallet,
        }
    }

    fn resolve_wallet(
        &self,
        explicit: Option<String>,
        ctx: &ConversationContext,
    ) -> Result<String, ModuleError> {
        explicit
            .or_else(|| ctx.metadata_str(WALLET_METADATA_KEY).map(str::to_string))
            .or_else(|| self.default_wallet.clone())
            .ok_or_else(|| ModuleError::InvalidInput("no wallet address configured".to_string()))
    }
}

#[async_trait]
impl CapabilityModule for TradingModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, text: &str, _ctx: &ConversationContext) -> Result<bool, ModuleError> {
        Ok(TradingCommand::parse(text).is_some())
    }

    async fn handle(&self, text: &str, ctx: &ConversationContext) -> Result<String, ModuleError> {
        let command = TradingCommand::parse(text)
            .ok_or_else(|| ModuleError::InvalidInput("not a trading command".to_string()))?;

        match command {
            TradingCommand::Positions { wallet } => {
                let wallet = self.resolve_wallet(wallet, ctx)?;
                let state = self.market.account(&wallet).await?;
                info!(wallet = %short_wallet(&wallet), positions = state.asset_positions.len(), "positions fetched");
                Ok(format_positions(&wallet, &state))
            }
            TradingCommand::Balance { wallet } => {
                let wallet = self.resolve_wallet(wallet, ctx)?;
                let state = self.market.account(&wallet).await?;
                Ok(format_balance(&wallet, &state))
            }
            TradingCommand::Price { coin } => {
                let mids = self.market.mids().await?;
                let price = mids
                    .get(&coin)
                    .ok_or_else(|| ModuleError::InvalidInput(format!("unknown coin: {coin}")))?;
                Ok(format!("{coin} mid price: ${}", format_price(*price)))
            }
        }
    }
}

fn parse_num(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

fn short_wallet(wallet: &str) -> String {
    if wallet.len() > 12 && wallet.is_ascii() {
        format!("{}…{}", &wallet[..6], &wallet[wallet.len() - 4..])
    } else {
        wallet.to_string()
    }
}

pub fn format_price(price: f64) -> String {
    if price >= 10000.0 {
        format!("{:.1}", price)
    } else if price >= 1000.0 {
        format!("{:.2}", price)
    } else if price >= 1.0 {
        format!("{:.4}", price)
    } else {
        format!("{:.6}", price)
    }
}

pub fn format_usd(value: f64) -> String {
    if value < 0.0 {
        format!("-${:.2}", value.abs())
    } else {
        format!("${:.2}", value)
    }
}

fn format_signed_usd(value: f64) -> String {
    if value > 0.0 {
        format!("+{}", format_usd(value))
    } else {
        format_usd(value)
    }
}

fn format_positions(wallet: &str, state: &ClearinghouseState) -> String {
    let mut lines = vec![format!("Positions for {}", short_wallet(wallet))];

    let positions: Vec<_> = state.positions().collect();
    if positions.is_empty() {
        lines.push("No open positions.".to_string());
    }
    for p in positions {
        let size = parse_num(&p.szi);
        let side = if size < 0.0 { "SHORT" } else { "LONG" };
        let entry = p
            .entry_px
            .as_deref()
            .map(|px| format_price(parse_num(px)))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!("{} {} {} @ {}", p.coin, side, size.abs(), entry));
        lines.push(format!(
            "  value {} | uPnL {} ({:.2}%)",
            format_usd(parse_num(&p.position_value)),
            format_signed_usd(parse_num(&p.unrealized_pnl)),
            parse_num(&p.return_on_equity) * 100.0
        ));
    }

    lines.push(format!(
        "Account value {} | margin used {}",
        format_usd(parse_num(&state.margin_summary.account_value)),
        format_usd(parse_num(&state.margin_summary.total_margin_used))
    ));
    lines.join("\n")
}

fn format_balance(wallet: &str, state: &ClearinghouseState) -> String {
    let mut text = format!(
        "Balance for {}\nAccount value {}\nMargin used {}",
        short_wallet(wallet),
        format_usd(parse_num(&state.margin_summary.account_value)),
        format_usd(parse_num(&state.margin_summary.total_margin_used)),
    );
    if let Some(w) = &state.withdrawable {
        text.push_str(&format!("\nWithdrawable {}", format_usd(parse_num(w))));
    }
    text
}
