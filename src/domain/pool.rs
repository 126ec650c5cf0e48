//! Token and pool metadata needed to value position events.

use crate::domain::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub id: i64,
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    pub decimals: u32,
}

/// Which pool token valuations are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteToken {
    Token0,
    Token1,
}

impl QuoteToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteToken::Token0 => "token0",
            QuoteToken::Token1 => "token1",
        }
    }
}

impl fmt::Display for QuoteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token0" => Ok(QuoteToken::Token0),
            "token1" => Ok(QuoteToken::Token1),
            other => Err(format!("unknown quote token: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetadata {
    pub id: i64,
    pub chain_id: u64,
    pub address: Address,
    pub token0: TokenMetadata,
    pub token1: TokenMetadata,
    /// Fee tier in hundredths of a basis point.
    pub fee: u32,
    pub quote_token: QuoteToken,
}

impl PoolMetadata {
    pub fn quote(&self) -> &TokenMetadata {
        match self.quote_token {
            QuoteToken::Token0 => &self.token0,
            QuoteToken::Token1 => &self.token1,
        }
    }

    pub fn base(&self) -> &TokenMetadata {
        match self.quote_token {
            QuoteToken::Token0 => &self.token1,
            QuoteToken::Token1 => &self.token0,
        }
    }
}

/// Pool price at a block, as used to value one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub sqrt_price_x96: Amount,
    /// Block the price was actually read at.
    pub block_number: u64,
    pub timestamp: i64,
    /// True when the exact historic block was unavailable and a later block was used.
    pub degraded: bool,
}
