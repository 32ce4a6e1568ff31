//! Market load: the normalized per-cycle input handed to every block.
//!
//! Loads arrive from collaborators as loose JSON. Missing or non-finite
//! indicator fields fall back to defaults (rsi=50, sma_signal=0,
//! volatility=0.02, external_index=100) instead of failing; only the price
//! is required, and only by blocks that trade on it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

pub const DEFAULT_RSI: f64 = 50.0;
pub const DEFAULT_SMA_SIGNAL: i8 = 0;
pub const DEFAULT_VOLATILITY: f64 = 0.02;
pub const DEFAULT_EXTERNAL_INDEX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketLoad {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub rsi: f64,
    /// -1 bearish, 0 flat, +1 bullish.
    pub sma_signal: i8,
    pub volatility: f64,
    pub external_index: f64,
}

impl Default for MarketLoad {
    fn default() -> Self {
        Self {
            price: None,
            rsi: DEFAULT_RSI,
            sma_signal: DEFAULT_SMA_SIGNAL,
            volatility: DEFAULT_VOLATILITY,
            external_index: DEFAULT_EXTERNAL_INDEX,
        }
    }
}

impl MarketLoad {
    pub fn new(price: f64, rsi: f64, sma_signal: i8, volatility: f64, external_index: f64) -> Self {
        Self {
            price: Some(price),
            rsi,
            sma_signal,
            volatility,
            external_index,
        }
        .sanitized()
    }

    /// Neutral synthetic load used by block repair.
    pub fn neutral(price: f64) -> Self {
        Self {
            price: Some(price),
            ..Self::default()
        }
    }

    /// Lenient parse: keys are optional, wrong-typed values are treated as
    /// missing. Only syntactically invalid JSON or a non-object is an error.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedMessage("market load is not an object".into()))?;
        let num = |key: &str| map.get(key).and_then(Value::as_f64);
        let load = Self {
            price: num("price"),
            rsi: num("rsi").unwrap_or(DEFAULT_RSI),
            sma_signal: num("sma_signal")
                .map(|s| if s > 0.0 { 1 } else if s < 0.0 { -1 } else { 0 })
                .unwrap_or(DEFAULT_SMA_SIGNAL),
            volatility: num("volatility").unwrap_or(DEFAULT_VOLATILITY),
            external_index: num("external_index").unwrap_or(DEFAULT_EXTERNAL_INDEX),
        };
        Ok(load.sanitized())
    }

    /// Replace non-finite fields with defaults, clamp rsi to [0, 100],
    /// volatility to >= 0 and the signal to {-1, 0, 1}.
    pub fn sanitized(mut self) -> Self {
        if !self.rsi.is_finite() {
            self.rsi = DEFAULT_RSI;
        }
        self.rsi = self.rsi.clamp(0.0, 100.0);
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            self.volatility = DEFAULT_VOLATILITY;
        }
        if !self.external_index.is_finite() {
            self.external_index = DEFAULT_EXTERNAL_INDEX;
        }
        self.sma_signal = self.sma_signal.signum();
        self
    }

    /// Price required for trading; absent or non-positive prices are errors.
    pub fn price(&self) -> Result<f64> {
        match self.price {
            None => Err(CoreError::MissingPrice),
            Some(p) if !p.is_finite() || p <= 0.0 => Err(CoreError::InvalidPrice(p)),
            Some(p) => Ok(p),
        }
    }
}
