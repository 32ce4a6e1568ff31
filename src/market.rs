//! Synthetic market: hourly price paths with RSI(14), SMA(50), an external
//! index and a volatility reading, packaged as [`MarketLoad`]s.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::indicators::{Rsi, Sma};
use crate::load::MarketLoad;

pub const RSI_PERIOD: usize = 14;
pub const SMA_PERIOD: usize = 50;
pub const START_INDEX: f64 = 100.0;
/// Hourly return noise of the cyclic walk.
pub const CYCLIC_PRICE_SIGMA: f64 = 0.01;
pub const CYCLIC_INDEX_SIGMA: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Gaussian walk with a daily sine drift; indicators computed from price.
    Cyclic,
    Stable,
    Bullish,
    /// Twelve hours of heavy losses, then a flat tape.
    Crash,
    /// Rally for 240h, correction until 360h, slow recovery after.
    Volatile,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Cyclic,
        Scenario::Stable,
        Scenario::Bullish,
        Scenario::Crash,
        Scenario::Volatile,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|sc| sc.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Cyclic => "cyclic",
            Scenario::Stable => "stable",
            Scenario::Bullish => "bullish",
            Scenario::Crash => "crash",
            Scenario::Volatile => "volatile",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSeries {
    pub scenario: Scenario,
    pub loads: Vec<MarketLoad>,
}

impl MarketSeries {
    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.loads.iter().filter_map(|l| l.price)
    }

    pub fn last_price(&self) -> Option<f64> {
        self.loads.iter().rev().find_map(|l| l.price)
    }
}

/// One hour of scenario-driven movement.
struct Step {
    price_mult: f64,
    /// Scenario-imposed RSI; `None` computes it from the price path.
    rsi: Option<f64>,
    volatility: f64,
    index_delta: IndexMove,
}

enum IndexMove {
    Mult(f64),
    Add(f64),
}

fn step<R: Rng + ?Sized>(scenario: Scenario, hour: usize, rng: &mut R) -> Step {
    let t = hour as f64;
    match scenario {
        Scenario::Cyclic => {
            let drift = (t / 24.0).sin();
            let price_noise = Normal::new(0.0, CYCLIC_PRICE_SIGMA).map_or(0.0, |n| n.sample(rng));
            let volatility = 0.02 + 0.03 * rng.gen::<f64>();
            let index_noise = Normal::new(0.0, CYCLIC_INDEX_SIGMA).map_or(0.0, |n| n.sample(rng));
            Step {
                price_mult: 1.0 + price_noise + 0.0005 * drift,
                rsi: None,
                volatility,
                index_delta: IndexMove::Mult(1.0 + index_noise - 0.0002 * drift),
            }
        }
        Scenario::Stable => Step {
            price_mult: rng.gen_range(0.98..1.02),
            rsi: Some(rng.gen_range(40.0..60.0)),
            volatility: 0.01,
            index_delta: IndexMove::Add(rng.gen_range(-0.1..0.1)),
        },
        Scenario::Bullish => Step {
            price_mult: rng.gen_range(1.02..1.05),
            rsi: Some(rng.gen_range(60.0..80.0)),
            volatility: 0.05,
            index_delta: IndexMove::Add(-rng.gen_range(0.05..0.1)),
        },
        Scenario::Crash => {
            let early = hour < 12;
            Step {
                price_mult: if early { rng.gen_range(0.85..0.95) } else { rng.gen_range(0.98..1.02) },
                rsi: Some(rng.gen_range(20.0..40.0)),
                volatility: if early { 0.1 } else { 0.02 },
                index_delta: IndexMove::Add(rng.gen_range(0.1..0.2)),
            }
        }
        Scenario::Volatile if hour < 240 => Step {
            price_mult: rng.gen_range(1.01..1.03),
            rsi: Some(rng.gen_range(60.0..75.0)),
            volatility: 0.04,
            index_delta: IndexMove::Add(-rng.gen_range(0.02..0.05)),
        },
        Scenario::Volatile if hour < 360 => Step {
            price_mult: rng.gen_range(0.90..0.95),
            rsi: Some(rng.gen_range(25.0..40.0)),
            volatility: 0.06,
            index_delta: IndexMove::Add(rng.gen_range(0.05..0.1)),
        },
        Scenario::Volatile => Step {
            price_mult: rng.gen_range(1.00..1.02),
            rsi: Some(rng.gen_range(45.0..55.0)),
            volatility: 0.02,
            index_delta: IndexMove::Add(-rng.gen_range(0.01..0.03)),
        },
    }
}

/// Generate `hours` loads. The first load sits at `start_price` and index
/// 100; each later one applies one scenario step.
pub fn generate<R: Rng + ?Sized>(scenario: Scenario, hours: usize, start_price: f64, rng: &mut R) -> MarketSeries {
    let mut rsi = Rsi::new(RSI_PERIOD);
    let mut sma = Sma::new(SMA_PERIOD);
    let mut price = start_price;
    let mut index = START_INDEX;
    let mut loads = Vec::with_capacity(hours);

    for hour in 0..hours {
        let s = step(scenario, hour, rng);
        if hour > 0 {
            price = (price * s.price_mult).max(f64::MIN_POSITIVE);
            index = match s.index_delta {
                IndexMove::Mult(m) => index * m,
                IndexMove::Add(d) => index + d,
            };
        }
        let computed_rsi = rsi.update(price);
        let avg = sma.update(price);
        let sma_signal = if price > avg { 1 } else { -1 };
        loads.push(MarketLoad::new(
            price,
            s.rsi.unwrap_or(computed_rsi),
            sma_signal,
            s.volatility,
            index,
        ));
    }
    MarketSeries { scenario, loads }
}
