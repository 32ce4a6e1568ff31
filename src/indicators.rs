//! Incremental indicators over a price series.
//!
//! Both report a neutral value during warmup so that every cycle, from the
//! first, yields a complete market load.

use std::collections::VecDeque;

/// Simple moving average. Until the window is full it reports the latest
/// price rather than a partial mean.
#[derive(Debug, Clone)]
pub struct Sma {
    window: VecDeque<f64>,
    period: usize,
    sum: f64,
    last: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(period + 1),
            period: period.max(1),
            sum: 0.0,
            last: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        self.last = price;
        self.sum += price;
        self.window.push_back(price);
        if self.window.len() > self.period {
            self.sum -= self.window.pop_front().unwrap_or(0.0);
        }
        self.get()
    }

    pub fn get(&self) -> f64 {
        if self.is_ready() {
            self.sum / self.period as f64
        } else {
            self.last
        }
    }

    pub fn is_ready(&self) -> bool {
        self.window.len() >= self.period
    }
}

/// Relative strength index over the last `period` price changes, using
/// plain averages of gains and losses. Reports 50 until `period` changes
/// have been seen. With no losses in the window, RS is taken as 100.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    changes: VecDeque<f64>,
    prev_price: Option<f64>,
    seen: usize,
}

impl Rsi {
    pub const NEUTRAL: f64 = 50.0;
    const FLAT_RS: f64 = 100.0;

    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            changes: VecDeque::with_capacity(period + 1),
            prev_price: None,
            seen: 0,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        if let Some(prev) = self.prev_price {
            self.changes.push_back(price - prev);
            if self.changes.len() > self.period {
                self.changes.pop_front();
            }
        }
        self.prev_price = Some(price);
        self.seen += 1;
        self.get()
    }

    pub fn get(&self) -> f64 {
        // warmup covers the first `period` prices
        if self.seen <= self.period {
            return Self::NEUTRAL;
        }
        let n = self.period as f64;
        let gain: f64 = self.changes.iter().filter(|c| **c > 0.0).sum::<f64>() / n;
        let loss: f64 = -self.changes.iter().filter(|c| **c < 0.0).sum::<f64>() / n;
        let rs = if loss > 0.0 { gain / loss } else { Self::FLAT_RS };
        100.0 - 100.0 / (1.0 + rs)
    }

    pub fn is_ready(&self) -> bool {
        self.seen > self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_warmup_tracks_price() {
        let mut sma = Sma::new(3);
        assert_eq!(sma.update(10.0), 10.0);
        assert_eq!(sma.update(20.0), 20.0);
        assert_eq!(sma.update(30.0), 20.0);
        assert_eq!(sma.update(40.0), 30.0);
        assert!(sma.is_ready());
    }

    #[test]
    fn rsi_neutral_during_warmup() {
        let mut rsi = Rsi::new(14);
        for i in 0..14 {
            assert_eq!(rsi.update(100.0 + i as f64), 50.0);
        }
        assert!(!rsi.is_ready());
    }

    #[test]
    fn rsi_extremes() {
        let mut up = Rsi::new(14);
        let mut down = Rsi::new(14);
        let mut last_up = 0.0;
        let mut last_down = 100.0;
        for i in 0..30 {
            last_up = up.update(100.0 + i as f64);
            last_down = down.update(100.0 - i as f64);
        }
        assert!(last_up > 99.0);
        assert!(last_down < 1e-9);
    }

    #[test]
    fn rsi_balanced_is_fifty() {
        let mut rsi = Rsi::new(4);
        let mut v = 0.0;
        for p in [100.0, 101.0, 100.0, 101.0, 100.0, 101.0] {
            v = rsi.update(p);
        }
        assert!((v - 50.0).abs() < 1e-9);
    }
}
