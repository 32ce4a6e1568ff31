//! Traditional RSI/SMA trader run alongside the swarm for comparison.

use crate::load::MarketLoad;

#[derive(Debug, Clone)]
pub struct BaselineTrader {
    pub capital: f64,
    pub position: f64,
    initial_capital: f64,
    buy_fraction: f64,
    last_price: Option<f64>,
}

impl BaselineTrader {
    pub fn new(initial_capital: f64, buy_fraction: f64) -> Self {
        Self {
            capital: initial_capital,
            position: 0.0,
            initial_capital,
            buy_fraction: buy_fraction.clamp(0.0, 1.0),
            last_price: None,
        }
    }

    /// Buy a fraction of capital on oversold + bullish, dump everything on
    /// overbought + bearish. Returns fitness at this load's price; loads
    /// without a price only re-mark at the last one.
    pub fn process(&mut self, load: &MarketLoad) -> f64 {
        let price = match load.price() {
            Ok(p) => p,
            Err(_) => return self.last_price.map_or(0.0, |p| self.fitness(p)),
        };
        if load.rsi < 30.0 && load.sma_signal == 1 && self.capital > 0.0 {
            let spend = self.capital * self.buy_fraction;
            self.position += spend / price;
            self.capital = (self.capital - spend).max(0.0);
        } else if load.rsi > 70.0 && load.sma_signal == -1 && self.position > 0.0 {
            self.capital += self.position * price;
            self.position = 0.0;
        }
        self.last_price = Some(price);
        self.fitness(price)
    }

    pub fn equity(&self, price: f64) -> f64 {
        self.capital + self.position * price
    }

    pub fn fitness(&self, price: f64) -> f64 {
        if self.initial_capital <= 0.0 {
            return 0.0;
        }
        (self.equity(price) - self.initial_capital) / self.initial_capital
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buys_then_sells() {
        let mut t = BaselineTrader::new(10_000.0, 0.1);
        t.process(&MarketLoad::new(100.0, 25.0, 1, 0.02, 100.0));
        assert!((t.position - 10.0).abs() < 1e-9);
        assert!((t.capital - 9_000.0).abs() < 1e-9);
        let f = t.process(&MarketLoad::new(200.0, 75.0, -1, 0.02, 100.0));
        assert_eq!(t.position, 0.0);
        assert!((t.capital - 11_000.0).abs() < 1e-9);
        assert!((f - 0.1).abs() < 1e-12);
    }

    #[test]
    fn priceless_load_holds() {
        let mut t = BaselineTrader::new(10_000.0, 0.1);
        assert_eq!(t.process(&MarketLoad::default()), 0.0);
        assert_eq!(t.capital, 10_000.0);
    }
}
