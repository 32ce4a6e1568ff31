//! Run-level metrics and the final comparison report.

use serde::{Deserialize, Serialize};

/// Floor on the return dispersion in [`sharpe`].
pub const SHARPE_DISPERSION_FLOOR: f64 = 1e-4;

/// Mean return over `sqrt(sum of squared deviations) / n`, with the
/// denominator floored. Zero for an empty series.
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let dispersion = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>().sqrt() / n;
    mean / dispersion.max(SHARPE_DISPERSION_FLOOR)
}

/// Swarm-wide event counters, accumulated by the simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub entity_mutations: u64,
    pub collective_mutations: u64,
    pub global_mutations: u64,
    pub repairs: u64,
    pub health_adjustments: u64,
    pub message_nudges: u64,
    pub stop_losses: u64,
    pub trades: u64,
    pub publish_failures: u64,
    pub block_errors: u64,
}

impl Counters {
    /// Mutation events of every kind; a swarm-wide mutation counts once.
    pub fn mutations(&self) -> u64 {
        self.entity_mutations + self.collective_mutations + self.global_mutations + self.repairs
    }
}

/// Per-cycle accumulator. Drawdown is tracked two ways: against initial
/// capital per block, and peak-to-trough on mean swarm equity.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    initial_capital: f64,
    swarm_returns: Vec<f64>,
    baseline_returns: Vec<f64>,
    max_drawdown: f64,
    equity_peak: f64,
    max_peak_drawdown: f64,
    max_relations: usize,
    entanglement_sum: f64,
}

impl MetricsRecorder {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            swarm_returns: Vec::new(),
            baseline_returns: Vec::new(),
            max_drawdown: 0.0,
            equity_peak: initial_capital,
            max_peak_drawdown: 0.0,
            max_relations: 0,
            entanglement_sum: 0.0,
        }
    }

    pub fn cycles(&self) -> usize {
        self.swarm_returns.len()
    }

    pub fn record_cycle(
        &mut self,
        block_equities: &[f64],
        baseline_fitness: f64,
        relations: usize,
        mean_entanglement: f64,
    ) {
        let init = self.initial_capital;
        if init > 0.0 {
            for eq in block_equities {
                self.max_drawdown = self.max_drawdown.max((init - eq) / init);
            }
        }
        let mean_equity = if block_equities.is_empty() {
            init
        } else {
            block_equities.iter().sum::<f64>() / block_equities.len() as f64
        };
        if mean_equity > self.equity_peak {
            self.equity_peak = mean_equity;
        }
        if self.equity_peak > 0.0 {
            let dd = (self.equity_peak - mean_equity) / self.equity_peak;
            self.max_peak_drawdown = self.max_peak_drawdown.max(dd);
        }
        self.swarm_returns
            .push(if init > 0.0 { (mean_equity - init) / init } else { 0.0 });
        self.baseline_returns.push(baseline_fitness);
        self.max_relations = self.max_relations.max(relations);
        self.entanglement_sum += mean_entanglement;
    }

    pub fn finish(&self, inputs: ReportInputs) -> SimulationReport {
        let init = self.initial_capital;
        let roi = |final_capital: f64| if init > 0.0 { (final_capital - init) / init } else { 0.0 };
        let cycles = self.cycles();
        SimulationReport {
            scenario: inputs.scenario,
            cycles,
            initial_capital: init,
            swarm_roi: roi(inputs.final_mean_capital),
            swarm_sharpe: sharpe(&self.swarm_returns),
            max_drawdown: self.max_drawdown,
            max_peak_drawdown: self.max_peak_drawdown,
            final_mean_capital: inputs.final_mean_capital,
            mutations: inputs.counters.mutations(),
            counters: inputs.counters,
            max_relations: self.max_relations,
            mean_entanglement: if cycles > 0 {
                self.entanglement_sum / cycles as f64
            } else {
                0.0
            },
            baseline_roi: roi(inputs.baseline_final_capital),
            baseline_sharpe: sharpe(&self.baseline_returns),
            baseline_final_capital: inputs.baseline_final_capital,
            final_state_hash: inputs.state_hash,
        }
    }
}

pub struct ReportInputs {
    pub scenario: String,
    pub final_mean_capital: f64,
    pub baseline_final_capital: f64,
    pub counters: Counters,
    pub state_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub cycles: usize,
    pub initial_capital: f64,
    pub swarm_roi: f64,
    pub swarm_sharpe: f64,
    pub max_drawdown: f64,
    pub max_peak_drawdown: f64,
    pub final_mean_capital: f64,
    pub mutations: u64,
    pub counters: Counters,
    pub max_relations: usize,
    pub mean_entanglement: f64,
    pub baseline_roi: f64,
    pub baseline_sharpe: f64,
    pub baseline_final_capital: f64,
    pub final_state_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpe_floor_on_flat_returns() {
        assert_eq!(sharpe(&[]), 0.0);
        let flat = [0.01; 10];
        assert!((sharpe(&flat) - 0.01 / SHARPE_DISPERSION_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn drawdowns() {
        let mut m = MetricsRecorder::new(100.0);
        m.record_cycle(&[110.0, 100.0], 0.0, 1, 2.0);
        m.record_cycle(&[90.0, 80.0], 0.0, 3, 4.0);
        // block at 80 is 20% under initial; mean fell 105 -> 85
        assert!((m.max_drawdown - 0.2).abs() < 1e-12);
        assert!((m.max_peak_drawdown - 20.0 / 105.0).abs() < 1e-12);

        let report = m.finish(ReportInputs {
            scenario: "test".into(),
            final_mean_capital: 85.0,
            baseline_final_capital: 100.0,
            counters: Counters::default(),
            state_hash: String::new(),
        });
        assert_eq!(report.cycles, 2);
        assert_eq!(report.max_relations, 3);
        assert!((report.mean_entanglement - 3.0).abs() < 1e-12);
        assert!((report.swarm_roi + 0.15).abs() < 1e-12);
        assert_eq!(report.baseline_roi, 0.0);
    }
}
