//! Seed x scenario sweep comparing the swarm against the baseline trader.
//!
//! Usage: cargo run --release --bin sweep -- [seeds] [hours]

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use swarmfx::config::SwarmConfig;
use swarmfx::events::NullEventSink;
use swarmfx::logging::Logger;
use swarmfx::market::{generate, Scenario};
use swarmfx::metrics::SimulationReport;
use swarmfx::simulation::Simulation;

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn main() {
    let seeds: u64 = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(5);
    let hours: usize = std::env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(720);
    let base = SwarmConfig::from_env();

    println!("Sweeping {} scenarios x {} seeds, {} hours each", Scenario::ALL.len(), seeds, hours);
    println!();
    println!(
        "{:<10} {:>10} {:>10} {:>10} {:>10} {:>9} {:>8}",
        "scenario", "swarm_roi", "sharpe", "base_roi", "max_dd", "mutations", "wins"
    );

    let start = Instant::now();
    for scenario in Scenario::ALL {
        let mut reports: Vec<SimulationReport> = Vec::new();
        for seed in 0..seeds {
            let cfg = SwarmConfig {
                seed,
                scenario,
                ..base.clone()
            };
            let market = generate(scenario, hours, cfg.start_price, &mut StdRng::seed_from_u64(seed));
            let mut sim = Simulation::new(cfg, Logger::null(), Arc::new(NullEventSink));
            reports.push(sim.run(&market));
        }
        let roi: Vec<f64> = reports.iter().map(|r| r.swarm_roi).collect();
        let sharpe: Vec<f64> = reports.iter().map(|r| r.swarm_sharpe).collect();
        let base_roi: Vec<f64> = reports.iter().map(|r| r.baseline_roi).collect();
        let dd: Vec<f64> = reports.iter().map(|r| r.max_drawdown).collect();
        let muts: Vec<f64> = reports.iter().map(|r| r.mutations as f64).collect();
        let wins = reports.iter().filter(|r| r.swarm_roi > r.baseline_roi).count();
        println!(
            "{:<10} {:>10.4} {:>10.3} {:>10.4} {:>10.4} {:>9.0} {:>5}/{}",
            scenario.as_str(),
            mean(&roi),
            mean(&sharpe),
            mean(&base_roi),
            mean(&dd),
            mean(&muts),
            wins,
            seeds
        );
    }
    println!();
    println!("Done in {:.2?}", start.elapsed());
}
