//! Async outer loop. Pulls loads from a feed, steps the synchronous
//! simulation and persists block rows; the engine itself never awaits.

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::{sleep, Duration};

use crate::feed::retry::{retry_async, RetryConfig};
use crate::feed::LoadFeed;
use crate::logging::{obj, v_num, v_str, Domain};
use crate::metrics::SimulationReport;
use crate::simulation::{RunTracker, Simulation};
use crate::storage::LedgerStore;

/// Run until the feed ends or `config.cycles` cycles have been stepped.
/// A feed read that still fails after retries ends the run with an error;
/// a failed ledger write is logged and the run continues.
pub async fn run<F>(
    sim: &mut Simulation,
    feed: &mut F,
    mut store: Option<&mut LedgerStore>,
    interval: Duration,
    retry: &RetryConfig,
) -> Result<SimulationReport>
where
    F: LoadFeed + ?Sized,
{
    let logger = sim.logger().clone();
    let max_cycles = sim.config().cycles;
    let scenario = sim.config().scenario.as_str();
    let mut tracker = RunTracker::new(sim.config());

    logger.info(
        Domain::System,
        "driver_start",
        obj(&[
            ("max_cycles", json!(max_cycles)),
            ("interval_ms", json!(interval.as_millis() as u64)),
            ("persist", json!(store.is_some())),
        ]),
    );

    while (tracker.cycles() as u64) < max_cycles {
        let next = retry_async(retry, &logger, "next_load", &mut *feed, |f| f.next_load())
            .await
            .context("market feed failed")?;
        let load = match next {
            Some(l) => l,
            None => break,
        };

        let outcome = sim.step(&load);
        tracker.observe(sim, &load);

        if let Some(store) = store.as_deref_mut() {
            if let Err(err) = store.record_cycle(outcome.cycle, sim.blocks()) {
                logger.error(
                    Domain::System,
                    "persist_failed",
                    obj(&[("cycle", json!(outcome.cycle)), ("error", v_str(&err.to_string()))]),
                );
            }
        }

        if !interval.is_zero() {
            sleep(interval).await;
        }
    }

    let report = tracker.finish(sim, scenario);
    logger.info(
        Domain::System,
        "driver_stop",
        obj(&[
            ("cycles", json!(report.cycles)),
            ("swarm_roi", v_num(report.swarm_roi)),
            ("baseline_roi", v_num(report.baseline_roi)),
            ("state_hash", v_str(&report.final_state_hash)),
        ]),
    );
    Ok(report)
}
