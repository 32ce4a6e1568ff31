use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tokio::time::Duration;

use swarmfx::config::SwarmConfig;
use swarmfx::driver;
use swarmfx::events::{EventSink, JsonlEventSink, NullEventSink};
use swarmfx::feed::retry::RetryConfig;
use swarmfx::feed::{LoadFeed, ReplayFeed, SyntheticFeed};
use swarmfx::logging::{obj, v_str, Domain, Logger};
use swarmfx::market;
use swarmfx::simulation::Simulation;
use swarmfx::storage::LedgerStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = SwarmConfig::from_env();
    let logger = Logger::from_env();

    // channel traffic lands next to the run's logs
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
    let channels_path = Path::new(&log_dir).join(logger.run_id()).join("channels.jsonl");
    let sink: Arc<dyn EventSink> = match JsonlEventSink::create(&channels_path) {
        Ok(s) => Arc::new(s),
        Err(err) => {
            logger.warn(
                Domain::System,
                "channel_sink_unavailable",
                obj(&[
                    ("path", v_str(&channels_path.display().to_string())),
                    ("error", v_str(&err.to_string())),
                ]),
            );
            Arc::new(NullEventSink)
        }
    };

    let mut feed: Box<dyn LoadFeed> = match &cfg.replay_path {
        Some(path) => Box::new(ReplayFeed::open(path, logger.clone()).await?),
        None => {
            let mut rng = StdRng::seed_from_u64(cfg.seed);
            let series = market::generate(cfg.scenario, cfg.cycles as usize, cfg.start_price, &mut rng);
            Box::new(SyntheticFeed::new(series))
        }
    };

    let mut store = match &cfg.sqlite_path {
        Some(path) => {
            let mut s = LedgerStore::open(path).with_context(|| format!("open ledger {}", path.display()))?;
            s.init()?;
            Some(s)
        }
        None => None,
    };

    logger.info(
        Domain::System,
        "startup",
        obj(&[
            ("blocks", json!(cfg.blocks)),
            ("entities_per_block", json!(cfg.entities_per_block)),
            ("cycles", json!(cfg.cycles)),
            ("seed", json!(cfg.seed)),
            ("scenario", v_str(cfg.scenario.as_str())),
            ("replay", json!(cfg.replay_path.as_ref().map(|p| p.display().to_string()))),
            ("sqlite", json!(cfg.sqlite_path.as_ref().map(|p| p.display().to_string()))),
        ]),
    );

    let interval = Duration::from_millis(cfg.cycle_interval_ms);
    let mut sim = Simulation::new(cfg, logger.clone(), sink);
    let report = driver::run(&mut sim, feed.as_mut(), store.as_mut(), interval, &RetryConfig::default()).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
