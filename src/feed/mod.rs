//! Market-load sources for the async driver.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::load::MarketLoad;
use crate::logging::{obj, v_str, Domain, Logger};
use crate::market::MarketSeries;

pub mod retry;

#[async_trait]
pub trait LoadFeed: Send {
    /// Next load, or `None` once the feed is exhausted.
    async fn next_load(&mut self) -> Result<Option<MarketLoad>>;
}

/// Replays a pre-generated market.
pub struct SyntheticFeed {
    loads: VecDeque<MarketLoad>,
}

impl SyntheticFeed {
    pub fn new(series: MarketSeries) -> Self {
        Self {
            loads: series.loads.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.loads.len()
    }
}

#[async_trait]
impl LoadFeed for SyntheticFeed {
    async fn next_load(&mut self) -> Result<Option<MarketLoad>> {
        Ok(self.loads.pop_front())
    }
}

/// One JSON market load per line. Blank lines are ignored; lines that are
/// not a JSON object are logged and skipped.
pub struct ReplayFeed {
    lines: Lines<BufReader<File>>,
    line_no: u64,
    skipped: u64,
    logger: Logger,
}

impl ReplayFeed {
    pub async fn open(path: &Path, logger: Logger) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("open replay file {}", path.display()))?;
        logger.info(
            Domain::Market,
            "replay_open",
            obj(&[("path", v_str(&path.display().to_string()))]),
        );
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
            skipped: 0,
            logger,
        })
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl LoadFeed for ReplayFeed {
    async fn next_load(&mut self) -> Result<Option<MarketLoad>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match MarketLoad::from_json(trimmed) {
                Ok(load) => return Ok(Some(load)),
                Err(err) => {
                    self.skipped += 1;
                    self.logger.warn(
                        Domain::Market,
                        "replay_line_skipped",
                        obj(&[("line", json!(self.line_no)), ("error", v_str(&err.to_string()))]),
                    );
                }
            }
        }
        Ok(None)
    }
}
