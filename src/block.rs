//! Symbiotic block: a fixed group of entities sharing one capital/position
//! ledger.
//!
//! Each cycle the block runs its entities, votes on their decisions, trades
//! against its own ledger and scores itself. The ledger is only ever
//! touched here; `capital >= 0` and `position >= 0` hold after every step.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bus::EventBus;
use crate::config::SwarmConfig;
use crate::entity::{EntityId, EntitySnapshot, PeerView, SymbolicEntity};
use crate::error::Result;
use crate::events::{BlockSummary, Channel, DecisionRecord, SwarmEvent};
use crate::load::MarketLoad;
use crate::logging::{obj, ts_epoch_ms, v_num, v_str, Domain, Logger};
use crate::memory::{analyze_block_memory, BoundedMemory, MutationTarget};
use crate::symbols::{Decision, Emotion, SubTag, Tag};

/// Price used by repair when the block has never seen one.
pub const REPAIR_FALLBACK_PRICE: f64 = 50_000.0;
/// Summaries at or below this weight are ignored by receivers.
pub const MESSAGE_WEIGHT_FLOOR: f64 = 0.5;
pub const MESSAGE_NUDGE_PROB: f64 = 0.4;
pub const MESSAGE_FITNESS_BAND: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockParams {
    pub initial_capital: f64,
    pub memory_capacity: usize,
    pub stop_loss_cycles: u32,
    pub buy_fraction: f64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            memory_capacity: 50,
            stop_loss_cycles: 5,
            buy_fraction: 0.1,
        }
    }
}

impl BlockParams {
    pub fn from_config(cfg: &SwarmConfig) -> Self {
        Self {
            initial_capital: cfg.initial_capital,
            memory_capacity: cfg.block_memory,
            stop_loss_cycles: cfg.stop_loss_cycles,
            buy_fraction: cfg.buy_fraction,
        }
    }
}

/// Per-block counters surfaced in reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    pub buys: u64,
    pub sells: u64,
    pub stop_losses: u64,
    pub repairs: u64,
    pub errors: u64,
}

fn most_common<T: Ord + Copy>(items: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for item in items {
        *counts.entry(item).or_default() += 1;
    }
    // first maximum in key order wins ties
    counts
        .into_iter()
        .fold(None, |best: Option<(T, usize)>, (k, c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((k, c)),
        })
        .map(|(k, _)| k)
}

#[derive(Debug, Clone)]
pub struct SymbioticBlock {
    pub id: BlockId,
    pub capital: f64,
    pub position: f64,
    pub consecutive_stress_cycles: u32,
    pub stats: BlockStats,
    params: BlockParams,
    entities: Vec<SymbolicEntity>,
    collective_memory: BoundedMemory<DecisionRecord>,
    last_fitness: f64,
    last_price: Option<f64>,
    logger: Logger,
}

impl SymbioticBlock {
    pub fn new(id: BlockId, entities: Vec<SymbolicEntity>, params: BlockParams, logger: Logger) -> Self {
        Self {
            id,
            capital: params.initial_capital,
            position: 0.0,
            consecutive_stress_cycles: 0,
            stats: BlockStats::default(),
            params,
            entities,
            collective_memory: BoundedMemory::new(params.memory_capacity),
            last_fitness: 0.0,
            last_price: None,
            logger,
        }
    }

    /// Start from an existing ledger; negative inputs are floored at zero.
    pub fn with_ledger(mut self, capital: f64, position: f64) -> Self {
        self.capital = capital.max(0.0);
        self.position = position.max(0.0);
        self
    }

    pub fn entities(&self) -> &[SymbolicEntity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [SymbolicEntity] {
        &mut self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&SymbolicEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn collective_memory(&self) -> &BoundedMemory<DecisionRecord> {
        &self.collective_memory
    }

    pub fn initial_capital(&self) -> f64 {
        self.params.initial_capital
    }

    /// Fitness from the most recent `process`.
    pub fn last_fitness(&self) -> f64 {
        self.last_fitness
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    /// Mark-to-market value of the ledger.
    pub fn equity(&self, price: f64) -> f64 {
        self.capital + self.position * price
    }

    pub fn fitness(&self, price: f64, stress_fraction: f64) -> f64 {
        let init = self.params.initial_capital;
        if init <= 0.0 {
            return 0.0;
        }
        ((self.equity(price) - init) / init) * (1.0 - 0.2 * stress_fraction)
    }

    /// Run one cycle. Never fails: an error in the inner step is logged and
    /// scored as fitness 0.0.
    pub fn process<R: Rng + ?Sized>(
        &mut self,
        load: &MarketLoad,
        peers: &PeerView,
        cycle: u64,
        bus: &mut EventBus,
        rng: &mut R,
    ) -> f64 {
        let fitness = match self.try_process(load, peers, cycle, bus, rng) {
            Ok(f) => f,
            Err(err) => {
                self.stats.errors += 1;
                self.logger.error(
                    Domain::Block,
                    "process_failed",
                    obj(&[
                        ("block_id", v_str(&self.id.to_string())),
                        ("cycle", json!(cycle)),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                0.0
            }
        };
        self.last_fitness = fitness;
        fitness
    }

    fn try_process<R: Rng + ?Sized>(
        &mut self,
        load: &MarketLoad,
        peers: &PeerView,
        cycle: u64,
        bus: &mut EventBus,
        rng: &mut R,
    ) -> Result<f64> {
        // A load without a usable price trades at the last known price.
        let price = match (load.price(), self.last_price) {
            (Ok(p), _) => p,
            (Err(_), Some(p)) => p,
            (Err(e), None) => return Err(e),
        };

        let mut results = Vec::with_capacity(self.entities.len());
        for entity in self.entities.iter_mut() {
            let record = entity.process(load, peers, rng);
            self.collective_memory.push(record.clone());
            bus.push(cycle, Channel::EntityEvents, SwarmEvent::Decision(record.clone()));
            results.push(record);
        }
        let n = results.len();

        // emotional stop-loss
        let stressed = results.iter().filter(|r| r.emotion == Emotion::Stress).count();
        if stressed * 2 > n {
            self.consecutive_stress_cycles += 1;
        } else {
            self.consecutive_stress_cycles = 0;
        }
        if self.consecutive_stress_cycles >= self.params.stop_loss_cycles && self.position > 0.0 {
            let qty = self.position;
            self.capital += qty * price;
            self.position = 0.0;
            self.consecutive_stress_cycles = 0;
            self.stats.stop_losses += 1;
            self.logger.warn(
                Domain::Exec,
                "emotional_stop_loss",
                obj(&[
                    ("block_id", v_str(&self.id.to_string())),
                    ("cycle", json!(cycle)),
                    ("qty", v_num(qty)),
                    ("price", v_num(price)),
                    ("capital", v_num(self.capital)),
                ]),
            );
        }

        // majority vote
        let buys = results.iter().filter(|r| r.decision == Decision::Buy).count();
        let sells = results.iter().filter(|r| r.decision == Decision::Sell).count();
        if buys * 2 > n && load.external_index < 100.0 && self.capital > 0.0 {
            let spend = self.capital * self.params.buy_fraction.clamp(0.0, 1.0);
            let qty = spend / price;
            self.position += qty;
            self.capital = (self.capital - spend).max(0.0);
            self.stats.buys += 1;
            self.logger
                .log_trade(&self.id.to_string(), Decision::Buy.as_str(), qty, price, self.capital);
        } else if sells * 2 > n && load.external_index > 100.0 && self.position > 0.0 {
            let qty = self.position;
            self.capital += qty * price;
            self.position = 0.0;
            self.stats.sells += 1;
            self.logger
                .log_trade(&self.id.to_string(), Decision::Sell.as_str(), qty, price, self.capital);
        }

        let stress_fraction = if n > 0 { stressed as f64 / n as f64 } else { 0.0 };
        let fitness = self.fitness(price, stress_fraction);
        self.last_price = Some(price);

        if !results.is_empty() {
            let summary = BlockSummary {
                block_id: self.id,
                fitness,
                weight: (fitness * 10.0).max(0.0),
                dominant_emotion: most_common(results.iter().map(|r| r.emotion)).unwrap_or(Emotion::Neutral),
                dominant_tag: most_common(results.iter().map(|r| r.collapsed_subtag)),
                timestamp: ts_epoch_ms() as f64 / 1000.0,
            };
            bus.push(cycle, Channel::BlockMessages, SwarmEvent::BlockSummary(summary));
            bus.push(cycle, Channel::GlobalMemory, SwarmEvent::Decision(results[0].clone()));
        }

        self.logger.debug(
            Domain::Block,
            "processed",
            obj(&[
                ("block_id", v_str(&self.id.to_string())),
                ("cycle", json!(cycle)),
                ("fitness", v_num(fitness)),
                ("capital", v_num(self.capital)),
                ("position", v_num(self.position)),
                ("stressed", json!(stressed)),
                ("buys", json!(buys)),
                ("sells", json!(sells)),
            ]),
        );
        Ok(fitness)
    }

    /// React to a sibling's summary. Returns how many entities were nudged.
    pub fn receive_message<R: Rng + ?Sized>(&mut self, msg: &BlockSummary, rng: &mut R) -> usize {
        if msg.block_id == self.id || msg.weight <= MESSAGE_WEIGHT_FLOOR {
            return 0;
        }
        let target = if msg.fitness > MESSAGE_FITNESS_BAND && msg.dominant_emotion == Emotion::Joy {
            (Tag::Fire, Emotion::Curiosity)
        } else if msg.fitness < -MESSAGE_FITNESS_BAND && msg.dominant_emotion == Emotion::Stress {
            (Tag::Earth, Emotion::Neutral)
        } else {
            return 0;
        };

        let mut nudged = 0;
        for entity in self.entities.iter_mut() {
            if rng.gen::<f64>() < MESSAGE_NUDGE_PROB {
                entity.mutate(Some(target.0), Some(target.1), rng);
                nudged += 1;
            }
        }
        self.logger.debug(
            Domain::Block,
            "message_received",
            obj(&[
                ("block_id", v_str(&self.id.to_string())),
                ("from", v_str(&msg.block_id.to_string())),
                ("fitness", v_num(msg.fitness)),
                ("nudged", json!(nudged)),
            ]),
        );
        nudged
    }

    /// Trial-run a silent copy of the block on a neutral load. Below `threshold`, every entity
    /// is force-mutated and `true` is returned; otherwise nothing changes.
    pub fn repair<R: Rng + ?Sized>(&mut self, threshold: f64, rng: &mut R) -> bool {
        let price = self.last_price.unwrap_or(REPAIR_FALLBACK_PRICE);
        let mut trial = self.silenced();
        let mut scratch = EventBus::new();
        let fitness = trial.process(&MarketLoad::neutral(price), &PeerView::new(), 0, &mut scratch, rng);
        if fitness >= threshold {
            return false;
        }
        for entity in self.entities.iter_mut() {
            entity.mutate(None, None, rng);
        }
        self.stats.repairs += 1;
        self.logger.info(
            Domain::Mutation,
            "block_repaired",
            obj(&[
                ("block_id", v_str(&self.id.to_string())),
                ("trial_fitness", v_num(fitness)),
                ("threshold", v_num(threshold)),
            ]),
        );
        true
    }

    fn silenced(&self) -> Self {
        let mut copy = self.clone();
        copy.logger = Logger::null();
        for entity in copy.entities.iter_mut() {
            entity.set_logger(Logger::null());
        }
        copy
    }

    pub fn analyze_collective_memory(&self) -> Option<MutationTarget> {
        analyze_block_memory(self.collective_memory.iter())
    }

    pub fn mutate_all<R: Rng + ?Sized>(&mut self, target: MutationTarget, rng: &mut R) {
        for entity in self.entities.iter_mut() {
            entity.mutate(Some(target.tag), Some(target.emotion), rng);
        }
    }

    /// Most common collapsed sub-tag among the entities' last cycle.
    pub fn dominant_subtag(&self) -> Option<SubTag> {
        most_common(self.entities.iter().filter_map(|e| e.collapsed()))
    }

    pub fn dominant_emotion(&self) -> Emotion {
        most_common(self.entities.iter().map(|e| e.emotion)).unwrap_or(Emotion::Neutral)
    }

    pub fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            id: self.id,
            capital: self.capital,
            position: self.position,
            consecutive_stress_cycles: self.consecutive_stress_cycles,
            last_fitness: self.last_fitness,
            entities: self.entities.iter().map(SymbolicEntity::snapshot).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub id: BlockId,
    pub capital: f64,
    pub position: f64,
    pub consecutive_stress_cycles: u32,
    pub last_fitness: f64,
    pub entities: Vec<EntitySnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn block_of(tags: &[(Tag, Emotion)]) -> SymbioticBlock {
        let entities = tags
            .iter()
            .enumerate()
            .map(|(i, (t, e))| SymbolicEntity::new(EntityId(i as u32), *t, 0.5, 10, Logger::null()).with_emotion(*e))
            .collect();
        SymbioticBlock::new(BlockId(0), entities, BlockParams::default(), Logger::null())
    }

    #[test]
    fn missing_price_scores_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut block = block_of(&[(Tag::Fire, Emotion::Neutral)]);
        let mut bus = EventBus::new();
        let fitness = block.process(&MarketLoad::default(), &PeerView::new(), 0, &mut bus, &mut rng);
        assert_eq!(fitness, 0.0);
        assert_eq!(block.stats.errors, 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn majority_buy_spends_a_tenth() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut block = block_of(&[(Tag::Fire, Emotion::Joy), (Tag::Wind, Emotion::Curiosity), (Tag::Water, Emotion::Neutral)]);
        let mut bus = EventBus::new();
        let load = MarketLoad::new(100.0, 20.0, 1, 0.01, 95.0);
        block.process(&load, &PeerView::new(), 0, &mut bus, &mut rng);
        assert!((block.capital - 9_000.0).abs() < 1e-9);
        assert!((block.position - 10.0).abs() < 1e-9);
        assert_eq!(block.stats.buys, 1);
        // three decisions, one summary, one global record
        assert_eq!(bus.len(), 5);
    }

    #[test]
    fn summary_from_self_or_light_is_ignored() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut block = block_of(&[(Tag::Water, Emotion::Neutral); 4]);
        let mut msg = BlockSummary {
            block_id: BlockId(0),
            fitness: 0.5,
            weight: 5.0,
            dominant_emotion: Emotion::Joy,
            dominant_tag: None,
            timestamp: 0.0,
        };
        assert_eq!(block.receive_message(&msg, &mut rng), 0);
        msg.block_id = BlockId(1);
        msg.weight = 0.5;
        assert_eq!(block.receive_message(&msg, &mut rng), 0);
    }

    #[test]
    fn joyful_sibling_pulls_entities_to_fire() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut block = block_of(&[(Tag::Water, Emotion::Neutral); 20]);
        let msg = BlockSummary {
            block_id: BlockId(9),
            fitness: 0.2,
            weight: 2.0,
            dominant_emotion: Emotion::Joy,
            dominant_tag: Some(SubTag::Flame),
            timestamp: 0.0,
        };
        let nudged = block.receive_message(&msg, &mut rng);
        assert!(nudged > 0 && nudged < 20);
        let fire = block.entities().iter().filter(|e| e.tag() == Tag::Fire).count();
        assert_eq!(fire, nudged);
        assert!(block
            .entities()
            .iter()
            .filter(|e| e.tag() == Tag::Fire)
            .all(|e| e.emotion == Emotion::Curiosity));
    }

    #[test]
    fn most_common_breaks_ties_by_order() {
        assert_eq!(most_common([Emotion::Stress, Emotion::Joy]), Some(Emotion::Joy));
        assert_eq!(most_common(Vec::<Emotion>::new()), None);
    }
}
