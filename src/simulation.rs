//! The simulation context: owns every block, the resonance graph, the
//! living plugin, global memory and the random source, and runs cycles.
//!
//! A cycle is fully synchronous. Blocks process against a start-of-cycle
//! [`PeerView`] and queue their events on the [`EventBus`]; the bus is
//! drained only once every block is done and before any repair or
//! mutation. Swarm-scale analysis (global memory, health, entanglement
//! refresh) runs after that.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::baseline::BaselineTrader;
use crate::block::{BlockId, BlockParams, BlockSnapshot, SymbioticBlock};
use crate::bus::EventBus;
use crate::config::SwarmConfig;
use crate::entity::{EntityId, PeerView, SymbolicEntity};
use crate::error::{CoreError, Result};
use crate::events::{Channel, DecisionRecord, EventSink, MutationCommand, SwarmEvent};
use crate::load::MarketLoad;
use crate::logging::{obj, v_num, v_str, Domain, Logger};
use crate::market::MarketSeries;
use crate::memory::{analyze_global_memory, evaluate_health, BoundedMemory, HealthReport, MutationTarget};
use crate::metrics::{Counters, MetricsRecorder, ReportInputs, SimulationReport};
use crate::plugin::{EntityIndex, LivingPlugin};
use crate::resonance::ResonanceGraph;
use crate::symbols::{Emotion, Tag};

/// Inclusion chance per candidate pair during entanglement refresh.
pub const REFRESH_LINK_PROB: f64 = 0.3;
/// Peer block fitness above which a link may form.
pub const REFRESH_FITNESS_GATE: f64 = 0.02;
/// Resonance above which a link may form regardless of fitness.
pub const REFRESH_RESONANCE_GATE: f64 = 1.2;

/// Who an inbound mutation command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    All,
    Block(BlockId),
    Entity(EntityId),
}

#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub fitness: Vec<f64>,
    pub repaired: Vec<BlockId>,
    pub collective: Vec<(BlockId, MutationTarget)>,
    pub global: Option<MutationTarget>,
    pub health: Option<HealthReport>,
    pub entanglement_refreshed: bool,
    pub state_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub cycle: u64,
    pub blocks: Vec<BlockSnapshot>,
    pub graph: ResonanceGraph,
}

pub struct Simulation {
    config: SwarmConfig,
    blocks: Vec<SymbioticBlock>,
    graph: ResonanceGraph,
    plugin: LivingPlugin,
    global_memory: BoundedMemory<DecisionRecord>,
    index: EntityIndex,
    bus: EventBus,
    sink: Arc<dyn EventSink>,
    rng: StdRng,
    logger: Logger,
    cycle: u64,
    counters: Counters,
}

impl Simulation {
    /// Build `blocks x entities_per_block` randomly tagged entities with
    /// globally unique ids, then wire the initial entanglement.
    pub fn new(config: SwarmConfig, logger: Logger, sink: Arc<dyn EventSink>) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let params = BlockParams::from_config(&config);
        let mut next_id = 0u32;
        let mut blocks = Vec::with_capacity(config.blocks);
        for b in 0..config.blocks {
            let entities = (0..config.entities_per_block)
                .map(|_| {
                    let id = EntityId(next_id);
                    next_id += 1;
                    SymbolicEntity::new(id, Tag::random(&mut rng), config.base_value, config.entity_memory, logger.clone())
                })
                .collect();
            blocks.push(SymbioticBlock::new(BlockId(b as u32), entities, params, logger.clone()));
        }
        let mut sim = Self::assemble(config, blocks, logger, sink, rng);
        sim.wire_initial_entanglement();
        sim
    }

    /// Wrap prebuilt blocks. Entanglement is left as the blocks carry it.
    pub fn from_blocks(
        config: SwarmConfig,
        blocks: Vec<SymbioticBlock>,
        logger: Logger,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::assemble(config, blocks, logger, sink, rng)
    }

    fn assemble(
        config: SwarmConfig,
        blocks: Vec<SymbioticBlock>,
        logger: Logger,
        sink: Arc<dyn EventSink>,
        rng: StdRng,
    ) -> Self {
        let index = build_index(&blocks);
        logger.info(
            Domain::System,
            "simulation_created",
            obj(&[
                ("blocks", json!(blocks.len())),
                ("entities", json!(index.len())),
                ("seed", json!(config.seed)),
                ("scenario", v_str(config.scenario.as_str())),
            ]),
        );
        Self {
            global_memory: BoundedMemory::new(config.global_memory),
            plugin: LivingPlugin::new(logger.clone()),
            config,
            blocks,
            graph: ResonanceGraph::new(),
            index,
            bus: EventBus::new(),
            sink,
            rng,
            logger,
            cycle: 0,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[SymbioticBlock] {
        &self.blocks
    }

    pub fn graph(&self) -> &ResonanceGraph {
        &self.graph
    }

    pub fn global_memory(&self) -> &BoundedMemory<DecisionRecord> {
        &self.global_memory
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn entities(&self) -> impl Iterator<Item = &SymbolicEntity> {
        self.blocks.iter().flat_map(|b| b.entities().iter())
    }

    pub fn entity(&self, id: EntityId) -> Option<&SymbolicEntity> {
        let (b, s) = *self.index.get(&id)?;
        self.blocks.get(b)?.entities().get(s)
    }

    fn entity_mut(&mut self, id: EntityId) -> Option<&mut SymbolicEntity> {
        let (b, s) = *self.index.get(&id)?;
        self.blocks.get_mut(b)?.entities_mut().get_mut(s)
    }

    /// Counters merged with the per-block ledgers' own tallies.
    pub fn counters(&self) -> Counters {
        let mut c = self.counters;
        c.entity_mutations = self.plugin.mutations();
        for b in &self.blocks {
            c.repairs += b.stats.repairs;
            c.stop_losses += b.stats.stop_losses;
            c.trades += b.stats.buys + b.stats.sells;
            c.block_errors += b.stats.errors;
        }
        c
    }

    pub fn mean_entanglement(&self) -> f64 {
        let n = self.index.len();
        if n == 0 {
            return 0.0;
        }
        self.entities().map(|e| e.entangled.len()).sum::<usize>() as f64 / n as f64
    }

    fn link(&mut self, a: EntityId, b: EntityId) {
        if a == b {
            return;
        }
        if let Some(e) = self.entity_mut(a) {
            e.entangled.insert(b);
        }
        if let Some(e) = self.entity_mut(b) {
            e.entangled.insert(a);
        }
    }

    /// Same-tag entities within a block are always linked; same-tag pairs
    /// across blocks are linked with `initial_link_prob`.
    fn wire_initial_entanglement(&mut self) {
        let roster: Vec<(usize, EntityId, Tag)> = self
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(bi, b)| b.entities().iter().map(move |e| (bi, e.id, e.tag())))
            .collect();
        let p = self.config.initial_link_prob;
        for (i, &(bi, a, ta)) in roster.iter().enumerate() {
            for &(bj, b, tb) in roster.iter().skip(i + 1) {
                if ta != tb {
                    continue;
                }
                if bi == bj || self.rng.gen::<f64>() < p {
                    self.link(a, b);
                }
            }
        }
    }

    // =========================================================================
    // Cycle
    // =========================================================================

    pub fn step(&mut self, load: &MarketLoad) -> CycleOutcome {
        let c = self.cycle;
        let mut out = CycleOutcome {
            cycle: c,
            ..CycleOutcome::default()
        };

        // 1. nobody sees same-cycle output
        let peers: PeerView = self.entities().collect();

        // 2. blocks
        for block in self.blocks.iter_mut() {
            out.fitness
                .push(block.process(load, &peers, c, &mut self.bus, &mut self.rng));
        }

        // 3. deliver, while every collapse and memory is still this cycle's
        self.deliver();

        // 4. repair
        if self.config.repair_each_cycle {
            let th = self.config.repair_threshold;
            for block in self.blocks.iter_mut() {
                if block.repair(th, &mut self.rng) {
                    out.repaired.push(block.id);
                }
            }
        }

        // 5. collective memory
        for block in self.blocks.iter_mut() {
            if let Some(t) = block.analyze_collective_memory() {
                block.mutate_all(t, &mut self.rng);
                self.counters.collective_mutations += 1;
                self.logger
                    .log_mutation("block", &block.id.to_string(), t.tag.as_str(), t.emotion.as_str());
                out.collective.push((block.id, t));
            }
        }

        // 6. global memory
        if let Some(t) = analyze_global_memory(self.global_memory.iter()) {
            self.mutate_swarm(t);
            self.counters.global_mutations += 1;
            self.logger.log_mutation("global", "swarm", t.tag.as_str(), t.emotion.as_str());
            out.global = Some(t);
        }

        // 7. symbolic health
        if self.config.health_every > 0 && c % self.config.health_every == 0 {
            out.health = Some(self.health_check());
        }

        // 8. entanglement
        if self.config.entanglement_every > 0 && c % self.config.entanglement_every == 0 {
            self.refresh_entanglement();
            out.entanglement_refreshed = true;
        }

        // 9. audit
        if self.config.audit_every > 0 && c % self.config.audit_every == 0 {
            let hash = self.state_hash();
            self.logger.log_audit(c, &hash);
            out.state_hash = Some(hash);
        }

        let mean_fitness = if out.fitness.is_empty() {
            0.0
        } else {
            out.fitness.iter().sum::<f64>() / out.fitness.len() as f64
        };
        self.logger.info(
            Domain::System,
            "cycle",
            obj(&[
                ("cycle", json!(c)),
                ("mean_fitness", v_num(mean_fitness)),
                ("repaired", json!(out.repaired.len())),
                ("collective", json!(out.collective.len())),
                ("global", json!(out.global.is_some())),
                ("relations", json!(self.graph.relations())),
            ]),
        );
        self.cycle += 1;
        out
    }

    fn deliver(&mut self) {
        for env in self.bus.drain() {
            if let Err(err) = self.sink.publish(env.channel, &env.event) {
                self.counters.publish_failures += 1;
                self.logger.warn(
                    Domain::System,
                    "publish_failed",
                    obj(&[
                        ("cycle", json!(env.cycle)),
                        ("channel", v_str(env.channel.as_str())),
                        ("kind", v_str(env.event.kind())),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
            }
            match (env.channel, env.event) {
                (Channel::EntityEvents, SwarmEvent::Decision(rec)) => {
                    let res = self.plugin.on_decision(
                        &rec,
                        &mut self.graph,
                        &mut self.blocks,
                        &self.index,
                        &mut self.rng,
                    );
                    if let Err(err) = res {
                        self.logger.warn(
                            Domain::Resonance,
                            "decision_rejected",
                            obj(&[("error", v_str(&err.to_string()))]),
                        );
                    }
                }
                (Channel::BlockMessages, SwarmEvent::BlockSummary(summary)) => {
                    for block in self.blocks.iter_mut() {
                        self.counters.message_nudges += block.receive_message(&summary, &mut self.rng) as u64;
                    }
                }
                (Channel::GlobalMemory, SwarmEvent::Decision(rec)) => {
                    self.global_memory.push(rec);
                }
                (Channel::MutationCommands, SwarmEvent::Mutation(cmd)) => {
                    if let Err(err) = self.apply_command(CommandTarget::All, cmd) {
                        self.logger.warn(
                            Domain::Mutation,
                            "command_failed",
                            obj(&[("error", v_str(&err.to_string()))]),
                        );
                    }
                }
                (channel, event) => {
                    self.logger.warn(
                        Domain::System,
                        "misrouted_event",
                        obj(&[("channel", v_str(channel.as_str())), ("kind", v_str(event.kind()))]),
                    );
                }
            }
        }
    }

    fn mutate_swarm(&mut self, t: MutationTarget) {
        for block in self.blocks.iter_mut() {
            block.mutate_all(t, &mut self.rng);
        }
    }

    /// Evaluate tag entropy and emotion variance over the whole swarm; on an
    /// imbalance, mutate half of every block toward the suggested target.
    pub fn health_check(&mut self) -> HealthReport {
        let tags: Vec<Tag> = self.entities().map(|e| e.tag()).collect();
        let emotions: Vec<Emotion> = self.entities().map(|e| e.emotion).collect();
        let report = evaluate_health(&tags, &emotions, &mut self.rng);
        if let Some(t) = report.adjustment {
            let mut mutated = 0usize;
            for block in self.blocks.iter_mut() {
                let n = block.entities().len();
                let picks = rand::seq::index::sample(&mut self.rng, n, n / 2).into_vec();
                for i in picks {
                    if let Some(e) = block.entities_mut().get_mut(i) {
                        e.mutate(Some(t.tag), Some(t.emotion), &mut self.rng);
                        mutated += 1;
                    }
                }
            }
            self.counters.health_adjustments += 1;
            self.logger.info(
                Domain::Health,
                "health_adjustment",
                obj(&[
                    ("tag_entropy", v_num(report.tag_entropy)),
                    ("emotion_variance", v_num(report.emotion_variance)),
                    ("tag", v_str(t.tag.as_str())),
                    ("emotion", v_str(t.emotion.as_str())),
                    ("mutated", json!(mutated)),
                ]),
            );
        } else {
            self.logger.debug(
                Domain::Health,
                "health_ok",
                obj(&[
                    ("tag_entropy", v_num(report.tag_entropy)),
                    ("emotion_variance", v_num(report.emotion_variance)),
                ]),
            );
        }
        report
    }

    /// Rebuild every entity's links from scratch. Each ordered candidate
    /// pair is included with probability 0.3, gated on the candidate's
    /// block fitness or on resonance between the two last collapses.
    /// Links are symmetric.
    pub fn refresh_entanglement(&mut self) {
        let block_fitness: Vec<f64> = self.blocks.iter().map(|b| b.last_fitness()).collect();
        let roster: Vec<(usize, EntityId, Option<crate::symbols::SubTag>)> = self
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(bi, b)| b.entities().iter().map(move |e| (bi, e.id, e.collapsed())))
            .collect();

        let mut links: BTreeMap<EntityId, BTreeSet<EntityId>> =
            roster.iter().map(|(_, id, _)| (*id, BTreeSet::new())).collect();
        for &(_, a, a_tag) in &roster {
            for &(bj, b, b_tag) in &roster {
                if a == b || self.rng.gen::<f64>() >= REFRESH_LINK_PROB {
                    continue;
                }
                let resonant = match (a_tag, b_tag) {
                    (Some(x), Some(y)) => self.graph.impact(x, y) > REFRESH_RESONANCE_GATE,
                    _ => false,
                };
                if block_fitness[bj] > REFRESH_FITNESS_GATE || resonant {
                    links.entry(a).or_default().insert(b);
                    links.entry(b).or_default().insert(a);
                }
            }
        }
        for block in self.blocks.iter_mut() {
            for e in block.entities_mut() {
                e.entangled = links.remove(&e.id).unwrap_or_default();
            }
        }
        self.logger.debug(
            Domain::Resonance,
            "entanglement_refreshed",
            obj(&[("mean_degree", v_num(self.mean_entanglement()))]),
        );
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Apply an inbound command now. Returns the number of entities mutated.
    pub fn apply_command(&mut self, target: CommandTarget, cmd: MutationCommand) -> Result<usize> {
        let ids: Vec<EntityId> = match target {
            CommandTarget::All => self.entities().map(|e| e.id).collect(),
            CommandTarget::Block(bid) => self
                .blocks
                .iter()
                .find(|b| b.id == bid)
                .ok_or(CoreError::UnknownBlock(bid))?
                .entities()
                .iter()
                .map(|e| e.id)
                .collect(),
            CommandTarget::Entity(id) => {
                if !self.index.contains_key(&id) {
                    return Err(CoreError::UnknownEntity(id));
                }
                vec![id]
            }
        };
        for id in &ids {
            let (b, s) = self.index[id];
            let rng = &mut self.rng;
            if let Some(e) = self.blocks[b].entities_mut().get_mut(s) {
                e.mutate(cmd.new_tag, cmd.new_emotion, rng);
            }
        }
        self.logger.info(
            Domain::Mutation,
            "command_applied",
            obj(&[
                ("target", v_str(&format!("{:?}", target))),
                ("new_tag", json!(cmd.new_tag)),
                ("new_emotion", json!(cmd.new_emotion)),
                ("entities", json!(ids.len())),
            ]),
        );
        Ok(ids.len())
    }

    /// Queue a swarm-wide command for delivery with this cycle's events.
    pub fn enqueue_command(&mut self, cmd: MutationCommand) {
        self.bus
            .push(self.cycle, Channel::MutationCommands, SwarmEvent::Mutation(cmd));
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            cycle: self.cycle,
            blocks: self.blocks.iter().map(SymbioticBlock::snapshot).collect(),
            graph: self.graph.clone(),
        }
    }

    /// SHA-256 (hex) over the JSON snapshot.
    pub fn state_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.snapshot()).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    // =========================================================================
    // Batch run
    // =========================================================================

    /// Run the whole series synchronously with the baseline trader alongside.
    pub fn run(&mut self, market: &MarketSeries) -> SimulationReport {
        let mut tracker = RunTracker::new(&self.config);
        for load in &market.loads {
            self.step(load);
            tracker.observe(self, load);
        }
        let report = tracker.finish(self, market.scenario.as_str());
        self.logger.info(
            Domain::System,
            "run_complete",
            obj(&[
                ("cycles", json!(report.cycles)),
                ("swarm_roi", v_num(report.swarm_roi)),
                ("swarm_sharpe", v_num(report.swarm_sharpe)),
                ("baseline_roi", v_num(report.baseline_roi)),
                ("mutations", json!(report.mutations)),
            ]),
        );
        report
    }
}

fn build_index(blocks: &[SymbioticBlock]) -> EntityIndex {
    blocks
        .iter()
        .enumerate()
        .flat_map(|(bi, b)| b.entities().iter().enumerate().map(move |(si, e)| (e.id, (bi, si))))
        .collect()
}

/// Post-step bookkeeping shared by `Simulation::run` and the async driver.
pub struct RunTracker {
    baseline: BaselineTrader,
    recorder: MetricsRecorder,
    last_price: Option<f64>,
}

impl RunTracker {
    pub fn new(config: &SwarmConfig) -> Self {
        Self {
            baseline: BaselineTrader::new(config.initial_capital, config.buy_fraction),
            recorder: MetricsRecorder::new(config.initial_capital),
            last_price: None,
        }
    }

    pub fn cycles(&self) -> usize {
        self.recorder.cycles()
    }

    pub fn observe(&mut self, sim: &Simulation, load: &MarketLoad) {
        if let Ok(p) = load.price() {
            self.last_price = Some(p);
        }
        let price = self.last_price.unwrap_or(0.0);
        let equities: Vec<f64> = sim.blocks().iter().map(|b| b.equity(price)).collect();
        let baseline_fitness = self.baseline.process(load);
        self.recorder
            .record_cycle(&equities, baseline_fitness, sim.graph().relations(), sim.mean_entanglement());
    }

    pub fn finish(&self, sim: &Simulation, scenario: &str) -> SimulationReport {
        let price = self.last_price.unwrap_or(0.0);
        let blocks = sim.blocks();
        let final_mean_capital = if blocks.is_empty() {
            sim.config().initial_capital
        } else {
            blocks.iter().map(|b| b.equity(price)).sum::<f64>() / blocks.len() as f64
        };
        self.recorder.finish(ReportInputs {
            scenario: scenario.to_string(),
            final_mean_capital,
            baseline_final_capital: self.baseline.equity(price),
            counters: sim.counters(),
            state_hash: sim.state_hash(),
        })
    }
}
