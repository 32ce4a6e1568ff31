//! Symbolic entity: a sub-tag distribution, an emotion and a short memory.
//!
//! An entity never touches its peers directly. Entanglement is a set of
//! [`EntityId`]s; the peers' distributions and emotions arrive through a
//! [`PeerView`] snapshot taken before the cycle starts, so no entity can
//! observe another's same-cycle output.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::events::DecisionRecord;
use crate::load::MarketLoad;
use crate::logging::{obj, ts_epoch_ms, v_num, v_str, Domain, Logger};
use crate::memory::BoundedMemory;
use crate::symbols::{Decision, Emotion, StateDistribution, SubTag, Tag};

pub const DEFAULT_MEMORY_CAPACITY: usize = 10;

/// Share of an entangled peer's weights bled into matching sub-tags.
pub const BLEED_FRACTION: f64 = 0.1;
pub const COLLAPSE_BOOST: f64 = 0.1;
pub const COLLAPSE_DECAY: f64 = 0.033;
/// Chance of adopting a random entangled peer's emotion.
pub const PEER_EMOTION_PROB: f64 = 0.3;
pub const CURIOSITY_PROB: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// What an entity exposes to entangled peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSignal {
    pub distribution: StateDistribution,
    pub emotion: Emotion,
}

/// Start-of-cycle snapshot of every entity's signal.
#[derive(Debug, Clone, Default)]
pub struct PeerView {
    signals: HashMap<EntityId, PeerSignal>,
}

impl PeerView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: &SymbolicEntity) {
        self.signals.insert(entity.id, entity.signal());
    }

    pub fn get(&self, id: EntityId) -> Option<&PeerSignal> {
        self.signals.get(&id)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl<'a> FromIterator<&'a SymbolicEntity> for PeerView {
    fn from_iter<I: IntoIterator<Item = &'a SymbolicEntity>>(iter: I) -> Self {
        let mut view = PeerView::new();
        for e in iter {
            view.insert(e);
        }
        view
    }
}

/// Sub-tags boosted for a load, or none when no band applies.
pub fn collapse_band(load: &MarketLoad) -> &'static [SubTag] {
    if load.rsi < 30.0 && load.external_index < 100.0 {
        &[SubTag::Flame, SubTag::Breeze]
    } else if load.rsi > 70.0 && load.external_index > 100.0 {
        &[SubTag::Wave, SubTag::Ice]
    } else if load.volatility > 0.05 {
        &[SubTag::Storm, SubTag::Steam]
    } else {
        &[]
    }
}

/// Deterministic decision rule. `emotion` is the emotion held going into
/// the cycle.
pub fn decide(tag: Tag, load: &MarketLoad, emotion: Emotion) -> Decision {
    let aggressive = matches!(tag, Tag::Fire | Tag::Wind);
    let defensive = matches!(tag, Tag::Water | Tag::Earth);
    let upbeat = matches!(emotion, Emotion::Joy | Emotion::Curiosity);

    if aggressive && load.rsi < 30.0 && load.sma_signal == 1 && load.external_index < 100.0 && upbeat {
        Decision::Buy
    } else if (defensive && load.rsi > 70.0 && load.sma_signal == -1 && load.external_index > 100.0)
        || emotion == Emotion::Stress
    {
        Decision::Sell
    } else {
        Decision::Hold
    }
}

fn load_emotion(load: &MarketLoad) -> Option<Emotion> {
    if load.volatility > 0.05 || load.rsi > 80.0 || load.rsi < 20.0 || load.external_index > 102.0 {
        Some(Emotion::Stress)
    } else if load.rsi < 30.0 && load.volatility < 0.02 && load.external_index < 98.0 {
        Some(Emotion::Joy)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SymbolicEntity {
    pub id: EntityId,
    pub base_value: f64,
    pub emotion: Emotion,
    pub entangled: BTreeSet<EntityId>,
    tag: Tag,
    distribution: StateDistribution,
    collapsed: Option<SubTag>,
    memory: BoundedMemory<DecisionRecord>,
    logger: Logger,
}

impl SymbolicEntity {
    pub fn new(id: EntityId, tag: Tag, base_value: f64, memory_capacity: usize, logger: Logger) -> Self {
        Self {
            id,
            base_value,
            emotion: Emotion::Neutral,
            entangled: BTreeSet::new(),
            tag,
            distribution: StateDistribution::for_tag(tag),
            collapsed: None,
            memory: BoundedMemory::new(memory_capacity),
            logger,
        }
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = emotion;
        self
    }

    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = logger;
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn distribution(&self) -> &StateDistribution {
        &self.distribution
    }

    /// Sub-tag sampled in the most recent cycle; cleared when the tag changes.
    pub fn collapsed(&self) -> Option<SubTag> {
        self.collapsed
    }

    pub fn memory(&self) -> &BoundedMemory<DecisionRecord> {
        &self.memory
    }

    pub fn signal(&self) -> PeerSignal {
        PeerSignal {
            distribution: self.distribution.clone(),
            emotion: self.emotion,
        }
    }

    /// Run one cycle against `load`. Never fails: the load is already
    /// sanitized and missing peers are skipped.
    pub fn process<R: Rng + ?Sized>(&mut self, load: &MarketLoad, peers: &PeerView, rng: &mut R) -> DecisionRecord {
        let peer_signals: Vec<&PeerSignal> = self
            .entangled
            .iter()
            .filter(|id| **id != self.id)
            .filter_map(|id| peers.get(*id))
            .collect();

        // 1. entanglement bleed
        if !peer_signals.is_empty() {
            for signal in &peer_signals {
                self.distribution.absorb(&signal.distribution, BLEED_FRACTION);
            }
            self.distribution.normalize();
        }

        // 2. collapse
        let band = collapse_band(load);
        if !band.is_empty() {
            self.distribution.reweight(band, COLLAPSE_BOOST, COLLAPSE_DECAY);
        }
        self.distribution.normalize();
        let collapsed = self.distribution.sample(rng);
        self.collapsed = Some(collapsed);

        // 3-4. decision and impact use the emotion carried into the cycle
        let prior_emotion = self.emotion;
        let decision = decide(self.tag, load, prior_emotion);
        let value = self.base_value * prior_emotion.impact_factor();

        // 5. emotion update
        let peer_emotions: Vec<Emotion> = peer_signals.iter().map(|s| s.emotion).collect();
        self.emotion = if !peer_emotions.is_empty() && rng.gen::<f64>() < PEER_EMOTION_PROB {
            peer_emotions.choose(rng).copied().unwrap_or(prior_emotion)
        } else if let Some(e) = load_emotion(load) {
            e
        } else if rng.gen::<f64>() < CURIOSITY_PROB {
            Emotion::Curiosity
        } else {
            Emotion::Neutral
        };

        let record = DecisionRecord {
            entity_id: self.id,
            tag: self.tag,
            state_distribution: self.distribution.clone(),
            collapsed_subtag: collapsed,
            decision,
            value,
            emotion: self.emotion,
            timestamp: ts_epoch_ms() as f64 / 1000.0,
        };
        self.memory.push(record.clone());

        self.logger.debug(
            Domain::Entity,
            "decision",
            obj(&[
                ("entity_id", v_str(&self.id.to_string())),
                ("tag", v_str(self.tag.as_str())),
                ("collapsed", v_str(collapsed.as_str())),
                ("decision", v_str(decision.as_str())),
                ("value", v_num(value)),
                ("emotion", v_str(self.emotion.as_str())),
                ("prior_emotion", v_str(prior_emotion.as_str())),
            ]),
        );
        record
    }

    /// Forced transition. Perturbs `base_value` by ±5%, retags (explicitly,
    /// or to a random other tag when curious or on a coin flip), applies the
    /// emotion and clears memory.
    pub fn mutate<R: Rng + ?Sized>(
        &mut self,
        new_tag: Option<Tag>,
        new_emotion: Option<Emotion>,
        rng: &mut R,
    ) -> &mut Self {
        self.base_value *= rng.gen_range(0.95..=1.05);

        let retag = match new_tag {
            Some(tag) => Some(tag),
            None if self.emotion == Emotion::Curiosity || rng.gen_bool(0.5) => {
                Some(self.tag.random_other(rng))
            }
            None => None,
        };
        if let Some(tag) = retag {
            self.tag = tag;
            self.distribution = StateDistribution::for_tag(tag);
            self.collapsed = None;
        }
        if let Some(emotion) = new_emotion {
            self.emotion = emotion;
        }
        self.memory.clear();

        self.logger.info(
            Domain::Mutation,
            "entity_mutated",
            obj(&[
                ("entity_id", v_str(&self.id.to_string())),
                ("tag", v_str(self.tag.as_str())),
                ("emotion", v_str(self.emotion.as_str())),
                ("base_value", v_num(self.base_value)),
                ("retagged", json!(retag.is_some())),
            ]),
        );
        self
    }

    /// Boost `subtag` the way a matching collapse band would. Sub-tags
    /// outside the current vocabulary are ignored.
    pub fn nudge_toward(&mut self, subtag: SubTag) -> bool {
        if !self.distribution.contains(subtag) {
            return false;
        }
        self.distribution.reweight(&[subtag], COLLAPSE_BOOST, COLLAPSE_DECAY);
        self.distribution.normalize();
        true
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            tag: self.tag,
            base_value: self.base_value,
            emotion: self.emotion,
            distribution: self.distribution.clone(),
            collapsed: self.collapsed,
            memory_len: self.memory.len(),
            entangled: self.entangled.iter().copied().collect(),
        }
    }
}

/// Serializable view of an entity. Memory is summarized by its length so
/// that snapshots of equal simulation states hash equally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub tag: Tag,
    pub base_value: f64,
    pub emotion: Emotion,
    pub distribution: StateDistribution,
    pub collapsed: Option<SubTag>,
    pub memory_len: usize,
    pub entangled: Vec<EntityId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entity(id: u32, tag: Tag) -> SymbolicEntity {
        SymbolicEntity::new(EntityId(id), tag, 0.5, DEFAULT_MEMORY_CAPACITY, Logger::null())
    }

    #[test]
    fn bullish_joyful_fire_buys() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut e = entity(0, Tag::Fire).with_emotion(Emotion::Joy);
        let load = MarketLoad::new(50_000.0, 20.0, 1, 0.01, 95.0);
        let rec = e.process(&load, &PeerView::new(), &mut rng);
        assert_eq!(rec.decision, Decision::Buy);
        assert!((rec.value - 0.5 * 1.2).abs() < 1e-12);
    }

    #[test]
    fn stress_always_sells() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut e = entity(0, Tag::Fire).with_emotion(Emotion::Stress);
        let rec = e.process(&MarketLoad::default(), &PeerView::new(), &mut rng);
        assert_eq!(rec.decision, Decision::Sell);
        assert!((rec.value - 0.2).abs() < 1e-12);
    }

    #[test]
    fn high_volatility_stresses() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut e = entity(0, Tag::Water);
        let load = MarketLoad::new(100.0, 50.0, 0, 0.1, 100.0);
        let rec = e.process(&load, &PeerView::new(), &mut rng);
        assert_eq!(rec.emotion, Emotion::Stress);
        assert_eq!(e.emotion, Emotion::Stress);
    }

    #[test]
    fn bleed_ignores_other_vocabularies() {
        let mut rng = StdRng::seed_from_u64(9);
        let water = entity(1, Tag::Water);
        let mut fire = entity(0, Tag::Fire);
        fire.entangled.insert(water.id);
        let view: PeerView = [&water].into_iter().collect();
        fire.process(&MarketLoad::default(), &view, &mut rng);
        assert!(fire.distribution().keys().all(|s| s.tag() == Tag::Fire));
        assert!((fire.distribution().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bleed_from_same_vocabulary_shifts_weights() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut peer = entity(1, Tag::Fire);
        for _ in 0..20 {
            assert!(peer.nudge_toward(SubTag::Smoke));
        }
        assert!(!peer.nudge_toward(SubTag::Wave));
        let mut fire = entity(0, Tag::Fire);
        fire.entangled.insert(peer.id);
        let view: PeerView = [&peer].into_iter().collect();
        fire.process(&MarketLoad::default(), &view, &mut rng);

        // default load boosts nothing, so the result is (prior + 0.1 * peer) / 1.1
        let prior = StateDistribution::for_tag(Tag::Fire);
        for s in Tag::Fire.subtags() {
            let want = (prior.get(s).unwrap() + BLEED_FRACTION * peer.distribution().get(s).unwrap())
                / (1.0 + BLEED_FRACTION);
            assert!((fire.distribution().get(s).unwrap() - want).abs() < 1e-12, "{}", s);
        }
        assert!(fire.distribution().get(SubTag::Smoke).unwrap() > prior.get(SubTag::Smoke).unwrap());
        assert!(fire.distribution().get(SubTag::Flame).unwrap() < prior.get(SubTag::Flame).unwrap());
    }

    #[test]
    fn peer_emotion_is_adopted_three_times_in_ten() {
        let mut rng = StdRng::seed_from_u64(17);
        let joyful = entity(1, Tag::Water).with_emotion(Emotion::Joy);
        let view: PeerView = [&joyful].into_iter().collect();
        // neutral load: no load-driven emotion, so only the peer yields joy
        let load = MarketLoad::neutral(100.0);
        let trials = 5_000;
        let mut joy = 0;
        let mut curious = 0;
        for _ in 0..trials {
            let mut e = entity(0, Tag::Earth);
            e.entangled.insert(joyful.id);
            match e.process(&load, &view, &mut rng).emotion {
                Emotion::Joy => joy += 1,
                Emotion::Curiosity => curious += 1,
                _ => {}
            }
        }
        let joy_rate = joy as f64 / trials as f64;
        let curious_rate = curious as f64 / trials as f64;
        assert!((joy_rate - PEER_EMOTION_PROB).abs() < 0.03, "joy {}", joy_rate);
        // curiosity only on the non-adopting branch
        let want = (1.0 - PEER_EMOTION_PROB) * CURIOSITY_PROB;
        assert!((curious_rate - want).abs() < 0.03, "curious {}", curious_rate);
    }

    #[test]
    fn unlinked_entity_never_adopts() {
        let mut rng = StdRng::seed_from_u64(18);
        let joyful = entity(1, Tag::Water).with_emotion(Emotion::Joy);
        let view: PeerView = [&joyful].into_iter().collect();
        for _ in 0..500 {
            let mut e = entity(0, Tag::Earth);
            let rec = e.process(&MarketLoad::neutral(100.0), &view, &mut rng);
            assert_ne!(rec.emotion, Emotion::Joy);
        }
    }

    #[test]
    fn mutate_with_tag_resets_distribution_and_memory() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut e = entity(0, Tag::Fire);
        e.process(&MarketLoad::default(), &PeerView::new(), &mut rng);
        assert_eq!(e.memory().len(), 1);

        e.mutate(Some(Tag::Earth), Some(Emotion::Curiosity), &mut rng);
        assert_eq!(e.tag(), Tag::Earth);
        assert_eq!(e.emotion, Emotion::Curiosity);
        assert_eq!(e.distribution(), &StateDistribution::for_tag(Tag::Earth));
        assert!(e.memory().is_empty());
        assert!(e.collapsed().is_none());
        assert!(e.base_value >= 0.5 * 0.95 && e.base_value <= 0.5 * 1.05);
    }

    #[test]
    fn curious_entity_always_retags() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..20 {
            let mut e = entity(0, Tag::Wind).with_emotion(Emotion::Curiosity);
            e.mutate(None, None, &mut rng);
            assert_ne!(e.tag(), Tag::Wind);
        }
    }

    #[test]
    fn self_link_is_ignored() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut e = entity(0, Tag::Fire);
        e.entangled.insert(e.id);
        let view: PeerView = [&e.clone()].into_iter().collect();
        let before = e.distribution().clone();
        e.process(&MarketLoad::default(), &view, &mut rng);
        // default load hits no band, so only a bleed could shift weights
        for (s, w) in before.iter() {
            assert!((e.distribution().get(s).unwrap() - w).abs() < 1e-12);
        }
    }
}
