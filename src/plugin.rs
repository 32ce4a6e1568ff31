//! Living plugin: turns decision events into resonance updates and
//! per-entity mutations.

use std::collections::HashMap;

use rand::Rng;
use serde_json::json;

use crate::block::SymbioticBlock;
use crate::entity::EntityId;
use crate::error::{CoreError, Result};
use crate::events::DecisionRecord;
use crate::logging::{obj, v_num, v_str, Domain, Logger};
use crate::memory::{analyze_entity_memory, MutationTarget};
use crate::resonance::ResonanceGraph;

/// Where an entity lives: (block index, slot within the block).
pub type EntityIndex = HashMap<EntityId, (usize, usize)>;

pub struct LivingPlugin {
    logger: Logger,
    events_seen: u64,
    mutations: u64,
}

impl LivingPlugin {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            events_seen: 0,
            mutations: 0,
        }
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Correlate the record's collapsed sub-tag with every other entity's
    /// last collapse, then mutate the emitter if its memory calls for it.
    /// A mutated emitter is nudged toward the graph's suggested sub-tag
    /// when it falls inside the new vocabulary. Returns the applied target,
    /// if any.
    pub fn on_decision<R: Rng + ?Sized>(
        &mut self,
        record: &DecisionRecord,
        graph: &mut ResonanceGraph,
        blocks: &mut [SymbioticBlock],
        index: &EntityIndex,
        rng: &mut R,
    ) -> Result<Option<MutationTarget>> {
        let (b, slot) = *index
            .get(&record.entity_id)
            .ok_or(CoreError::UnknownEntity(record.entity_id))?;
        self.events_seen += 1;

        graph.register_tag(record.collapsed_subtag);
        let mut updates = 0usize;
        for other in blocks.iter().flat_map(|blk| blk.entities().iter()) {
            if other.id == record.entity_id {
                continue;
            }
            if let Some(peer_tag) = other.collapsed() {
                graph.update(record.collapsed_subtag, peer_tag, record.value);
                updates += 1;
            }
        }
        self.logger.trace(
            Domain::Resonance,
            "graph_updated",
            obj(&[
                ("entity_id", v_str(&record.entity_id.to_string())),
                ("subtag", v_str(record.collapsed_subtag.as_str())),
                ("impact", v_num(record.value)),
                ("updates", json!(updates)),
                ("relations", json!(graph.relations())),
            ]),
        );

        let entity = blocks
            .get_mut(b)
            .and_then(|blk| blk.entities_mut().get_mut(slot))
            .ok_or(CoreError::UnknownEntity(record.entity_id))?;
        let target = analyze_entity_memory(entity.memory().iter());
        if let Some(t) = target {
            entity.mutate(Some(t.tag), Some(t.emotion), rng);
            // steer the fresh distribution away from the collapse that misbehaved
            let suggested = graph.suggest_mutation(record.collapsed_subtag, true, rng);
            let nudged = entity.nudge_toward(suggested);
            self.mutations += 1;
            self.logger
                .log_mutation("entity", &record.entity_id.to_string(), t.tag.as_str(), t.emotion.as_str());
            self.logger.debug(
                Domain::Mutation,
                "mutation_nudge",
                obj(&[
                    ("entity_id", v_str(&record.entity_id.to_string())),
                    ("from", v_str(record.collapsed_subtag.as_str())),
                    ("suggested", v_str(suggested.as_str())),
                    ("applied", json!(nudged)),
                ]),
            );
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockId, BlockParams};
    use crate::entity::{PeerView, SymbolicEntity};
    use crate::load::MarketLoad;
    use crate::symbols::{Emotion, StateDistribution, SubTag, Tag};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_entity_block() -> (Vec<SymbioticBlock>, EntityIndex) {
        let entities = vec![
            SymbolicEntity::new(EntityId(0), Tag::Fire, 0.5, 10, Logger::null()),
            SymbolicEntity::new(EntityId(1), Tag::Water, 0.5, 10, Logger::null()),
        ];
        let block = SymbioticBlock::new(BlockId(0), entities, BlockParams::default(), Logger::null());
        let index = [(EntityId(0), (0, 0)), (EntityId(1), (0, 1))].into_iter().collect();
        (vec![block], index)
    }

    #[test]
    fn decision_updates_graph_against_peers() {
        let mut rng = StdRng::seed_from_u64(5);
        let (mut blocks, index) = two_entity_block();
        let load = MarketLoad::neutral(100.0);
        let peers = PeerView::new();
        let mut records = Vec::new();
        for e in blocks[0].entities_mut() {
            records.push(e.process(&load, &peers, &mut rng));
        }
        let mut graph = ResonanceGraph::new();
        let mut plugin = LivingPlugin::new(Logger::null());
        assert!(plugin
            .on_decision(&records[0], &mut graph, &mut blocks, &index, &mut rng)
            .unwrap()
            .is_none());
        assert_eq!(graph.relations(), 1);
        let a = records[0].collapsed_subtag;
        let b = records[1].collapsed_subtag;
        assert!((graph.impact(b, a) - 1.05).abs() < 1e-12);
        assert_eq!(plugin.events_seen(), 1);
    }

    #[test]
    fn unknown_emitter_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let (mut blocks, index) = two_entity_block();
        let record = blocks[0].entities_mut()[0].process(&MarketLoad::neutral(1.0), &PeerView::new(), &mut rng);
        let stray = DecisionRecord {
            entity_id: EntityId(99),
            ..record
        };
        let mut plugin = LivingPlugin::new(Logger::null());
        let err = plugin
            .on_decision(&stray, &mut ResonanceGraph::new(), &mut blocks, &index, &mut rng)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntity(EntityId(99))));
    }

    #[test]
    fn stressed_sellers_mutate_to_water() {
        let mut rng = StdRng::seed_from_u64(6);
        let (mut blocks, index) = two_entity_block();
        // high base value keeps the stressed impact (x0.4) above 0.7
        let load = MarketLoad::new(100.0, 50.0, 0, 0.1, 100.0);
        let mut last = None;
        {
            let e = &mut blocks[0].entities_mut()[0];
            e.base_value = 2.0;
            e.emotion = Emotion::Stress;
            for _ in 0..6 {
                last = Some(e.process(&load, &PeerView::new(), &mut rng));
            }
        }
        let mut plugin = LivingPlugin::new(Logger::null());
        let target = plugin
            .on_decision(&last.unwrap(), &mut ResonanceGraph::new(), &mut blocks, &index, &mut rng)
            .unwrap();
        assert_eq!(target, Some(MutationTarget::new(Tag::Water, Emotion::Neutral)));
        let e = &blocks[0].entities()[0];
        assert_eq!(e.tag(), Tag::Water);
        assert!(e.memory().is_empty());
        assert_eq!(plugin.mutations(), 1);
        // nothing but the emitter's own collapse is known, so no nudge
        assert_eq!(e.distribution(), &StateDistribution::for_tag(Tag::Water));
    }

    #[test]
    fn mutation_nudges_toward_a_known_subtag_of_the_new_tag() {
        let mut rng = StdRng::seed_from_u64(6);
        let (mut blocks, index) = two_entity_block();
        let load = MarketLoad::new(100.0, 50.0, 0, 0.1, 100.0);
        let mut last = None;
        {
            let e = &mut blocks[0].entities_mut()[0];
            e.base_value = 2.0;
            e.emotion = Emotion::Stress;
            for _ in 0..6 {
                last = Some(e.process(&load, &PeerView::new(), &mut rng));
            }
        }
        let mut graph = ResonanceGraph::new();
        graph.register_tag(SubTag::Ice);
        let mut plugin = LivingPlugin::new(Logger::null());
        let target = plugin
            .on_decision(&last.unwrap(), &mut graph, &mut blocks, &index, &mut rng)
            .unwrap();
        assert_eq!(target.map(|t| t.tag), Some(Tag::Water));

        let prior = StateDistribution::for_tag(Tag::Water);
        let d = blocks[0].entities()[0].distribution();
        assert!(d.get(SubTag::Ice).unwrap() > prior.get(SubTag::Ice).unwrap());
        assert!(d.get(SubTag::Wave).unwrap() < prior.get(SubTag::Wave).unwrap());
        assert!((d.total() - 1.0).abs() < 1e-9);
    }
}
