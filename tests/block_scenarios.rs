//! Ledger scenarios for a single block: stop-loss, majority sell, repair,
//! and the no-overdraft invariant.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use swarmfx::block::{BlockId, BlockParams, SymbioticBlock};
use swarmfx::bus::EventBus;
use swarmfx::entity::{EntityId, PeerView, SymbolicEntity};
use swarmfx::events::{Channel, SwarmEvent};
use swarmfx::load::MarketLoad;
use swarmfx::logging::Logger;
use swarmfx::symbols::{Emotion, Tag};

fn block_of(specs: &[(Tag, Emotion)]) -> SymbioticBlock {
    let entities = specs
        .iter()
        .enumerate()
        .map(|(i, (tag, emo))| {
            SymbolicEntity::new(EntityId(i as u32), *tag, 0.5, 10, Logger::null()).with_emotion(*emo)
        })
        .collect();
    SymbioticBlock::new(BlockId(0), entities, BlockParams::default(), Logger::null())
}

#[test]
fn emotional_stop_loss_after_five_stressed_cycles() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut bus = EventBus::new();
    let peers = PeerView::new();
    let mut block = block_of(&[(Tag::Water, Emotion::Neutral); 3]).with_ledger(10_000.0, 0.2);
    // volatility above the stress bound; index pinned at 100 so no vote trades
    let load = MarketLoad::new(50_000.0, 50.0, 0, 0.1, 100.0);

    for cycle in 0..4 {
        block.process(&load, &peers, cycle, &mut bus, &mut rng);
        assert_eq!(block.position, 0.2);
        assert_eq!(block.consecutive_stress_cycles, cycle as u32 + 1);
    }
    block.process(&load, &peers, 4, &mut bus, &mut rng);
    assert_eq!(block.position, 0.0);
    assert!((block.capital - (10_000.0 + 0.2 * 50_000.0)).abs() < 1e-6);
    assert_eq!(block.consecutive_stress_cycles, 0);
    assert_eq!(block.stats.stop_losses, 1);
}

#[test]
fn majority_sell_liquidates_whole_position() {
    let mut rng = StdRng::seed_from_u64(22);
    let mut bus = EventBus::new();
    let mut block = block_of(&[
        (Tag::Earth, Emotion::Stress),
        (Tag::Water, Emotion::Stress),
        (Tag::Fire, Emotion::Neutral),
    ])
    .with_ledger(10_000.0, 1.0);
    let load = MarketLoad::new(50_000.0, 50.0, 0, 0.02, 105.0);

    block.process(&load, &PeerView::new(), 0, &mut bus, &mut rng);
    assert_eq!(block.position, 0.0);
    assert!((block.capital - 60_000.0).abs() < 1e-6);
    assert_eq!(block.stats.sells, 1);

    let events = bus.drain();
    let decisions = events.iter().filter(|e| e.channel == Channel::EntityEvents).count();
    assert_eq!(decisions, 3);
    assert!(events
        .iter()
        .any(|e| matches!(&e.event, SwarmEvent::BlockSummary(s) if s.block_id == BlockId(0))));
}

#[test]
fn repair_above_threshold_changes_nothing() {
    let mut rng = StdRng::seed_from_u64(23);
    let mut bus = EventBus::new();
    let mut block = block_of(&[(Tag::Fire, Emotion::Neutral), (Tag::Wind, Emotion::Joy)]).with_ledger(20_000.0, 0.0);
    block.process(&MarketLoad::neutral(50_000.0), &PeerView::new(), 0, &mut bus, &mut rng);

    let tags_before: Vec<Tag> = block.entities().iter().map(|e| e.tag()).collect();
    let memory_before: Vec<usize> = block.entities().iter().map(|e| e.memory().len()).collect();
    let snapshot_before = block.snapshot();

    assert!(!block.repair(0.01, &mut rng));
    assert_eq!(block.entities().iter().map(|e| e.tag()).collect::<Vec<_>>(), tags_before);
    assert_eq!(block.entities().iter().map(|e| e.memory().len()).collect::<Vec<_>>(), memory_before);
    assert_eq!(block.snapshot(), snapshot_before);
    assert_eq!(block.stats.repairs, 0);
}

#[test]
fn repair_below_threshold_mutates_and_clears_memory() {
    let mut rng = StdRng::seed_from_u64(24);
    let mut bus = EventBus::new();
    let mut block = block_of(&[(Tag::Fire, Emotion::Neutral); 4]).with_ledger(5_000.0, 0.0);
    block.process(&MarketLoad::neutral(50_000.0), &PeerView::new(), 0, &mut bus, &mut rng);
    assert!(block.entities().iter().all(|e| e.memory().len() == 1));

    assert!(block.repair(0.01, &mut rng));
    assert!(block.entities().iter().all(|e| e.memory().is_empty()));
    assert_eq!(block.stats.repairs, 1);
}

#[test]
fn ledger_never_overdraws() {
    let mut rng = StdRng::seed_from_u64(25);
    let mut bus = EventBus::new();
    let peers = PeerView::new();
    for trial in 0..20 {
        let specs: Vec<(Tag, Emotion)> = (0..rng.gen_range(1..8))
            .map(|_| (Tag::random(&mut rng), Emotion::ALL[rng.gen_range(0..4)]))
            .collect();
        let mut block = block_of(&specs).with_ledger(rng.gen_range(0.0..20_000.0), rng.gen_range(0.0..2.0));
        let mut price = 50_000.0;
        for cycle in 0..200 {
            price *= rng.gen_range(0.9..1.1);
            let load = if rng.gen_bool(0.05) {
                MarketLoad::default()
            } else {
                MarketLoad::new(
                    price,
                    rng.gen_range(0.0..100.0),
                    rng.gen_range(-1..=1),
                    rng.gen_range(0.0..0.1),
                    rng.gen_range(95.0..105.0),
                )
            };
            let fitness = block.process(&load, &peers, cycle, &mut bus, &mut rng);
            assert!(fitness.is_finite());
            assert!(block.capital >= 0.0, "trial {} cycle {}: capital {}", trial, cycle, block.capital);
            assert!(block.position >= 0.0, "trial {} cycle {}: position {}", trial, cycle, block.position);
        }
        bus.drain();
    }
}
