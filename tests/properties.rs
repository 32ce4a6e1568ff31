//! Seeded property checks over entities, memory and the resonance graph.
//!
//! Each test drives many random inputs from a fixed-seed StdRng so failures
//! reproduce exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use swarmfx::entity::{EntityId, PeerView, SymbolicEntity};
use swarmfx::load::MarketLoad;
use swarmfx::logging::Logger;
use swarmfx::resonance::{ResonanceGraph, MAX_WEIGHT, MIN_WEIGHT};
use swarmfx::symbols::{Decision, Emotion, SubTag, Tag};

fn all_subtags() -> Vec<SubTag> {
    Tag::ALL.iter().flat_map(|t| t.subtags()).collect()
}

fn random_load(rng: &mut StdRng) -> MarketLoad {
    MarketLoad::new(
        rng.gen_range(1.0..100_000.0),
        rng.gen_range(-20.0..120.0),
        rng.gen_range(-3..=3),
        rng.gen_range(-0.1..0.3),
        rng.gen_range(90.0..110.0),
    )
}

/// Loads as they might arrive from a sloppy collaborator: keys missing,
/// values of the wrong type, out-of-range numbers.
fn random_raw_load(rng: &mut StdRng) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    let pick = |rng: &mut StdRng| -> serde_json::Value {
        match rng.gen_range(0..5) {
            0 => json!(rng.gen_range(-1e6..1e6)),
            1 => json!("garbage"),
            2 => json!(null),
            3 => json!([1, 2, 3]),
            _ => json!(rng.gen_range(0.0..100.0)),
        }
    };
    for key in ["price", "rsi", "sma_signal", "volatility", "external_index"] {
        if rng.gen_bool(0.7) {
            map.insert(key.to_string(), pick(rng));
        }
    }
    serde_json::Value::Object(map)
}

#[test]
fn distribution_stays_normalized_and_in_support() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut entities: Vec<SymbolicEntity> = (0..8)
        .map(|i| SymbolicEntity::new(EntityId(i), Tag::ALL[i as usize % 4], 0.5, 10, Logger::null()))
        .collect();
    // everyone entangled with everyone, across vocabularies
    for i in 0..entities.len() {
        for j in 0..entities.len() {
            if i != j {
                let id = entities[j].id;
                entities[i].entangled.insert(id);
            }
        }
    }

    for _ in 0..300 {
        let load = random_load(&mut rng);
        let peers: PeerView = entities.iter().collect();
        for e in entities.iter_mut() {
            let rec = e.process(&load, &peers, &mut rng);
            let total: f64 = e.distribution().iter().map(|(_, w)| w).sum();
            assert!((total - 1.0).abs() < 1e-6, "total {}", total);
            assert!(e.distribution().contains(rec.collapsed_subtag));
            let support = e.tag().subtags();
            assert!(e.distribution().keys().all(|k| support.contains(&k)));
            assert!(e.distribution().iter().all(|(_, w)| w >= 0.0));
        }
    }
}

#[test]
fn decision_is_always_valid_even_for_malformed_loads() {
    let mut rng = StdRng::seed_from_u64(12);
    let mut entity = SymbolicEntity::new(EntityId(0), Tag::Wind, 0.5, 10, Logger::null());
    let peers = PeerView::new();
    for _ in 0..500 {
        let raw = random_raw_load(&mut rng);
        let load = MarketLoad::from_value(&raw).expect("objects always parse");
        assert!((0.0..=100.0).contains(&load.rsi));
        assert!(load.volatility >= 0.0);
        assert!([-1, 0, 1].contains(&load.sma_signal));
        let rec = entity.process(&load, &peers, &mut rng);
        assert!(matches!(rec.decision, Decision::Buy | Decision::Sell | Decision::Hold));
        assert!(rec.value.is_finite());
    }

    let nan = MarketLoad::new(f64::NAN, f64::NAN, 0, f64::INFINITY, f64::NEG_INFINITY);
    assert_eq!(nan.rsi, 50.0);
    assert_eq!(nan.volatility, 0.02);
    assert_eq!(nan.external_index, 100.0);
    let rec = entity.process(&nan, &peers, &mut rng);
    assert!(matches!(rec.decision, Decision::Buy | Decision::Sell | Decision::Hold));
}

#[test]
fn memory_is_fifo_with_capacity_ten() {
    let mut rng = StdRng::seed_from_u64(13);
    let mut entity = SymbolicEntity::new(EntityId(0), Tag::Earth, 0.5, 10, Logger::null());
    let peers = PeerView::new();
    let records: Vec<_> = (0..15)
        .map(|i| {
            let load = MarketLoad::new(50_000.0, 20.0 + 4.0 * i as f64, 1, 0.01 * i as f64, 95.0 + i as f64);
            entity.process(&load, &peers, &mut rng)
        })
        .collect();

    let kept: Vec<_> = entity.memory().iter().cloned().collect();
    assert_eq!(kept.len(), 10);
    assert_eq!(kept.as_slice(), &records[5..]);
    assert_eq!(entity.memory().first(), Some(&records[5]));
    assert_eq!(entity.memory().last(), Some(&records[14]));
}

#[test]
fn graph_is_symmetric_and_bounded_under_random_updates() {
    let mut rng = StdRng::seed_from_u64(14);
    let tags = all_subtags();
    let mut graph = ResonanceGraph::new();
    for _ in 0..5_000 {
        let a = tags[rng.gen_range(0..tags.len())];
        let b = tags[rng.gen_range(0..tags.len())];
        let impact = match rng.gen_range(0..4) {
            0 => rng.gen_range(-1e6..1e6),
            1 => rng.gen_range(-50.0..-5.0),
            2 => rng.gen_range(5.0..50.0),
            _ => rng.gen_range(-1.0..1.0),
        };
        graph.update(a, b, impact);
    }
    for &a in &tags {
        for &b in &tags {
            let w = graph.impact(a, b);
            assert_eq!(w, graph.impact(b, a));
            assert!((MIN_WEIGHT..=MAX_WEIGHT).contains(&w), "{} {} -> {}", a, b, w);
        }
    }
    assert!(graph.relations() > 0);
}

#[test]
fn bullish_joyful_fire_entity_buys() {
    let mut rng = StdRng::seed_from_u64(15);
    let mut entity =
        SymbolicEntity::new(EntityId(0), Tag::Fire, 0.5, 10, Logger::null()).with_emotion(Emotion::Joy);
    let load = MarketLoad::from_value(&json!({
        "rsi": 20, "sma_signal": 1, "volatility": 0.01, "external_index": 95
    }))
    .unwrap();
    let rec = entity.process(&load, &PeerView::new(), &mut rng);
    assert_eq!(rec.decision, Decision::Buy);
    assert!((rec.value - 0.5 * 1.2).abs() < 1e-12);
}
