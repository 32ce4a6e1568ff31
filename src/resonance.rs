//! Learned affinity between sub-tags.
//!
//! Weights live on unordered pairs, start at 1.0, move multiplicatively by
//! `1 + impact * 0.1` per observation and are clamped to [0.5, 2.0].

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::symbols::SubTag;

pub const MIN_WEIGHT: f64 = 0.5;
pub const MAX_WEIGHT: f64 = 2.0;
pub const DEFAULT_WEIGHT: f64 = 1.0;
pub const LEARNING_RATE: f64 = 0.1;

fn pair(a: SubTag, b: SubTag) -> (SubTag, SubTag) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResonanceGraph {
    #[serde(with = "pair_map")]
    weights: BTreeMap<(SubTag, SubTag), f64>,
    known_tags: BTreeSet<SubTag>,
}

impl ResonanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tag(&mut self, tag: SubTag) {
        self.known_tags.insert(tag);
    }

    pub fn known_tags(&self) -> &BTreeSet<SubTag> {
        &self.known_tags
    }

    /// Non-finite impacts are ignored; anything else is clamped into range.
    pub fn update(&mut self, a: SubTag, b: SubTag, impact: f64) {
        self.known_tags.insert(a);
        self.known_tags.insert(b);
        if !impact.is_finite() {
            return;
        }
        let w = self.weights.entry(pair(a, b)).or_insert(DEFAULT_WEIGHT);
        *w = (*w * (1.0 + impact * LEARNING_RATE)).clamp(MIN_WEIGHT, MAX_WEIGHT);
    }

    pub fn impact(&self, a: SubTag, b: SubTag) -> f64 {
        self.weights.get(&pair(a, b)).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Number of pairs observed so far.
    pub fn relations(&self) -> usize {
        self.weights.len()
    }

    /// Without an anomaly the current sub-tag stands. With one, a random
    /// other known sub-tag is suggested, falling back to `current` when
    /// nothing else has been seen.
    pub fn suggest_mutation<R: Rng + ?Sized>(&self, current: SubTag, anomaly: bool, rng: &mut R) -> SubTag {
        if !anomaly {
            return current;
        }
        let candidates: Vec<SubTag> = self.known_tags.iter().copied().filter(|t| *t != current).collect();
        candidates.choose(rng).copied().unwrap_or(current)
    }

    pub fn iter(&self) -> impl Iterator<Item = ((SubTag, SubTag), f64)> + '_ {
        self.weights.iter().map(|(k, v)| (*k, *v))
    }
}

/// JSON objects need string keys; pairs serialize as `"a|b"`.
mod pair_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::symbols::SubTag;

    pub fn serialize<S: Serializer>(map: &BTreeMap<(SubTag, SubTag), f64>, s: S) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|((a, b), w)| (format!("{}|{}", a, b), *w))
            .collect::<BTreeMap<String, f64>>()
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<(SubTag, SubTag), f64>, D::Error> {
        let raw = BTreeMap::<String, f64>::deserialize(d)?;
        raw.into_iter()
            .map(|(k, w)| {
                let (a, b) = k
                    .split_once('|')
                    .ok_or_else(|| D::Error::custom(format!("bad pair key: {}", k)))?;
                let a: SubTag = serde_json::from_value(serde_json::Value::String(a.to_string()))
                    .map_err(D::Error::custom)?;
                let b: SubTag = serde_json::from_value(serde_json::Value::String(b.to_string()))
                    .map_err(D::Error::custom)?;
                Ok((super::pair(a, b), w))
            })
            .collect()
    }
}
