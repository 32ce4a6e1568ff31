//! Decision memory and the analyzers that read it.
//!
//! Three rule sets share one shape: given a memory window they either stay
//! silent or recommend a [`MutationTarget`]. They differ only in scope and
//! thresholds:
//!
//! | Scope  | Caller                          | Window                 |
//! |--------|---------------------------------|------------------------|
//! | entity | `LivingPlugin` per decision     | entity memory (10)     |
//! | block  | `SymbioticBlock` collective     | block memory (50)      |
//! | global | `Simulation` per cycle          | global memory (200)    |
//!
//! The symbolic health check is separate: it looks at the live tag and
//! emotion mix of the whole swarm rather than at past decisions.

use std::collections::{BTreeMap, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::events::DecisionRecord;
use crate::symbols::{Decision, Emotion, Tag};

// =============================================================================
// Bounded FIFO
// =============================================================================

/// FIFO with a hard capacity; pushing past it evicts the oldest item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedMemory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedMemory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted item if the memory was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

// =============================================================================
// Memory statistics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationTarget {
    pub tag: Tag,
    pub emotion: Emotion,
}

impl MutationTarget {
    pub fn new(tag: Tag, emotion: Emotion) -> Self {
        Self { tag, emotion }
    }
}

/// Counts over a window of decision records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub n: usize,
    decisions: BTreeMap<Decision, usize>,
    emotions: BTreeMap<Emotion, usize>,
    pub mean_value: f64,
}

impl MemoryStats {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a DecisionRecord>,
    {
        let mut stats = MemoryStats::default();
        let mut value_sum = 0.0;
        for r in records {
            stats.n += 1;
            *stats.decisions.entry(r.decision).or_default() += 1;
            *stats.emotions.entry(r.emotion).or_default() += 1;
            value_sum += r.value;
        }
        if stats.n > 0 {
            stats.mean_value = value_sum / stats.n as f64;
        }
        stats
    }

    pub fn decisions(&self, d: Decision) -> usize {
        self.decisions.get(&d).copied().unwrap_or(0)
    }

    pub fn emotions(&self, e: Emotion) -> usize {
        self.emotions.get(&e).copied().unwrap_or(0)
    }

    fn frac_gt(&self, count: usize, frac: f64) -> bool {
        count as f64 > frac * self.n as f64
    }
}

// =============================================================================
// Analyzers
// =============================================================================

/// Entity scope: absolute counts over the (at most 10-deep) entity memory.
pub fn analyze_entity_memory<'a, I>(records: I) -> Option<MutationTarget>
where
    I: IntoIterator<Item = &'a DecisionRecord>,
{
    let s = MemoryStats::from_records(records);
    if s.n == 0 {
        return None;
    }
    if s.decisions(Decision::Sell) > 5 && s.emotions(Emotion::Stress) > 0 && s.mean_value > 0.7 {
        Some(MutationTarget::new(Tag::Water, Emotion::Neutral))
    } else if s.decisions(Decision::Buy) > 5 && s.emotions(Emotion::Joy) > 0 && s.mean_value < 0.3 {
        Some(MutationTarget::new(Tag::Wind, Emotion::Curiosity))
    } else if s.decisions(Decision::Hold) > 7
        && s.emotions(Emotion::Curiosity) > 0
        && s.mean_value > 0.5
    {
        Some(MutationTarget::new(Tag::Earth, Emotion::Neutral))
    } else {
        None
    }
}

/// Block scope: fractions of the collective memory.
pub fn analyze_block_memory<'a, I>(records: I) -> Option<MutationTarget>
where
    I: IntoIterator<Item = &'a DecisionRecord>,
{
    let s = MemoryStats::from_records(records);
    if s.n == 0 {
        return None;
    }
    if s.frac_gt(s.emotions(Emotion::Stress), 0.5) && s.frac_gt(s.decisions(Decision::Sell), 0.4) {
        Some(MutationTarget::new(Tag::Earth, Emotion::Neutral))
    } else if s.frac_gt(s.emotions(Emotion::Joy), 0.5)
        && s.frac_gt(s.decisions(Decision::Buy), 0.3)
        && s.mean_value < 0.3
    {
        Some(MutationTarget::new(Tag::Fire, Emotion::Curiosity))
    } else if s.frac_gt(s.emotions(Emotion::Curiosity), 0.5)
        && s.frac_gt(s.decisions(Decision::Hold), 0.6)
    {
        Some(MutationTarget::new(Tag::Wind, Emotion::Curiosity))
    } else {
        None
    }
}

/// Global scope: an emotion must dominate (>40%) to form a cluster; each
/// cluster then has its own decision threshold. When several clusters
/// qualify, the later one in (stress, joy, curiosity) order wins.
pub fn analyze_global_memory<'a, I>(records: I) -> Option<MutationTarget>
where
    I: IntoIterator<Item = &'a DecisionRecord>,
{
    let s = MemoryStats::from_records(records);
    if s.n == 0 {
        return None;
    }
    let mut target = None;
    if s.frac_gt(s.emotions(Emotion::Stress), 0.4) && s.frac_gt(s.decisions(Decision::Sell), 0.5) {
        target = Some(MutationTarget::new(Tag::Earth, Emotion::Neutral));
    }
    if s.frac_gt(s.emotions(Emotion::Joy), 0.4)
        && s.frac_gt(s.decisions(Decision::Buy), 0.4)
        && s.mean_value < 0.3
    {
        target = Some(MutationTarget::new(Tag::Fire, Emotion::Curiosity));
    }
    if s.frac_gt(s.emotions(Emotion::Curiosity), 0.4) && s.frac_gt(s.decisions(Decision::Hold), 0.6) {
        target = Some(MutationTarget::new(Tag::Wind, Emotion::Curiosity));
    }
    target
}

// =============================================================================
// Symbolic health
// =============================================================================

pub const MIN_TAG_ENTROPY: f64 = 1.0;
pub const MAX_EMOTION_VARIANCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Shannon entropy (bits) of the tag mix.
    pub tag_entropy: f64,
    /// Squared deviation of emotion shares from uniform over observed emotions.
    pub emotion_variance: f64,
    pub adjustment: Option<MutationTarget>,
}

pub fn tag_entropy(tags: &[Tag]) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let mut counts: BTreeMap<Tag, usize> = BTreeMap::new();
    for t in tags {
        *counts.entry(*t).or_default() += 1;
    }
    let n = tags.len() as f64;
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            p * p.log2()
        })
        .sum::<f64>()
}

pub fn emotion_variance(emotions: &[Emotion]) -> f64 {
    if emotions.is_empty() {
        return 0.0;
    }
    let mut counts: BTreeMap<Emotion, usize> = BTreeMap::new();
    for e in emotions {
        *counts.entry(*e).or_default() += 1;
    }
    let n = emotions.len() as f64;
    let uniform = 1.0 / counts.len() as f64;
    counts
        .values()
        .map(|&c| (c as f64 / n - uniform).powi(2))
        .sum()
}

/// Least represented tag; ties (including absent tags) broken at random.
pub fn under_represented_tag<R: Rng + ?Sized>(tags: &[Tag], rng: &mut R) -> Tag {
    let count = |t: Tag| tags.iter().filter(|x| **x == t).count();
    let min = Tag::ALL.iter().map(|t| count(*t)).min().unwrap_or(0);
    let candidates: Vec<Tag> = Tag::ALL.iter().copied().filter(|t| count(*t) == min).collect();
    candidates.choose(rng).copied().unwrap_or(Tag::Fire)
}

/// An empty swarm is healthy by definition.
pub fn evaluate_health<R: Rng + ?Sized>(tags: &[Tag], emotions: &[Emotion], rng: &mut R) -> HealthReport {
    let tag_entropy = tag_entropy(tags);
    let emotion_variance = emotion_variance(emotions);
    let needs_adjustment =
        !tags.is_empty() && (tag_entropy < MIN_TAG_ENTROPY || emotion_variance > MAX_EMOTION_VARIANCE);
    let adjustment = needs_adjustment.then(|| {
        let emotion = if emotion_variance > MAX_EMOTION_VARIANCE {
            Emotion::Curiosity
        } else {
            Emotion::Neutral
        };
        MutationTarget::new(under_represented_tag(tags, rng), emotion)
    });
    HealthReport {
        tag_entropy,
        emotion_variance,
        adjustment,
    }
}
