//! Symbolic vocabulary: elemental tags, their sub-tags, emotions, decisions,
//! and the normalized sub-tag distribution an entity carries.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Fire,
    Water,
    Wind,
    Earth,
}

impl Tag {
    pub const ALL: [Tag; 4] = [Tag::Fire, Tag::Water, Tag::Wind, Tag::Earth];

    pub fn subtags(&self) -> [SubTag; 3] {
        match self {
            Tag::Fire => [SubTag::Flame, SubTag::Ash, SubTag::Smoke],
            Tag::Water => [SubTag::Wave, SubTag::Steam, SubTag::Ice],
            Tag::Wind => [SubTag::Breeze, SubTag::Storm, SubTag::Calm],
            Tag::Earth => [SubTag::Rock, SubTag::Sand, SubTag::Dust],
        }
    }

    /// Prior weights, in the same order as [`Tag::subtags`].
    fn prior(&self) -> [f64; 3] {
        match self {
            Tag::Fire => [0.6, 0.3, 0.1],
            Tag::Water => [0.5, 0.3, 0.2],
            Tag::Wind => [0.7, 0.2, 0.1],
            Tag::Earth => [0.5, 0.3, 0.2],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Fire => "fire",
            Tag::Water => "water",
            Tag::Wind => "wind",
            Tag::Earth => "earth",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Tag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTag(s.to_string()))
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Tag::ALL[rng.gen_range(0..Tag::ALL.len())]
    }

    /// Uniformly random tag other than `self`.
    pub fn random_other<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let others: Vec<Tag> = Tag::ALL.iter().copied().filter(|t| t != self).collect();
        others[rng.gen_range(0..others.len())]
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubTag {
    Flame,
    Ash,
    Smoke,
    Wave,
    Steam,
    Ice,
    Breeze,
    Storm,
    Calm,
    Rock,
    Sand,
    Dust,
}

impl SubTag {
    pub fn tag(&self) -> Tag {
        match self {
            SubTag::Flame | SubTag::Ash | SubTag::Smoke => Tag::Fire,
            SubTag::Wave | SubTag::Steam | SubTag::Ice => Tag::Water,
            SubTag::Breeze | SubTag::Storm | SubTag::Calm => Tag::Wind,
            SubTag::Rock | SubTag::Sand | SubTag::Dust => Tag::Earth,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubTag::Flame => "flame",
            SubTag::Ash => "ash",
            SubTag::Smoke => "smoke",
            SubTag::Wave => "wave",
            SubTag::Steam => "steam",
            SubTag::Ice => "ice",
            SubTag::Breeze => "breeze",
            SubTag::Storm => "storm",
            SubTag::Calm => "calm",
            SubTag::Rock => "rock",
            SubTag::Sand => "sand",
            SubTag::Dust => "dust",
        }
    }
}

impl fmt::Display for SubTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Stress,
    Curiosity,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 4] = [Emotion::Joy, Emotion::Stress, Emotion::Curiosity, Emotion::Neutral];

    /// Base entry of the emotion table.
    pub fn multiplier(&self) -> f64 {
        match self {
            Emotion::Joy => 1.2,
            Emotion::Stress => 0.8,
            Emotion::Curiosity => 1.0,
            Emotion::Neutral => 1.0,
        }
    }

    /// Table entry times the extra dampening (stress ×0.5) or boost
    /// (curiosity ×1.5) applied when computing impact.
    pub fn impact_factor(&self) -> f64 {
        match self {
            Emotion::Stress => self.multiplier() * 0.5,
            Emotion::Curiosity => self.multiplier() * 1.5,
            _ => self.multiplier(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Stress => "stress",
            Emotion::Curiosity => "curiosity",
            Emotion::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Emotion::ALL.iter().copied().find(|e| e.as_str() == s)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "buy",
            Decision::Sell => "sell",
            Decision::Hold => "hold",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// State distribution
// =============================================================================

/// Weights over the sub-tags of one tag. Keys never leave that tag's
/// vocabulary and weights are non-negative; after [`normalize`] they sum to 1.
///
/// [`normalize`]: StateDistribution::normalize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDistribution(BTreeMap<SubTag, f64>);

impl StateDistribution {
    pub fn for_tag(tag: Tag) -> Self {
        Self(tag.subtags().into_iter().zip(tag.prior()).collect())
    }

    pub fn get(&self, subtag: SubTag) -> Option<f64> {
        self.0.get(&subtag).copied()
    }

    pub fn contains(&self, subtag: SubTag) -> bool {
        self.0.contains_key(&subtag)
    }

    pub fn keys(&self) -> impl Iterator<Item = SubTag> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubTag, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Scale weights to sum to 1. A non-positive total divides by 1, and if
    /// that leaves nothing to sample the tag prior is restored.
    pub fn normalize(&mut self) {
        let total = self.total();
        let denom = if total > 0.0 { total } else { 1.0 };
        for w in self.0.values_mut() {
            *w /= denom;
        }
        if total <= 0.0 {
            if let Some(tag) = self.0.keys().next().map(SubTag::tag) {
                *self = Self::for_tag(tag);
            }
        }
    }

    /// Add `fraction` of every matching weight in `other`. Sub-tags that
    /// `self` does not hold are ignored.
    pub fn absorb(&mut self, other: &StateDistribution, fraction: f64) {
        for (subtag, weight) in other.iter() {
            if let Some(w) = self.0.get_mut(&subtag) {
                *w += weight * fraction;
            }
        }
    }

    /// Boost `boosted` sub-tags, decay the rest, clamp at zero.
    pub fn reweight(&mut self, boosted: &[SubTag], boost: f64, decay: f64) {
        for (subtag, w) in self.0.iter_mut() {
            if boosted.contains(subtag) {
                *w += boost;
            } else {
                *w = (*w - decay).max(0.0);
            }
        }
    }

    /// Weighted random choice.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SubTag {
        let total = self.total();
        if total <= 0.0 {
            return self.last_key();
        }
        self.pick(rng.gen::<f64>() * total)
    }

    /// Walk the cumulative weights to `target`. Rounding can carry the
    /// cursor past the end; that lands on the last sub-tag with weight.
    fn pick(&self, mut target: f64) -> SubTag {
        for (subtag, w) in self.0.iter() {
            if target < *w {
                return *subtag;
            }
            target -= w;
        }
        self.0
            .iter()
            .rev()
            .find(|(_, w)| **w > 0.0)
            .map(|(k, _)| *k)
            .unwrap_or_else(|| self.last_key())
    }

    // Keys are never empty: every constructor goes through for_tag.
    fn last_key(&self) -> SubTag {
        self.0.keys().next_back().copied().unwrap_or(SubTag::Flame)
    }

    /// Sub-tag with the largest weight.
    pub fn dominant(&self) -> Option<SubTag> {
        self.0
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| *k)
    }
}
