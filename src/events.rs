//! Message kinds exchanged between the engine and its collaborators, the
//! named channels they travel on, and the outbound [`EventSink`] seam.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::block::BlockId;
use crate::entity::EntityId;
use crate::error::{CoreError, Result};
use crate::symbols::{Decision, Emotion, StateDistribution, SubTag, Tag};

/// Emitted by an entity once per `process`. Immutable after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub entity_id: EntityId,
    pub tag: Tag,
    pub state_distribution: StateDistribution,
    pub collapsed_subtag: SubTag,
    pub decision: Decision,
    pub value: f64,
    pub emotion: Emotion,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub block_id: BlockId,
    pub fitness: f64,
    /// `max(0, fitness * 10)`; receivers ignore summaries at or below 0.5.
    pub weight: f64,
    pub dominant_emotion: Emotion,
    pub dominant_tag: Option<SubTag>,
    pub timestamp: f64,
}

/// Inbound forced transition. Both fields optional, as for `mutate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_emotion: Option<Emotion>,
}

impl MutationCommand {
    pub fn new(new_tag: Option<Tag>, new_emotion: Option<Emotion>) -> Self {
        Self { new_tag, new_emotion }
    }

    /// Validate a raw command. Unknown names are rejected rather than
    /// silently dropped, since a command that does nothing is a caller bug.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedMessage("mutation command is not an object".into()))?;
        let new_tag = match map.get("new_tag") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(Tag::parse(s)?),
            Some(other) => return Err(CoreError::MalformedMessage(format!("new_tag: {}", other))),
        };
        let new_emotion = match map.get("new_emotion") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                Emotion::parse(s).ok_or_else(|| CoreError::MalformedMessage(format!("unknown emotion: {}", s)))?,
            ),
            Some(other) => return Err(CoreError::MalformedMessage(format!("new_emotion: {}", other))),
        };
        Ok(Self { new_tag, new_emotion })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    Decision(DecisionRecord),
    BlockSummary(BlockSummary),
    Mutation(MutationCommand),
}

impl SwarmEvent {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CoreError::MalformedMessage(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SwarmEvent::Decision(_) => "decision",
            SwarmEvent::BlockSummary(_) => "block_summary",
            SwarmEvent::Mutation(_) => "mutation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    EntityEvents,
    BlockMessages,
    GlobalMemory,
    MutationCommands,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::EntityEvents => "entity_events",
            Channel::BlockMessages => "block_messages",
            Channel::GlobalMemory => "global_memory",
            Channel::MutationCommands => "mutation_commands",
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// External pub/sub collaborator. Publishing is best-effort: callers log
/// failures and keep going.
pub trait EventSink: Send + Sync {
    fn publish(&self, channel: Channel, event: &SwarmEvent) -> Result<()>;
}

pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _channel: Channel, _event: &SwarmEvent) -> Result<()> {
        Ok(())
    }
}

/// Records every published event. `set_failing(true)` makes every publish
/// return an error without recording.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(Channel, SwarmEvent)>>,
    failing: AtomicBool,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<(Channel, SwarmEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, channel: Channel) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|(c, _)| *c == channel).count())
            .unwrap_or(0)
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, channel: Channel, event: &SwarmEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Publish {
                channel: channel.as_str().to_string(),
                reason: "sink unavailable".to_string(),
            });
        }
        self.events
            .lock()
            .map_err(|_| CoreError::Publish {
                channel: channel.as_str().to_string(),
                reason: "sink lock poisoned".to_string(),
            })?
            .push((channel, event.clone()));
        Ok(())
    }
}

/// One line per event: `{"channel": .., "event": {..}}`.
pub struct JsonlEventSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlEventSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }

    pub fn flush(&self) {
        if let Ok(mut w) = self.writer.lock() {
            let _ = w.flush();
        }
    }
}

impl EventSink for JsonlEventSink {
    fn publish(&self, channel: Channel, event: &SwarmEvent) -> Result<()> {
        let line = json!({ "channel": channel.as_str(), "event": event }).to_string();
        let publish_err = |reason: String| CoreError::Publish {
            channel: channel.as_str().to_string(),
            reason,
        };
        let mut w = self
            .writer
            .lock()
            .map_err(|_| publish_err("writer lock poisoned".to_string()))?;
        writeln!(w, "{}", line).map_err(|e| publish_err(e.to_string()))
    }
}

impl Drop for JsonlEventSink {
    fn drop(&mut self) {
        self.flush();
    }
}
