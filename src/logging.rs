//! Structured logging for the swarm engine.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → ERROR)
//! 2. Domain-specific categories for filtering
//! 3. Replay/audit support via sequence numbers and state hashes
//! 4. No ambient globals: a cloneable [`Logger`] handle is handed to every
//!    component at construction and writes through an injected [`LogSink`]

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok(v) => Self::parse(v),
            Err(_) => Level::Info,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "warn" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Entity,    // Collapse, decisions, emotion transitions
    Block,     // Aggregation, fitness, messages
    Resonance, // Graph updates
    Mutation,  // Forced re-tagging
    Health,    // Symbolic health evaluation
    Market,    // Loads, feeds
    Exec,      // Simulated trades on block ledgers
    System,    // Startup, shutdown, cycle summaries
    Audit,     // State hashes
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Entity => "entity",
            Domain::Block => "block",
            Domain::Resonance => "resonance",
            Domain::Mutation => "mutation",
            Domain::Health => "health",
            Domain::Market => "market",
            Domain::Exec => "exec",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    fn parse_list(raw: &str) -> Option<Vec<Domain>> {
        if raw.trim() == "all" {
            return None;
        }
        let all = [
            Domain::Entity,
            Domain::Block,
            Domain::Resonance,
            Domain::Mutation,
            Domain::Health,
            Domain::Market,
            Domain::Exec,
            Domain::System,
            Domain::Audit,
        ];
        Some(
            raw.split(',')
                .filter_map(|d| all.iter().copied().find(|x| x.as_str() == d.trim()))
                .collect(),
        )
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Destination for rendered log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, level: Level, line: &str);
}

/// Discards everything.
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _level: Level, _line: &str) {}
}

/// One JSON object per line on stdout.
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, _level: Level, line: &str) {
        println!("{}", line);
    }
}

/// Keeps every line in memory. Used by tests to assert on emitted records.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn records(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    /// Number of records whose `event` field equals `event`.
    pub fn count_event(&self, event: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.get("event").and_then(Value::as_str) == Some(event))
            .count()
    }
}

impl LogSink for MemorySink {
    fn write(&self, _level: Level, line: &str) {
        if let Ok(mut l) = self.lines.lock() {
            l.push(line.to_string());
        }
    }
}

/// Run directory layout: `events.jsonl` (info and above), `trace.jsonl`
/// (trace/debug) and a `manifest.json` written once at creation.
pub struct JsonlSink {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
    echo: bool,
}

impl JsonlSink {
    pub fn create(run_dir: &Path, run_id: &str, echo: bool) -> std::io::Result<Self> {
        create_dir_all(run_dir)?;
        std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        )?;
        let events = File::create(run_dir.join("events.jsonl"))?;
        let trace = File::create(run_dir.join("trace.jsonl"))?;
        Ok(Self {
            events: Mutex::new(BufWriter::new(events)),
            trace: Mutex::new(BufWriter::new(trace)),
            echo,
        })
    }

    pub fn flush(&self) {
        for w in [&self.events, &self.trace] {
            if let Ok(mut w) = w.lock() {
                let _ = w.flush();
            }
        }
    }
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
    }
}

impl LogSink for JsonlSink {
    fn write(&self, level: Level, line: &str) {
        match level {
            Level::Trace | Level::Debug => write_line(&self.trace, line),
            _ => {
                write_line(&self.events, line);
                if self.echo {
                    println!("{}", line);
                }
            }
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        self.flush();
    }
}

// =============================================================================
// Logger handle
// =============================================================================

struct LoggerInner {
    sink: Arc<dyn LogSink>,
    run_id: String,
    min_level: Level,
    domains: Option<Vec<Domain>>,
    seq: AtomicU64,
}

/// Cheap-to-clone handle; all clones share one sequence counter.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("run_id", &self.inner.run_id)
            .field("min_level", &self.inner.min_level)
            .finish()
    }
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, run_id: impl Into<String>, min_level: Level) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                sink,
                run_id: run_id.into(),
                min_level,
                domains: None,
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullSink), "null", Level::Error)
    }

    /// Build from `RUN_ID`, `LOG_DIR`, `LOG_LEVEL` and `LOG_DOMAINS`.
    /// Falls back to stdout if the run directory cannot be created.
    pub fn from_env() -> Self {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let run_dir = Path::new(&base).join(&run_id);
        let sink: Arc<dyn LogSink> = match JsonlSink::create(&run_dir, &run_id, true) {
            Ok(s) => Arc::new(s),
            Err(err) => {
                eprintln!("[log] failed to create run dir {}: {}", run_dir.display(), err);
                Arc::new(StdoutSink)
            }
        };
        let domains = std::env::var("LOG_DOMAINS")
            .ok()
            .and_then(|raw| Domain::parse_list(&raw));
        Self {
            inner: Arc::new(LoggerInner {
                sink,
                run_id,
                min_level: Level::from_env(),
                domains,
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn enabled(&self, level: Level, domain: Domain) -> bool {
        level >= self.inner.min_level
            && self
                .inner
                .domains
                .as_ref()
                .map_or(true, |d| d.contains(&domain))
    }

    /// Emit a structured log entry
    pub fn log(&self, level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) {
        if !self.enabled(level, domain) {
            return;
        }
        let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));
        let mut entry = Map::new();
        entry.insert("ts".to_string(), json!(ts_now()));
        entry.insert("run_id".to_string(), json!(self.inner.run_id));
        entry.insert(
            "seq".to_string(),
            json!(self.inner.seq.fetch_add(1, Ordering::SeqCst)),
        );
        entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
        entry.insert("component".to_string(), json!(domain.as_str()));
        entry.insert("event".to_string(), json!(event));
        entry.insert("msg".to_string(), msg);
        for key in ["block_id", "entity_id", "cycle"] {
            if let Some(value) = fields.remove(key) {
                entry.insert(key.to_string(), value);
            }
        }
        entry.insert("data".to_string(), Value::Object(fields));
        self.inner
            .sink
            .write(level, &Value::Object(entry).to_string());
    }

    pub fn trace(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Trace, domain, event, fields);
    }

    pub fn debug(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Debug, domain, event, fields);
    }

    pub fn info(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Info, domain, event, fields);
    }

    pub fn warn(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Warn, domain, event, fields);
    }

    pub fn error(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Error, domain, event, fields);
    }

    // =========================================================================
    // Domain-Specific Helpers
    // =========================================================================

    pub fn log_trade(&self, block_id: &str, side: &str, qty: f64, price: f64, capital: f64) {
        self.info(
            Domain::Exec,
            "trade",
            obj(&[
                ("block_id", v_str(block_id)),
                ("side", v_str(side)),
                ("qty", v_num(qty)),
                ("price", v_num(price)),
                ("capital", v_num(capital)),
            ]),
        );
    }

    pub fn log_mutation(&self, scope: &str, target: &str, tag: &str, emotion: &str) {
        self.info(
            Domain::Mutation,
            "mutation",
            obj(&[
                ("scope", v_str(scope)),
                ("target", v_str(target)),
                ("tag", v_str(tag)),
                ("emotion", v_str(emotion)),
            ]),
        );
    }

    /// Log an audit entry for replay verification
    pub fn log_audit(&self, cycle: u64, state_hash: &str) {
        self.info(
            Domain::Audit,
            "state_hash",
            obj(&[("cycle", json!(cycle)), ("state_hash", v_str(state_hash))]),
        );
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds (for replay correlation)
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Tests
// =============================================================================
