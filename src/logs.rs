//! Per-cluster workflow logs
//!
//! Each workflow run streams its progress into a `LogSink`: an append-only
//! line buffer bounded by total size, plus a broadcast channel for callers
//! tailing the log live. A sink backs a `slog::Logger`, which is what the
//! provisioning engine writes to.

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use slog::{Drain, Logger, OwnedKVList, Record, KV};
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Write};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default bound of a single cluster's log buffer
pub const DEFAULT_LOG_BUFFER_BYTES: usize = 2 * 1024 * 1024;

const FOLLOW_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Buffer {
    lines: VecDeque<String>,
    bytes: usize,
}

/// Size-bounded log buffer of one workflow run
#[derive(Debug)]
pub struct LogSink {
    buffer: Mutex<Buffer>,
    tx: broadcast::Sender<String>,
    max_bytes: usize,
}

impl LogSink {
    pub fn new(max_bytes: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(FOLLOW_CHANNEL_CAPACITY);
        Arc::new(Self {
            buffer: Mutex::new(Buffer::default()),
            tx,
            max_bytes,
        })
    }

    /// Append a line, evicting the oldest lines once over the bound
    ///
    /// The newest line is always kept, even when it alone exceeds the bound.
    pub fn append(&self, line: String) {
        let mut buffer = self.buffer.lock();
        buffer.bytes += line.len();
        buffer.lines.push_back(line.clone());
        while buffer.bytes > self.max_bytes && buffer.lines.len() > 1 {
            match buffer.lines.pop_front() {
                Some(old) => buffer.bytes -= old.len(),
                None => break,
            }
        }
        // Sent under the lock so `follow` never sees a line twice or misses one.
        let _ = self.tx.send(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().lines.iter().cloned().collect()
    }

    /// Buffered lines plus a receiver for everything appended afterwards
    pub fn follow(&self) -> (Vec<String>, broadcast::Receiver<String>) {
        let buffer = self.buffer.lock();
        let rx = self.tx.subscribe();
        (buffer.lines.iter().cloned().collect(), rx)
    }

    pub fn size_bytes(&self) -> usize {
        self.buffer.lock().bytes
    }

    /// Logger writing into this sink
    pub fn logger(self: &Arc<Self>) -> Logger {
        let drain = std::sync::Mutex::new(SinkDrain { sink: self.clone() }).fuse();
        Logger::root(drain, slog::o!())
    }
}

struct SinkDrain {
    sink: Arc<LogSink>,
}

struct LineSerializer<'a>(&'a mut String);

impl slog::Serializer for LineSerializer<'_> {
    fn emit_arguments(&mut self, key: slog::Key, val: &fmt::Arguments) -> slog::Result {
        let _ = write!(self.0, " {}={}", key, val);
        Ok(())
    }
}

impl Drain for SinkDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &Record, values: &OwnedKVList) -> Result<(), slog::Never> {
        let mut line = format!(
            "{} {} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record.level().as_str(),
            record.msg()
        );
        let _ = record.kv().serialize(record, &mut LineSerializer(&mut line));
        let _ = values.serialize(record, &mut LineSerializer(&mut line));
        self.sink.append(line);
        Ok(())
    }
}

/// Cluster name to the sink of its current (or last) workflow run
#[derive(Debug)]
pub struct LogManager {
    sinks: RwLock<HashMap<String, Arc<LogSink>>>,
    max_bytes: usize,
}

impl LogManager {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            max_bytes,
        }
    }

    /// Start a fresh sink for a new workflow run of `cluster`
    pub fn open_run(&self, cluster: &str) -> Arc<LogSink> {
        let sink = LogSink::new(self.max_bytes);
        self.sinks.write().insert(cluster.to_string(), sink.clone());
        sink
    }

    pub fn get(&self, cluster: &str) -> Option<Arc<LogSink>> {
        self.sinks.read().get(cluster).cloned()
    }

    pub fn remove(&self, cluster: &str) {
        self.sinks.write().remove(cluster);
    }
}
