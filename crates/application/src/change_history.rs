use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use domain::audit::change::ChangeEntry;
use ports::secondary::change_log::ChangeLogSink;

const DEFAULT_MEMORY_CAPACITY: usize = 256;

/// Runtime change history shared by the flag service and the source
/// registry.
///
/// Entries are kept in a bounded in-memory window and, when a durable
/// sink is attached, written through to it. Reads prefer the sink so
/// history survives restarts.
pub struct ChangeHistory {
    memory: Mutex<VecDeque<ChangeEntry>>,
    capacity: usize,
    sink: Option<Arc<dyn ChangeLogSink>>,
}

impl Default for ChangeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl ChangeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            sink: None,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ChangeLogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append an entry. A failing sink is logged and never fails the
    /// mutation that produced the entry.
    pub fn record(&self, entry: ChangeEntry) {
        if let Some(ref sink) = self.sink
            && let Err(e) = sink.record(&entry)
        {
            tracing::warn!(error = %e, target = %entry.target, "change log write failed");
        }
        tracing::info!(
            actor = %entry.actor,
            action = %entry.action,
            target = %entry.target,
            "runtime change recorded"
        );
        let mut memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        if memory.len() == self.capacity {
            memory.pop_front();
        }
        memory.push_back(entry);
    }

    /// Newest first. Entries whose target starts with `target_prefix`
    /// only, when given.
    pub fn recent(&self, limit: usize, target_prefix: Option<&str>) -> Vec<ChangeEntry> {
        let keep = |e: &ChangeEntry| target_prefix.is_none_or(|p| e.target.starts_with(p));

        if let Some(ref sink) = self.sink {
            // Over-fetch so filtering still fills the page in the common case.
            match sink.recent(limit.saturating_mul(4).max(limit)) {
                Ok(entries) => {
                    return entries.into_iter().filter(|e| keep(e)).take(limit).collect();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "change log read failed, serving memory window");
                }
            }
        }

        let memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        memory
            .iter()
            .rev()
            .filter(|e| keep(e))
            .take(limit)
            .cloned()
            .collect()
    }
}
