/*
 * telemetry.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Render telemetry.
//!
//! The [`RenderObserver`] trait receives one [`RenderRecord`] per render and a
//! notification per compile. Observers are purely observational: nothing
//! they do can change output. The engine also owns an
//! [`UndefinedReferences`] counter, updated whenever a lookup misses.

use crate::ast::SourceLocation;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Summary of one render call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRecord {
    /// Name the template was requested by.
    pub template: String,
    /// Resolved source path.
    pub path: PathBuf,
    /// Names of the variables visible to the template.
    pub variables: Vec<String>,
    pub variable_count: usize,
    pub elapsed: Duration,
    /// Bytes allocated for the output buffer.
    pub memory_delta: usize,
    /// Output length in bytes.
    pub output_size: usize,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

/// Observer for compile and render events.
///
/// All methods have empty default implementations, allowing observers
/// to implement only the events they care about.
pub trait RenderObserver: Send + Sync {
    /// Called after a template was compiled (not served from cache).
    ///
    /// # Arguments
    ///
    /// * `name` - Template name as requested
    /// * `path` - Resolved source path
    /// * `elapsed` - Time spent compiling
    fn on_compile(&self, _name: &str, _path: &Path, _elapsed: Duration) {}

    /// Called after every successful render.
    fn on_render(&self, _record: &RenderRecord) {}
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RenderObserver for NoopObserver {}

/// Observer that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RenderObserver for TracingObserver {
    fn on_compile(&self, name: &str, path: &Path, elapsed: Duration) {
        tracing::debug!(
            template = name,
            path = %path.display(),
            elapsed_us = elapsed.as_micros() as u64,
            "Compiled template"
        );
    }

    fn on_render(&self, record: &RenderRecord) {
        tracing::info!(
            template = %record.template,
            path = %record.path.display(),
            variables = record.variable_count,
            elapsed_us = record.elapsed.as_micros() as u64,
            output_size = record.output_size,
            cache_hit = record.cache_hit,
            "Rendered template"
        );
    }
}

/// Bounded in-memory history of render records, oldest dropped first.
#[derive(Debug)]
pub struct RenderHistory {
    records: Mutex<VecDeque<RenderRecord>>,
    compiles: Mutex<usize>,
    capacity: usize,
}

impl RenderHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            compiles: Mutex::new(0),
            capacity,
        }
    }

    /// Recorded renders, oldest first.
    pub fn records(&self) -> Vec<RenderRecord> {
        self.lock_records().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<RenderRecord> {
        self.lock_records().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    /// Number of compiles observed.
    pub fn compile_count(&self) -> usize {
        *self.compiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear(&self) {
        self.lock_records().clear();
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, VecDeque<RenderRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RenderHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RenderObserver for RenderHistory {
    fn on_compile(&self, _name: &str, _path: &Path, _elapsed: Duration) {
        *self.compiles.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn on_render(&self, record: &RenderRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.lock_records();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
    }
}

/// Forwards every event to several observers.
#[derive(Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn RenderObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn RenderObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn RenderObserver>) {
        self.observers.push(observer);
    }
}

impl RenderObserver for FanoutObserver {
    fn on_compile(&self, name: &str, path: &Path, elapsed: Duration) {
        for observer in &self.observers {
            observer.on_compile(name, path, elapsed);
        }
    }

    fn on_render(&self, record: &RenderRecord) {
        for observer in &self.observers {
            observer.on_render(record);
        }
    }
}

/// Tally for one missing name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndefinedEntry {
    pub count: usize,
    pub last_message: String,
    pub last_location: SourceLocation,
}

/// Counts unresolved variable, property, and key lookups by name.
#[derive(Debug, Default)]
pub struct UndefinedReferences {
    entries: Mutex<IndexMap<String, UndefinedEntry>>,
}

impl UndefinedReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, message: &str, location: &SourceLocation) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(name) {
            Some(entry) => {
                entry.count += 1;
                entry.last_message = message.to_string();
                entry.last_location = location.clone();
            }
            None => {
                entries.insert(
                    name.to_string(),
                    UndefinedEntry {
                        count: 1,
                        last_message: message.to_string(),
                        last_location: location.clone(),
                    },
                );
            }
        }
    }

    /// Count for `name`, zero if it never missed.
    pub fn count(&self, name: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |entry| entry.count)
    }

    /// Copy of all entries, in first-seen order.
    pub fn snapshot(&self) -> IndexMap<String, UndefinedEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
