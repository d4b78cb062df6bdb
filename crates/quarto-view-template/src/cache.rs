/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled-template cache.
//!
//! One JSON file per source template, named by the SHA-256 of the resolved
//! source path. An entry is served only while:
//!
//! - its mtime is not older than the source's (or any dependency's) mtime
//! - its age is within the configured lifetime
//! - it parses and carries the current format version
//!
//! Anything else is a miss, and the stale entry is deleted.

use crate::compiled::{CompiledTemplate, FORMAT_VERSION};
use crate::error::TemplateResult;
use crate::loader::TemplateLoader;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

const ENTRY_EXTENSION: &str = "json";

/// Compiled templates persisted under a cache root.
#[derive(Debug, Clone)]
pub struct TemplateCache {
    root: PathBuf,
    lifetime: Duration,
}

impl TemplateCache {
    pub fn new(root: impl Into<PathBuf>, lifetime: Duration) -> Self {
        Self {
            root: root.into(),
            lifetime,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn set_lifetime(&mut self, lifetime: Duration) {
        self.lifetime = lifetime;
    }

    /// Path of the cache entry for a resolved source path.
    pub fn entry_path(&self, source: &Path) -> PathBuf {
        let digest = Sha256::digest(source.to_string_lossy().as_bytes());
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(digest)))
    }

    /// Look up a valid entry for `source`, deleting it if it is stale.
    pub fn get(&self, source: &Path, loader: &dyn TemplateLoader) -> Option<CompiledTemplate> {
        let entry = self.entry_path(source);
        let cached_at = std::fs::metadata(&entry).and_then(|m| m.modified()).ok()?;

        match self.check(&entry, cached_at, source, loader) {
            Ok(compiled) => Some(compiled),
            Err(reason) => {
                tracing::debug!(
                    source = %source.display(),
                    entry = %entry.display(),
                    reason,
                    "Discarding stale template cache entry"
                );
                if let Err(e) = std::fs::remove_file(&entry) {
                    tracing::debug!(entry = %entry.display(), error = %e, "Could not remove cache entry");
                }
                None
            }
        }
    }

    fn check(
        &self,
        entry: &Path,
        cached_at: SystemTime,
        source: &Path,
        loader: &dyn TemplateLoader,
    ) -> Result<CompiledTemplate, &'static str> {
        let newer_than_entry = |path: &Path| match loader.modified(path) {
            Some(modified) => modified > cached_at,
            None => true,
        };

        if newer_than_entry(source) {
            return Err("source modified");
        }
        let age = SystemTime::now()
            .duration_since(cached_at)
            .unwrap_or_default();
        if age > self.lifetime {
            return Err("lifetime expired");
        }

        let compiled: CompiledTemplate = std::fs::read_to_string(entry)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .ok_or("malformed entry")?;
        if compiled.format_version != FORMAT_VERSION {
            return Err("format version changed");
        }
        if compiled.dependencies.iter().any(|dep| newer_than_entry(dep)) {
            return Err("dependency modified");
        }
        if compiled
            .missing_includes
            .iter()
            .any(|path| loader.modified(path).is_some())
        {
            return Err("missing include created");
        }
        Ok(compiled)
    }

    /// Store `compiled` as the entry for `source`, replacing any previous one.
    ///
    /// The entry is written to a temporary file and renamed into place, so
    /// readers never see a partial entry.
    pub fn put(&self, source: &Path, compiled: &CompiledTemplate) -> TemplateResult<()> {
        std::fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&mut tmp, compiled).map_err(io::Error::other)?;
        tmp.flush()?;
        tmp.persist(self.entry_path(source)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> TemplateResult<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::debug!(root = %self.root.display(), removed, "Cleared template cache");
        Ok(removed)
    }
}
