/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The public rendering facade.
//!
//! An [`Engine`] ties the pieces together for each render call:
//!
//! 1. Resolve the template name to a source path
//! 2. Serve the compiled template from the cache, or compile and store it
//! 3. Merge engine-assigned variables with the call's variables
//! 4. Execute into one output buffer
//! 5. Report a [`RenderRecord`] to the observer
//!
//! All per-render state lives on the stack of the render call, so one engine
//! can serve concurrent renders through `&self`.

use crate::cache::TemplateCache;
use crate::compiled::CompiledTemplate;
use crate::compiler::Compiler;
use crate::config::{EngineConfig, RuntimeMode};
use crate::context::TemplateContext;
use crate::error::{CallError, TemplateResult};
use crate::eval_context::EvalContext;
use crate::evaluator::evaluate;
use crate::loader::{FileSystemLoader, TemplateLoader};
use crate::registry::Registry;
use crate::telemetry::{RenderObserver, RenderRecord, TracingObserver, UndefinedReferences};
use crate::value::Value;
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Answers whether undefined references should abort rendering.
pub trait ModeOracle: Send + Sync {
    fn is_development_mode(&self) -> bool;
}

impl ModeOracle for RuntimeMode {
    fn is_development_mode(&self) -> bool {
        *self == RuntimeMode::Development
    }
}

impl<F> ModeOracle for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_development_mode(&self) -> bool {
        self()
    }
}

/// Per-call rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Read and write the compiled-template cache. When false the template is
    /// always compiled from source and nothing is stored.
    pub use_cache: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

impl RenderOptions {
    pub fn without_cache() -> Self {
        Self { use_cache: false }
    }
}

/// Template engine.
pub struct Engine {
    config: EngineConfig,
    loader: Box<dyn TemplateLoader>,
    registry: Registry,
    cache: Option<TemplateCache>,
    globals: TemplateContext,
    observer: Arc<dyn RenderObserver>,
    mode: Arc<dyn ModeOracle>,
    undefined: UndefinedReferences,
}

impl Engine {
    /// Engine reading templates from `config.template_root`.
    pub fn new(config: EngineConfig) -> Self {
        let loader = FileSystemLoader::new(&config.template_root, config.extension.clone());
        Self::with_loader(config, loader)
    }

    /// Engine reading templates through a custom loader.
    pub fn with_loader(config: EngineConfig, loader: impl TemplateLoader + 'static) -> Self {
        let cache = config
            .cache_root
            .as_ref()
            .map(|root| TemplateCache::new(root, config.cache_lifetime()));
        Self {
            mode: Arc::new(config.mode),
            config,
            loader: Box::new(loader),
            registry: Registry::with_builtins(),
            cache,
            globals: TemplateContext::new(),
            observer: Arc::new(TracingObserver),
            undefined: UndefinedReferences::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the template called `name`.
    pub fn render(&self, name: &str, variables: &TemplateContext) -> TemplateResult<String> {
        self.render_with_options(name, variables, RenderOptions::default())
    }

    /// Render with explicit options, e.g. bypassing the cache.
    pub fn render_with_options(
        &self,
        name: &str,
        variables: &TemplateContext,
        options: RenderOptions,
    ) -> TemplateResult<String> {
        let start = Instant::now();
        let path = self.compiler().resolve(name)?;
        let (compiled, cache_hit) = self.load(name, &path, options)?;
        self.execute(name, &compiled, variables, cache_hit, start)
    }

    /// Render `name` and write the result to standard output.
    pub fn display(&self, name: &str, variables: &TemplateContext) -> TemplateResult<()> {
        let output = self.render(name, variables)?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(output.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }

    /// Render template text directly. Nothing is cached.
    pub fn render_string(&self, source: &str, variables: &TemplateContext) -> TemplateResult<String> {
        const NAME: &str = "<string>";
        let start = Instant::now();
        let compiled = self.timed_compile(NAME, || self.compiler().compile_source(NAME, source))?;
        self.execute(NAME, &compiled, variables, false, start)
    }

    /// Compile `name` without touching the cache.
    pub fn compile(&self, name: &str) -> TemplateResult<CompiledTemplate> {
        let compiler = self.compiler();
        let path = compiler.resolve(name)?;
        self.timed_compile(name, || compiler.compile_path(name, &path))
    }

    /// Assign a variable visible to every render. Call-site variables win.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name, value);
    }

    pub fn assign_multiple<K, V>(&mut self, variables: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in variables {
            self.globals.insert(name, value);
        }
    }

    pub fn add_filter<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.registry.add_filter(name, filter);
    }

    pub fn add_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.registry.add_function(name, function);
    }

    /// Register a host-provided table of filters and functions.
    pub fn register_functions(&mut self, table: &Registry) {
        self.registry.extend(table);
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.config.cache_enabled = enabled;
    }

    /// Maximum age of a cache entry, in seconds.
    pub fn set_cache_lifetime(&mut self, seconds: u64) {
        self.config.cache_lifetime = seconds;
        if let Some(cache) = self.cache.as_mut() {
            cache.set_lifetime(Duration::from_secs(seconds));
        }
    }

    /// Remove every cached template. Returns the number of entries removed.
    pub fn clear_cache(&self) -> TemplateResult<usize> {
        match &self.cache {
            Some(cache) => cache.clear(),
            None => Ok(0),
        }
    }

    pub fn set_mode_oracle(&mut self, oracle: impl ModeOracle + 'static) {
        self.mode = Arc::new(oracle);
    }

    pub fn set_observer(&mut self, observer: Arc<dyn RenderObserver>) {
        self.observer = observer;
    }

    /// Counts of undefined references seen by this engine.
    pub fn undefined_references(&self) -> &UndefinedReferences {
        &self.undefined
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(self.loader.as_ref(), &self.registry, self.config.max_depth)
    }

    fn timed_compile(
        &self,
        name: &str,
        compile: impl FnOnce() -> TemplateResult<CompiledTemplate>,
    ) -> TemplateResult<CompiledTemplate> {
        let start = Instant::now();
        let compiled = compile()?;
        self.observer.on_compile(name, &compiled.path, start.elapsed());
        Ok(compiled)
    }

    /// Fetch a compiled template from the cache or compile it.
    fn load(
        &self,
        name: &str,
        path: &Path,
        options: RenderOptions,
    ) -> TemplateResult<(CompiledTemplate, bool)> {
        let cache = self
            .cache
            .as_ref()
            .filter(|_| options.use_cache && self.config.cache_enabled);

        if let Some(compiled) = cache.and_then(|cache| cache.get(path, self.loader.as_ref())) {
            tracing::debug!(template = name, path = %path.display(), "Template cache hit");
            return Ok((compiled, true));
        }

        let compiled = self.timed_compile(name, || self.compiler().compile_path(name, path))?;

        // Templates without a modification time could never be validated.
        if let Some(cache) = cache.filter(|_| self.loader.modified(path).is_some()) {
            tracing::debug!(template = name, path = %path.display(), "Template cache miss");
            if let Err(e) = cache.put(path, &compiled) {
                tracing::warn!(
                    template = name,
                    cache_root = %cache.root().display(),
                    error = %e,
                    "Could not write template cache entry"
                );
            }
        }
        Ok((compiled, false))
    }

    fn execute(
        &self,
        name: &str,
        compiled: &CompiledTemplate,
        variables: &TemplateContext,
        cache_hit: bool,
        start: Instant,
    ) -> TemplateResult<String> {
        let variables = self.globals.merged(variables);
        let mut ctx = EvalContext::new(&variables, &self.registry, &self.undefined)
            .with_development_mode(self.mode.is_development_mode())
            .with_max_loop_iterations(self.config.max_loop_iterations);

        let mut output = String::new();
        evaluate(&compiled.nodes, &mut ctx, &mut output)?;

        self.observer.on_render(&RenderRecord {
            template: name.to_string(),
            path: compiled.path.clone(),
            variables: variables.names(),
            variable_count: variables.len(),
            elapsed: start.elapsed(),
            memory_delta: output.capacity(),
            output_size: output.len(),
            cache_hit,
            timestamp: Utc::now(),
        });
        Ok(output)
    }
}
