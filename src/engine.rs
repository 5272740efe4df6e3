use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::cache::{CacheStore, default_cache_path};
use crate::context::RunContext;
use crate::core::{BatchFixResult, DetectorInfo, DetectorProgress, Issue, ScanResult};
use crate::detect::{self, DetectOptions};
use crate::fix::{Elevation, Fixer, FixerOptions};
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub root: PathBuf,
    pub detect: DetectOptions,
    pub fix: FixerOptions,
    pub cache_max_age: Duration,
}

pub struct Engine {
    opts: EngineOptions,
    home_dir: PathBuf,
    registry: Registry,
    cache: CacheStore,
}

impl Engine {
    pub fn new(opts: EngineOptions, registry: Registry) -> Result<Self> {
        let home_dir = crate::platform::effective_home_dir()?;
        let cache = CacheStore::new(default_cache_path(&home_dir), opts.cache_max_age);
        Ok(Self::with_cache(opts, registry, home_dir, cache))
    }

    pub fn with_cache(
        opts: EngineOptions,
        registry: Registry,
        home_dir: PathBuf,
        cache: CacheStore,
    ) -> Self {
        Self {
            opts,
            home_dir,
            registry,
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.opts.root
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn detector_infos(&self) -> Vec<DetectorInfo> {
        self.registry.detector_infos()
    }

    /// Runs a full scan, handing every progress event to `on_progress` as it
    /// arrives, and persists the result. A cache write failure is only logged.
    pub fn scan(
        &self,
        ctx: &RunContext,
        mut on_progress: impl FnMut(&DetectorProgress),
    ) -> ScanResult {
        let (tx, rx) = mpsc::channel();
        let result = std::thread::scope(|scope| {
            let handle = scope.spawn(move || {
                detect::run_full_scan_with_progress(
                    ctx,
                    &self.registry,
                    &self.opts.root,
                    &self.opts.detect,
                    tx,
                )
            });
            for event in rx {
                on_progress(&event);
            }
            match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });

        if let Err(err) = self.cache.save(&result) {
            warn!("cache save failed: {err:#}");
        }
        result
    }

    pub fn cached(&self) -> Option<ScanResult> {
        self.cache.get()
    }

    /// The cached result when still valid, otherwise a fresh scan. The flag is
    /// true when the result came from the cache.
    pub fn cached_or_scan(
        &self,
        ctx: &RunContext,
        on_progress: impl FnMut(&DetectorProgress),
    ) -> (ScanResult, bool) {
        match self.cached() {
            Some(result) => (result, true),
            None => (self.scan(ctx, on_progress), false),
        }
    }

    /// Runs the fixes and, unless this is a dry run, invalidates the cache so
    /// the next read triggers a fresh scan.
    pub fn fix(
        &self,
        ctx: &RunContext,
        issues: &[Issue],
        elevation: Box<dyn Elevation>,
    ) -> BatchFixResult {
        let opts = FixerOptions {
            cwd: Some(self.opts.root.clone()),
            ..self.opts.fix.clone()
        };
        let result = Fixer::new(opts, elevation).execute_batch(ctx, issues);

        if !result.dry_run && !issues.is_empty() {
            if let Err(err) = self.cache.clear() {
                warn!("cache clear failed: {err:#}");
            }
        }
        result
    }
}
