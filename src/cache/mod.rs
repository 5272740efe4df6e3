use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::ScanResult;

pub const SCHEMA_VERSION: &str = "1.0";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of the current boot marker. `None` means it cannot be determined,
/// in which case only the freshness window applies.
pub trait BootMarkerSource: Send + Sync {
    fn current(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBootMarker;

impl BootMarkerSource for SystemBootMarker {
    fn current(&self) -> Option<String> {
        crate::platform::boot_marker()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBootMarker(pub Option<String>);

impl BootMarkerSource for FixedBootMarker {
    fn current(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub schema_version: String,
    #[serde(flatten)]
    pub result: ScanResult,
    pub boot_marker: Option<String>,
    pub written_at: u64,
}

pub fn default_cache_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/bootdiag/diagnostics-cache.json")
}

pub struct CacheStore {
    path: PathBuf,
    max_age: Duration,
    boot: Box<dyn BootMarkerSource>,
    reboot_detected: AtomicBool,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("path", &self.path)
            .field("max_age", &self.max_age)
            .field("reboot_detected", &self.was_reboot_detected())
            .finish()
    }
}

impl CacheStore {
    pub fn new(path: PathBuf, max_age: Duration) -> Self {
        Self::with_boot_marker(path, max_age, SystemBootMarker)
    }

    pub fn with_boot_marker(
        path: PathBuf,
        max_age: Duration,
        boot: impl BootMarkerSource + 'static,
    ) -> Self {
        Self {
            path,
            max_age,
            boot: Box::new(boot),
            reboot_detected: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached scan, unless absent, unreadable, from an earlier boot or
    /// older than the freshness window. A boot mismatch wins over age.
    pub fn get(&self) -> Option<ScanResult> {
        self.reboot_detected.store(false, Ordering::SeqCst);

        let entry = self.read_entry()?;

        if let (Some(stored), Some(current)) = (&entry.boot_marker, self.boot.current()) {
            if *stored != current {
                debug!(stored = %stored, current = %current, "boot marker changed; cache is stale");
                self.reboot_detected.store(true, Ordering::SeqCst);
                return None;
            }
        }

        let age = Duration::from_secs(unix_now().saturating_sub(entry.written_at));
        if age > self.max_age {
            debug!(age_secs = age.as_secs(), "cache entry expired");
            return None;
        }

        Some(entry.result)
    }

    /// Replaces the persisted entry atomically (write temp file, then rename).
    pub fn save(&self, result: &ScanResult) -> Result<()> {
        let entry = CacheEntry {
            schema_version: SCHEMA_VERSION.to_string(),
            result: result.clone(),
            boot_marker: self.boot.current(),
            written_at: unix_now(),
        };
        let bytes = serde_json::to_vec_pretty(&entry).context("キャッシュのシリアライズに失敗しました")?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).with_context(|| {
            format!("キャッシュディレクトリの作成に失敗しました: {}", dir.display())
        })?;
        write_atomic(&self.path, &bytes)
            .with_context(|| format!("キャッシュの書き込みに失敗しました: {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("キャッシュの削除に失敗しました: {}", self.path.display())),
        }
    }

    /// Whether the most recent `get` rejected the entry because of a reboot.
    pub fn was_reboot_detected(&self) -> bool {
        self.reboot_detected.load(Ordering::SeqCst)
    }

    pub fn age_string(&self) -> String {
        match self.read_entry() {
            Some(entry) => format_age(unix_now().saturating_sub(entry.written_at)),
            None => "未スキャン".to_string(),
        }
    }

    fn read_entry(&self) -> Option<CacheEntry> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), "cache read failed: {err}");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %self.path.display(), "cache parse failed: {err}");
                return None;
            }
        };
        if entry.schema_version != SCHEMA_VERSION {
            debug!(version = %entry.schema_version, "cache schema mismatch");
            return None;
        }
        Some(entry)
    }
}

pub fn format_age(secs: u64) -> String {
    match secs {
        0..60 => "たった今".to_string(),
        60..3600 => format!("{}分前", secs / 60),
        3600..86400 => format!("{}時間前", secs / 3600),
        _ => format!("{}日前", secs / 86400),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{nanos}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("cache"),
        std::process::id()
    ));
    if let Err(err) = std::fs::write(&tmp_path, bytes) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
