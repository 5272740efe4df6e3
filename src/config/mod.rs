use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::context::MAX_TIMEOUT;
use crate::registry::DetectorSpec;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    pub fix: FixConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detectors: Option<Vec<DetectorSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub probe_timeout_secs: u64,
    pub shell: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    pub max_age_hours: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixConfig {
    pub timeout_secs: u64,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig { color: true },
            scan: ScanConfig {
                root: PathBuf::from("."),
                probe_timeout_secs: 30,
                shell: "bash".to_string(),
            },
            cache: CacheConfig { max_age_hours: 24 },
            fix: FixConfig { timeout_secs: 300 },
            detectors: None,
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scan: Option<RawScanConfig>,
    cache: Option<RawCacheConfig>,
    fix: Option<RawFixConfig>,
    detectors: Option<Vec<DetectorSpec>>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawScanConfig {
    root: Option<PathBuf>,
    probe_timeout_secs: Option<u64>,
    shell: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCacheConfig {
    max_age_hours: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFixConfig {
    timeout_secs: Option<u64>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/bootdiag/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw)?;
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(root) = scan.root {
            cfg.scan.root = root;
        }
        if let Some(secs) = scan.probe_timeout_secs {
            cfg.scan.probe_timeout_secs = secs;
        }
        if let Some(shell) = scan.shell {
            cfg.scan.shell = shell;
        }
    }

    if let Some(cache) = raw.cache {
        if let Some(hours) = cache.max_age_hours {
            cfg.cache.max_age_hours = hours;
        }
    }

    if let Some(fix) = raw.fix {
        if let Some(secs) = fix.timeout_secs {
            cfg.fix.timeout_secs = secs;
        }
    }

    if let Some(detectors) = raw.detectors {
        if detectors.is_empty() {
            return Err(anyhow!(
                "[[detectors]] を指定する場合は1件以上必要です"
            ));
        }
        cfg.detectors = Some(detectors);
    }

    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("BOOTDIAG_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "BOOTDIAG_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("BOOTDIAG_SCAN_ROOT") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.scan.root = PathBuf::from(v);
        }
    }
    if let Ok(v) = std::env::var("BOOTDIAG_SCAN_PROBE_TIMEOUT_SECS") {
        cfg.scan.probe_timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "BOOTDIAG_SCAN_PROBE_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("BOOTDIAG_SCAN_SHELL") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.scan.shell = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("BOOTDIAG_CACHE_MAX_AGE_HOURS") {
        cfg.cache.max_age_hours = v
            .trim()
            .parse::<u64>()
            .with_context(|| "BOOTDIAG_CACHE_MAX_AGE_HOURS")?;
    }
    if let Ok(v) = std::env::var("BOOTDIAG_FIX_TIMEOUT_SECS") {
        cfg.fix.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "BOOTDIAG_FIX_TIMEOUT_SECS")?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.scan.probe_timeout_secs == 0 {
        return Err(anyhow!("probe_timeout_secs は1以上を指定してください"));
    }
    if cfg.fix.timeout_secs == 0 {
        return Err(anyhow!("fix.timeout_secs は1以上を指定してください"));
    }
    let max = MAX_TIMEOUT.as_secs();
    if cfg.scan.probe_timeout_secs > max {
        return Err(anyhow!("probe_timeout_secs は{max}以下を指定してください"));
    }
    if cfg.fix.timeout_secs > max {
        return Err(anyhow!("fix.timeout_secs は{max}以下を指定してください"));
    }
    if cfg.scan.shell.trim().is_empty() {
        return Err(anyhow!("scan.shell が空です"));
    }
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_overrides_defaults_field_by_field() {
        let raw: RawConfig = toml::from_str(
            r#"
[scan]
probe_timeout_secs = 5

[cache]
max_age_hours = 1

[[detectors]]
script = "probes/a.sh"
display_name = "A"
description = "checks a"
"#,
        )
        .expect("parse");
        let mut cfg = EffectiveConfig::default();
        apply_raw_config(&mut cfg, raw).expect("apply");

        assert_eq!(cfg.scan.probe_timeout_secs, 5);
        assert_eq!(cfg.scan.shell, "bash");
        assert_eq!(cfg.cache.max_age_hours, 1);
        assert_eq!(cfg.fix.timeout_secs, 300);
        let detectors = cfg.detectors.expect("detectors");
        assert_eq!(detectors[0].script, "probes/a.sh");
    }

    #[test]
    fn empty_detector_list_is_rejected() {
        let raw: RawConfig = toml::from_str("detectors = []\n").expect("parse");
        let mut cfg = EffectiveConfig::default();
        assert!(apply_raw_config(&mut cfg, raw).is_err());
    }

    #[test]
    fn zero_timeouts_are_invalid() {
        let mut cfg = EffectiveConfig::default();
        cfg.scan.probe_timeout_secs = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn timeouts_above_one_day_are_invalid() {
        let mut cfg = EffectiveConfig::default();
        cfg.scan.probe_timeout_secs = u64::MAX;
        assert!(validate(&cfg).is_err());

        let mut cfg = EffectiveConfig::default();
        cfg.fix.timeout_secs = MAX_TIMEOUT.as_secs() + 1;
        assert!(validate(&cfg).is_err());

        cfg.fix.timeout_secs = MAX_TIMEOUT.as_secs();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("Yes").expect("yes"));
        assert!(!parse_bool(" off ").expect("off"));
        assert!(parse_bool("maybe").is_err());
    }
}
