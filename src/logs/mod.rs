use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{BatchFixResult, FixResult};

#[derive(Debug, Serialize)]
struct FixBatchLog {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    status: &'static str,
    elevation: String,
    total_fixed: usize,
    total_failed: usize,
    needs_reboot: bool,
    user_level: Vec<FixAttemptLog>,
    sudo_level: Vec<FixAttemptLog>,
}

#[derive(Debug, Serialize)]
struct FixAttemptLog {
    issue: String,
    source: String,
    fix_command: String,
    success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&FixResult> for FixAttemptLog {
    fn from(r: &FixResult) -> Self {
        Self {
            issue: r.issue.name.clone(),
            source: r.issue.source.clone(),
            fix_command: r.issue.fix_command.clone(),
            success: r.success,
            output: r.output.clone(),
            error: r.error.as_ref().map(ToString::to_string),
        }
    }
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/bootdiag/logs")
}

pub fn write_fix_batch_log(
    home_dir: &Path,
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    elevation: &str,
    result: &BatchFixResult,
) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("ログディレクトリの作成に失敗しました: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = finished_at.unix_timestamp_nanos();
    let path = dir.join(format!("fix-batch-{pid}-{ts}.json"));

    let log = FixBatchLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: "fix",
        started_at: format_ts(started_at),
        finished_at: format_ts(finished_at),
        status: if result.all_successful() {
            "ok"
        } else {
            "partial_error"
        },
        elevation: elevation.to_string(),
        total_fixed: result.total_fixed,
        total_failed: result.total_failed,
        needs_reboot: result.needs_reboot,
        user_level: result.user_level.iter().map(FixAttemptLog::from).collect(),
        sudo_level: result.sudo_level.iter().map(FixAttemptLog::from).collect(),
    };

    let json = serde_json::to_vec_pretty(&log).context("ログのシリアライズに失敗しました")?;
    std::fs::write(&path, json)
        .with_context(|| format!("ログの書き込みに失敗しました: {}", path.display()))?;
    Ok(path)
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}
