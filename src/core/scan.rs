use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::{Issue, Severity};

/// Probe-level failures. They are collected into the scan result and never
/// abort the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("{detector}: タイムアウトしました（{timeout_ms}ms）")]
    Timeout { detector: String, timeout_ms: u64 },
    #[error("{detector}: 中断されました")]
    Cancelled { detector: String },
    #[error("{detector}: スクリプトが見つかりません: {path}")]
    Missing { detector: String, path: String },
    #[error("{detector}: 起動に失敗しました: {message}")]
    Launch { detector: String, message: String },
    #[error("{detector}: 出力なしで終了しました（exit_code={code}） {stderr}")]
    Exit {
        detector: String,
        code: i32,
        stderr: String,
    },
}

impl ProbeError {
    pub fn detector(&self) -> &str {
        match self {
            ProbeError::Timeout { detector, .. }
            | ProbeError::Cancelled { detector }
            | ProbeError::Missing { detector, .. }
            | ProbeError::Launch { detector, .. }
            | ProbeError::Exit { detector, .. } => detector,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub issues: Vec<Issue>,
    pub errors: Vec<ProbeError>,
    pub scan_time: String,
    pub duration_ms: u64,
    pub scripts_ran: usize,
    pub scripts_failed: usize,
}

impl ScanResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn summary(&self) -> String {
        let mut s = format!("スキャン完了（{}ms）\n", self.duration_ms);

        let parts: Vec<String> = Severity::ALL
            .iter()
            .filter_map(|&sev| {
                let n = self.count(sev);
                (n > 0).then(|| format!("{sev} {n}件"))
            })
            .collect();

        if parts.is_empty() {
            s.push_str("問題は見つかりませんでした");
        } else {
            s.push_str(&format!(
                "{}件の問題: {}",
                self.issues.len(),
                parts.join(", ")
            ));
        }

        if self.scripts_failed > 0 {
            s.push_str(&format!("（{}件のスクリプトが失敗）", self.scripts_failed));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Fixability;

    fn issue(name: &str, severity: Severity) -> Issue {
        Issue {
            name: name.to_string(),
            description: String::new(),
            severity,
            fix_command: String::new(),
            fixable: Fixability::Manual,
            source: "probe".to_string(),
            requires_reboot: false,
        }
    }

    #[test]
    fn summary_counts_by_severity_and_failures() {
        let result = ScanResult {
            issues: vec![
                issue("a", Severity::Critical),
                issue("b", Severity::Low),
                issue("c", Severity::Low),
            ],
            errors: vec![ProbeError::Cancelled {
                detector: "x".to_string(),
            }],
            scan_time: "2026-01-01T00:00:00Z".to_string(),
            duration_ms: 12,
            scripts_ran: 5,
            scripts_failed: 1,
        };
        let s = result.summary();
        assert!(s.contains("3件の問題: critical 1件, low 2件"), "{s}");
        assert!(s.contains("1件のスクリプトが失敗"), "{s}");
    }

    #[test]
    fn probe_errors_serialize_with_kind_tag() {
        let err = ProbeError::Timeout {
            detector: "Failed Services".to_string(),
            timeout_ms: 30_000,
        };
        let v = serde_json::to_value(&err).expect("serialize");
        assert_eq!(v["kind"], "timeout");
        assert_eq!(v["timeout_ms"], 30_000);
        assert!(err.is_timeout());
        assert_eq!(err.detector(), "Failed Services");
    }
}
