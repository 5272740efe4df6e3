use serde::{Deserialize, Serialize};

use crate::core::Issue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixError {
    #[error("自動修正できない問題です: {name}")]
    NotFixable { name: String },
    #[error("修正コマンドが空です: {name}")]
    EmptyCommand { name: String },
    #[error("管理者権限が確立されていません（sudo の資格情報が必要です）: {name}")]
    ElevationUnavailable { name: String },
    #[error("中断されました")]
    Cancelled,
    #[error("起動に失敗しました: {message}")]
    Launch { message: String },
    #[error("タイムアウトしました（{timeout_ms}ms）")]
    Timeout { timeout_ms: u64 },
    #[error("コマンドが失敗しました（exit_code={code}）")]
    Exit { code: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub issue: Issue,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FixError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchFixResult {
    pub user_level: Vec<FixResult>,
    pub sudo_level: Vec<FixResult>,
    pub total_fixed: usize,
    pub total_failed: usize,
    pub needs_reboot: bool,
    pub dry_run: bool,
}

impl BatchFixResult {
    pub fn all_successful(&self) -> bool {
        self.total_failed == 0
    }

    pub fn results(&self) -> impl Iterator<Item = &FixResult> {
        self.user_level.iter().chain(self.sudo_level.iter())
    }

    pub(crate) fn record_user(&mut self, result: FixResult) {
        self.tally(&result);
        self.user_level.push(result);
    }

    pub(crate) fn record_sudo(&mut self, result: FixResult) {
        self.tally(&result);
        self.sudo_level.push(result);
    }

    fn tally(&mut self, result: &FixResult) {
        if result.success {
            self.total_fixed += 1;
            if result.issue.needs_reboot() && !self.dry_run {
                self.needs_reboot = true;
            }
        } else {
            self.total_failed += 1;
        }
    }
}
