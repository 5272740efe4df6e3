use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::Severity;

/// Fix commands that only take effect after a reboot even when the probe did
/// not tag them.
const REBOOT_MARKERS: &[&str] = &["update-grub", "grub-mkconfig", "update-initramfs", "dracut"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fixability {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "auto-sudo")]
    AutoSudo,
    #[serde(rename = "none")]
    Manual,
}

impl Fixability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Fixability::Auto => "auto",
            Fixability::AutoSudo => "auto-sudo",
            Fixability::Manual => "none",
        }
    }
}

impl fmt::Display for Fixability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Fixability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Fixability::Auto),
            "auto-sudo" => Ok(Fixability::AutoSudo),
            "none" | "manual" => Ok(Fixability::Manual),
            _ => Err(format!(
                "修正区分が不正です: {s}（auto|auto-sudo|none を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub fix_command: String,
    pub fixable: Fixability,
    pub source: String,
    #[serde(default)]
    pub requires_reboot: bool,
}

/// Identity of an issue for selection purposes: names are only unique within
/// one probe's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueKey {
    pub source: String,
    pub name: String,
}

impl Issue {
    pub fn key(&self) -> IssueKey {
        IssueKey {
            source: self.source.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_fixable(&self) -> bool {
        self.fixable != Fixability::Manual && !self.fix_command.trim().is_empty()
    }

    pub fn requires_elevation(&self) -> bool {
        self.fixable == Fixability::AutoSudo
    }

    pub fn needs_reboot(&self) -> bool {
        self.requires_reboot
            || REBOOT_MARKERS
                .iter()
                .any(|marker| self.fix_command.contains(marker))
    }
}

pub fn count_fixable(issues: &[Issue]) -> usize {
    issues.iter().filter(|i| i.is_fixable()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(fix_command: &str, fixable: Fixability) -> Issue {
        Issue {
            name: "n".to_string(),
            description: "d".to_string(),
            severity: Severity::Low,
            fix_command: fix_command.to_string(),
            fixable,
            source: "probe".to_string(),
            requires_reboot: false,
        }
    }

    #[test]
    fn manual_or_commandless_issues_are_not_fixable() {
        assert!(issue("systemctl reset-failed", Fixability::Auto).is_fixable());
        assert!(!issue("systemctl reset-failed", Fixability::Manual).is_fixable());
        assert!(!issue("  ", Fixability::AutoSudo).is_fixable());

        let issues = vec![
            issue("true", Fixability::Auto),
            issue("true", Fixability::AutoSudo),
            issue("", Fixability::Manual),
        ];
        assert_eq!(count_fixable(&issues), 2);
    }

    #[test]
    fn reboot_is_inferred_from_bootloader_commands() {
        assert!(issue("update-grub", Fixability::AutoSudo).needs_reboot());
        assert!(!issue("systemctl restart sshd", Fixability::AutoSudo).needs_reboot());

        let mut tagged = issue("snap remove foo", Fixability::AutoSudo);
        tagged.requires_reboot = true;
        assert!(tagged.needs_reboot());
    }

    #[test]
    fn fixability_tags_round_trip_through_json() {
        let v = serde_json::to_value(Fixability::AutoSudo).expect("serialize");
        assert_eq!(v, serde_json::json!("auto-sudo"));
        assert_eq!("MANUAL".parse::<Fixability>(), Ok(Fixability::Manual));
    }
}
