use crate::core::{Fixability, Issue, Severity};

pub const FIELD_DELIMITER: char = '|';

const REBOOT_TAG: &str = "reboot";

/// Decodes probe output into issues, one per line:
///
/// `severity|name|description|fix command|fixable[|reboot]`
///
/// Lines that do not match are skipped. The fix command may itself contain
/// the delimiter, so the leading fields are taken from the front and the tags
/// from the back.
pub fn parse_issues(raw: &str, source: &str) -> Vec<Issue> {
    raw.lines()
        .filter_map(|line| parse_line(line, source))
        .collect()
}

pub fn parse_line(line: &str, source: &str) -> Option<Issue> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if parts.len() < 5 {
        return None;
    }

    let severity = parts[0].parse::<Severity>().ok()?;
    let name = parts[1].trim();
    if name.is_empty() {
        return None;
    }
    let description = parts[2].trim();

    let last = parts.len() - 1;
    let tagged_reboot = parts.len() >= 6 && parts[last].trim().eq_ignore_ascii_case(REBOOT_TAG);
    let (fixable, end, requires_reboot) = match parts[last].parse::<Fixability>() {
        Ok(fixable) => (fixable, last, false),
        Err(_) if tagged_reboot => (parts[last - 1].parse::<Fixability>().ok()?, last - 1, true),
        Err(_) => return None,
    };

    let fix_command = parts[3..end]
        .join(&FIELD_DELIMITER.to_string())
        .trim()
        .to_string();

    Some(Issue {
        name: name.to_string(),
        description: description.to_string(),
        severity,
        fix_command,
        fixable,
        source: source.to_string(),
        requires_reboot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_lines_are_skipped() {
        let raw = "Critical|Failed Service|sshd failed to start|systemctl restart sshd|auto-sudo\ngarbage line\nLow|Cosmetic|ALSA warning||none";
        let issues = parse_issues(raw, "failed-services");
        assert_eq!(issues.len(), 2);

        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].fixable, Fixability::AutoSudo);
        assert_eq!(issues[0].name, "Failed Service");
        assert_eq!(issues[0].fix_command, "systemctl restart sshd");
        assert_eq!(issues[0].source, "failed-services");

        assert_eq!(issues[1].severity, Severity::Low);
        assert_eq!(issues[1].fix_command, "");
        assert_eq!(issues[1].fixable, Fixability::Manual);
    }

    #[test]
    fn blank_and_empty_input_yield_nothing() {
        assert!(parse_issues("", "p").is_empty());
        assert!(parse_issues("\n\n   \n", "p").is_empty());
    }

    #[test]
    fn unknown_tags_and_missing_names_are_rejected() {
        assert!(parse_line("High|x|y|z|auto", "p").is_none());
        assert!(parse_line("Low|x|y|z|sometimes", "p").is_none());
        assert!(parse_line("Low||y|z|auto", "p").is_none());
        assert!(parse_line("Low|x|y|auto", "p").is_none());
    }

    #[test]
    fn severity_tag_is_case_insensitive() {
        let issue = parse_line("MODERATE|Net|wait-online slow|systemctl disable NetworkManager-wait-online|AUTO-SUDO", "p")
            .expect("issue");
        assert_eq!(issue.severity, Severity::Moderate);
        assert_eq!(issue.fixable, Fixability::AutoSudo);
    }

    #[test]
    fn fix_command_may_contain_pipes() {
        let issue = parse_line(
            "Moderate|Orphans|stale units|systemctl list-units | grep orphan | xargs systemctl disable|auto-sudo",
            "p",
        )
        .expect("issue");
        assert_eq!(
            issue.fix_command,
            "systemctl list-units | grep orphan | xargs systemctl disable"
        );
        assert!(!issue.requires_reboot);
    }

    #[test]
    fn optional_reboot_tag_is_recognised() {
        let issue = parse_line("Critical|Kernel|bad cmdline|update-grub|auto-sudo|reboot", "p")
            .expect("issue");
        assert!(issue.requires_reboot);
        assert_eq!(issue.fix_command, "update-grub");
        assert_eq!(issue.fixable, Fixability::AutoSudo);
    }
}
