use anyhow::Error;
use std::io::{self, Write};
use std::time::Duration;
use unicode_width::UnicodeWidthChar;

use crate::core::{
    BatchFixResult, DetectorInfo, DetectorStatus, FixResult, Fixability, Issue, ScanResult,
    Severity, count_fixable,
};
use crate::grouping::{flatten, group_by_severity};
use crate::registry::DetectorSpec;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `bootdiag --help` を参照してください"
    );
}

/// Scan header plus the issue list numbered in flattened order. The numbers
/// are the ones `fix --select` accepts.
pub fn print_scan(result: &ScanResult, cfg: &UiConfig, age: Option<&str>) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    match age {
        Some(age) => {
            let _ = writeln!(
                out,
                "前回のスキャン: {age}（{}件の問題）",
                result.issues.len()
            );
        }
        None => {
            let _ = writeln!(
                out,
                "{}（{}）",
                result.summary(),
                format_duration(result.duration())
            );
        }
    }

    for err in &result.errors {
        let _ = writeln!(out, "- 失敗: {err}");
    }

    if result.issues.is_empty() {
        return;
    }
    let _ = writeln!(out, "修正可能: {}件", count_fixable(&result.issues));

    let grouped = group_by_severity(&result.issues);
    let flat = flatten(&grouped);
    let mut index = 0usize;
    for severity in Severity::ALL {
        let Some(bucket) = grouped.get(&severity) else {
            continue;
        };
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}（{}件）:",
            format_severity(severity, cfg.color),
            bucket.len()
        );
        for issue in bucket {
            index += 1;
            write_issue(&mut out, index, issue, cfg.color);
        }
    }
    debug_assert_eq!(index, flat.len());
}

fn write_issue(out: &mut dyn Write, index: usize, issue: &Issue, color: bool) {
    let _ = writeln!(out, "  [{index}] {}: {}", issue.name, issue.description);
    if issue.fix_command.is_empty() {
        return;
    }
    let tag = format_fixability(issue.fixable, color);
    let reboot = if issue.needs_reboot() {
        "（再起動が必要）"
    } else {
        ""
    };
    let _ = writeln!(out, "      [{tag}] {}{reboot}", issue.fix_command);
}

pub fn print_fix_result(result: &BatchFixResult, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    if result.dry_run {
        let _ = writeln!(out, "ドライラン: コマンドは実行していません");
    }

    for (label, results) in [
        ("ユーザー権限", &result.user_level),
        ("管理者権限", &result.sudo_level),
    ] {
        if results.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{label}:");
        for r in results {
            write_fix_result(&mut out, r, cfg);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "結果: 成功={} 失敗={}",
        result.total_fixed, result.total_failed
    );
    if result.needs_reboot {
        let _ = writeln!(out, "- 変更を反映するには再起動してください");
    }
}

fn write_fix_result(out: &mut dyn Write, r: &FixResult, cfg: &UiConfig) {
    let mark = match (r.success, cfg.color) {
        (true, true) => "\x1b[32mOK\x1b[0m",
        (true, false) => "OK",
        (false, true) => "\x1b[31mNG\x1b[0m",
        (false, false) => "NG",
    };
    let _ = writeln!(out, "- [{mark}] {}", r.issue.name);
    if let Some(err) = &r.error {
        let _ = writeln!(out, "    {err}");
    }
    if cfg.verbose || !r.success {
        for line in r.output.lines().take(20) {
            let _ = writeln!(out, "    | {line}");
        }
    }
}

pub fn print_detectors(infos: &[DetectorInfo], missing: &[&DetectorSpec], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let name_w = infos
        .iter()
        .map(|i| visible_width_ansi(&i.display_name))
        .max()
        .unwrap_or(0);
    for info in infos {
        let absent = missing.iter().any(|m| m.script == info.script);
        let state = if absent {
            "見つかりません"
        } else {
            "OK"
        };
        let _ = writeln!(
            out,
            "{}  {}  {}",
            pad_end_display(&info.display_name, name_w),
            state,
            info.script
        );
        if cfg.verbose {
            let _ = writeln!(out, "    {}", info.description);
        }
    }
}

pub fn format_progress_line(info: &DetectorInfo) -> String {
    let mut line = format!("{} [{}]", info.display_name, format_status(info.status));
    if info.status == DetectorStatus::Complete {
        line.push_str(&format!(" {}件", info.issue_count));
    }
    if let Some(d) = info.duration {
        line.push_str(&format!(" {}", format_duration(d)));
    }
    if let Some(err) = &info.error {
        line.push_str(&format!(" - {err}"));
    }
    line
}

pub fn format_status(status: DetectorStatus) -> &'static str {
    match status {
        DetectorStatus::Pending => "待機中",
        DetectorStatus::Running => "実行中",
        DetectorStatus::Complete => "完了",
        DetectorStatus::Failed => "失敗",
        DetectorStatus::TimedOut => "タイムアウト",
    }
}

pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = match severity {
        Severity::Critical => "Critical",
        Severity::Moderate => "Moderate",
        Severity::Low => "Low",
    };
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Critical => "31",
        Severity::Moderate => "33",
        Severity::Low => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_fixability(fixable: Fixability, color: bool) -> String {
    let s = fixable.as_str();
    if !color {
        return s.to_string();
    }
    let code = match fixable {
        Fixability::Auto => "32",
        Fixability::AutoSudo => "33",
        Fixability::Manual => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
