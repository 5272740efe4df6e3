#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn bootdiag_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bootdiag"));
    cmd.env("HOME", home);
    for key in [
        "BOOTDIAG_CONFIG",
        "BOOTDIAG_UI_COLOR",
        "BOOTDIAG_SCAN_ROOT",
        "BOOTDIAG_SCAN_PROBE_TIMEOUT_SECS",
        "BOOTDIAG_SCAN_SHELL",
        "BOOTDIAG_CACHE_MAX_AGE_HOURS",
        "BOOTDIAG_FIX_TIMEOUT_SECS",
        "SUDO_UID",
        "SUDO_GID",
        "SUDO_USER",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    bootdiag_cmd(home).args(args).output().expect("run bootdiag")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!(
        "bootdiag-cli-test-{}-{seq}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

/// A home whose config points at a single probe under `<home>/probe-root`.
fn make_probe_home() -> PathBuf {
    let home = make_temp_home();
    let root = home.join("probe-root");
    write_file(
        &root.join("probes/boot.sh"),
        br#"#!/bin/sh
echo 'moderate|bad-fix|fails on purpose|exit 7|auto'
echo 'critical|ok-fix|fixable|echo done|auto'
echo 'low|manual|needs a human||none'
"#,
    );
    let config = format!(
        r#"
[scan]
root = "{}"
shell = "sh"

[[detectors]]
script = "probes/boot.sh"
display_name = "Boot"
description = "test probe"
"#,
        root.display()
    );
    write_file(&home.join(".config/bootdiag/config.toml"), config.as_bytes());
    home
}

fn json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).expect("parse json")
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn issues_and_fix_without_cached_scan_exit_2() {
    let home = make_probe_home();
    assert_eq!(run(&home, &["issues"]).status.code(), Some(2));
    assert_eq!(run(&home, &["fix", "--all"]).status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn zero_timeout_flag_exits_2() {
    let home = make_probe_home();
    let out = run(&home, &["scan", "--timeout", "0"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_then_issues_numbers_by_severity() {
    let home = make_probe_home();

    let out = run(&home, &["scan", "--json"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v = json(&out);
    assert_eq!(v["from_cache"], false);
    assert_eq!(v["issues"].as_array().expect("issues").len(), 3);
    assert_eq!(v["scripts_ran"], 1);
    assert_eq!(v["scripts_failed"], 0);

    let out = run(&home, &["scan", "--json"]);
    assert_eq!(json(&out)["from_cache"], true);

    let out = run(&home, &["issues", "--json"]);
    assert!(out.status.success());
    let v = json(&out);
    assert_eq!(v[0]["number"], 1);
    assert_eq!(v[0]["name"], "ok-fix");
    assert_eq!(v[1]["name"], "bad-fix");
    assert_eq!(v[2]["name"], "manual");
    assert_eq!(v[2]["fixable"], "none");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn failed_fix_exits_20_writes_log_and_clears_cache() {
    let home = make_probe_home();
    assert!(run(&home, &["scan", "--quiet"]).status.success());

    let out = run(&home, &["fix", "--select", "1,2", "--json"]);
    assert_eq!(out.status.code(), Some(20));
    let v = json(&out);
    assert_eq!(v["total_fixed"], 1);
    assert_eq!(v["total_failed"], 1);
    assert_eq!(v["user_level"][1]["error"]["kind"], "exit");
    assert_eq!(v["user_level"][1]["error"]["code"], 7);

    let logs: Vec<_> = std::fs::read_dir(home.join(".config/bootdiag/logs"))
        .expect("logs dir")
        .collect();
    assert_eq!(logs.len(), 1);

    assert_eq!(run(&home, &["issues"]).status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn dry_run_fix_all_skips_manual_and_keeps_cache() {
    let home = make_probe_home();
    assert!(run(&home, &["scan", "--quiet"]).status.success());

    let out = run(&home, &["fix", "--all", "--dry-run", "--json"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v = json(&out);
    assert_eq!(v["dry_run"], true);
    assert_eq!(v["total_fixed"], 2);
    assert_eq!(v["user_level"].as_array().expect("user").len(), 2);

    assert!(!home.join(".config/bootdiag/logs").exists());
    assert!(run(&home, &["issues", "--quiet"]).status.success());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn selecting_manual_or_unknown_issue_exits_2() {
    let home = make_probe_home();
    assert!(run(&home, &["scan", "--quiet"]).status.success());

    assert_eq!(run(&home, &["fix", "--select", "3"]).status.code(), Some(2));
    assert_eq!(run(&home, &["fix", "--select", "9"]).status.code(), Some(2));
    assert_eq!(run(&home, &["fix"]).status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn cache_clear_then_status_reports_invalid() {
    let home = make_probe_home();
    assert!(run(&home, &["scan", "--quiet"]).status.success());

    let v = json(&run(&home, &["cache", "status", "--json"]));
    assert_eq!(v["valid"], true);
    assert_eq!(v["issues"], 3);

    assert!(run(&home, &["cache", "clear"]).status.success());
    let v = json(&run(&home, &["cache", "status", "--json"]));
    assert_eq!(v["valid"], false);
    assert!(v.get("issues").is_none());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn detectors_reports_missing_scripts() {
    let home = make_temp_home();
    let out = run(
        &home,
        &["detectors", "--json", "--root", home.to_str().expect("utf8 home")],
    );
    assert!(out.status.success());
    let v = json(&out);
    let list = v.as_array().expect("array");
    assert_eq!(list.len(), 5);
    assert!(list.iter().all(|d| d["present"] == false));
    assert_eq!(list[0]["display_name"], "Failed Services");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn oversized_timeout_flag_exits_2() {
    let home = make_probe_home();
    let out = run(&home, &["scan", "--timeout", "18446744073709551615"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}
