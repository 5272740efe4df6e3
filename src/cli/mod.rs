use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::context::RunContext;
use crate::core::{Issue, ScanResult};
use crate::detect::DetectOptions;
use crate::engine::{Engine, EngineOptions};
use crate::fix::FixerOptions;
use crate::grouping::{IssueSelection, ordered};
use crate::registry::{DetectorSpec, Registry};
use crate::ui::UiConfig;

mod interactive;

#[derive(Debug, Parser)]
#[command(
    name = "bootdiag",
    version,
    about = "起動まわりの問題を診断スクリプトで検出し、選択した修正を実行する"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory the probe script paths are resolved against.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
    /// Per-probe timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Scan(ScanArgs),
    Issues,
    Fix(FixArgs),
    Cache(CacheArgs),
    Detectors,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Ignore the cached result.
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct FixArgs {
    /// Issue numbers as shown by `bootdiag issues`.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub select: Vec<usize>,
    #[arg(long, conflicts_with = "select")]
    pub all: bool,
    #[arg(long, conflicts_with_all = ["select", "all"])]
    pub interactive: bool,
    /// Authenticate with sudo before running elevated fixes.
    #[arg(long)]
    pub sudo: bool,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    Status,
    Clear,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Serialize)]
struct ScanView<'a> {
    from_cache: bool,
    reboot_detected: bool,
    #[serde(flatten)]
    result: &'a ScanResult,
}

#[derive(Debug, Serialize)]
struct NumberedIssue<'a> {
    number: usize,
    #[serde(flatten)]
    issue: &'a Issue,
}

#[derive(Debug, Serialize)]
struct CacheStatusView {
    path: String,
    valid: bool,
    reboot_detected: bool,
    age: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DetectorView<'a> {
    #[serde(flatten)]
    spec: &'a DetectorSpec,
    present: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("BOOTDIAG_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    let ui_cfg = UiConfig {
        color: stdout_is_tty && cfg.ui.color && !cli.no_color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let probe_timeout_secs = cli.timeout.unwrap_or(cfg.scan.probe_timeout_secs);
    if probe_timeout_secs == 0 {
        return Err(crate::exit::invalid_args(
            "--timeout は 0 より大きい必要があります",
        ));
    }
    if probe_timeout_secs > crate::context::MAX_TIMEOUT.as_secs() {
        return Err(crate::exit::invalid_args(format!(
            "--timeout は {} 以下を指定してください",
            crate::context::MAX_TIMEOUT.as_secs()
        )));
    }

    let registry = match cfg.detectors.clone() {
        Some(specs) => Registry::new(specs).map_err(crate::exit::invalid_args_err)?,
        None => Registry::builtin(),
    };

    let engine = Engine::new(
        EngineOptions {
            root: cli.root.clone().unwrap_or_else(|| cfg.scan.root.clone()),
            detect: DetectOptions {
                probe_timeout: Duration::from_secs(probe_timeout_secs),
                shell: cfg.scan.shell.clone(),
            },
            fix: FixerOptions {
                shell: cfg.scan.shell.clone(),
                timeout: Duration::from_secs(cfg.fix.timeout_secs),
                dry_run: cli.dry_run,
                cwd: None,
            },
            cache_max_age: Duration::from_secs(cfg.cache.max_age_hours.saturating_mul(3600)),
        },
        registry,
    )?;

    let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;

    match cli.command {
        Commands::Scan(args) => {
            let ctx = RunContext::new();
            let (result, from_cache) = run_scan(&engine, &ctx, args.refresh, show_progress);
            let reboot_detected = !from_cache && engine.cache().was_reboot_detected();
            if cli.json {
                write_json(&ScanView {
                    from_cache,
                    reboot_detected,
                    result: &result,
                })?;
            } else {
                if reboot_detected && !ui_cfg.quiet {
                    eprintln!("再起動を検出したため、キャッシュを破棄して再スキャンしました");
                }
                let age = from_cache.then(|| engine.cache().age_string());
                crate::ui::print_scan(&result, &ui_cfg, age.as_deref());
            }
        }
        Commands::Issues => {
            let result = require_cached_scan(&engine)?;
            if cli.json {
                let issues = ordered(&result.issues);
                let numbered: Vec<NumberedIssue<'_>> = issues
                    .iter()
                    .enumerate()
                    .map(|(i, issue)| NumberedIssue {
                        number: i + 1,
                        issue,
                    })
                    .collect();
                write_json(&numbered)?;
            } else {
                let age = engine.cache().age_string();
                crate::ui::print_scan(&result, &ui_cfg, Some(&age));
            }
        }
        Commands::Fix(args) => {
            let result = require_cached_scan(&engine)?;
            let issues = ordered(&result.issues);

            let selected = if args.interactive {
                if !(ui_cfg.stdin_is_tty && ui_cfg.stderr_is_tty) {
                    return Err(crate::exit::invalid_args(
                        "fix --interactive は TTY が必要です（stdin + stderr）",
                    ));
                }
                let fixable: Vec<Issue> =
                    issues.iter().filter(|i| i.is_fixable()).cloned().collect();
                if fixable.is_empty() {
                    return Err(crate::exit::invalid_args("修正可能な問題がありません"));
                }
                let selection = interactive::prompt_fix_selection(&fixable)
                    .map_err(crate::exit::invalid_args_err)?;
                let picked = selection.pick(&fixable);
                if picked.is_empty() {
                    if !ui_cfg.quiet {
                        eprintln!("キャンセルしました。");
                    }
                    return Ok(());
                }
                picked
            } else if args.all {
                let mut selection = IssueSelection::new();
                selection.select_all_fixable(&issues);
                selection.resolve(&issues)
            } else if !args.select.is_empty() {
                select_by_number(&issues, &args.select)?
            } else {
                return Err(crate::exit::invalid_args(
                    "fix: --select N / --all / --interactive のいずれかを指定してください",
                ));
            };

            if selected.is_empty() {
                return Err(crate::exit::invalid_args("修正可能な問題がありません"));
            }

            let needs_sudo = !crate::platform::is_root()
                && selected.iter().any(Issue::requires_elevation);
            let sudo_cached = if args.sudo && needs_sudo && !cli.dry_run {
                crate::platform::validate_sudo().map_err(crate::exit::invalid_args_err)?;
                true
            } else {
                args.sudo
            };

            let elevation = crate::fix::elevation_for_current_user(sudo_cached);
            let elevation_name = elevation.name();
            let ctx = RunContext::new();
            let started_at = OffsetDateTime::now_utc();
            let batch = engine.fix(&ctx, &selected, elevation);
            let finished_at = OffsetDateTime::now_utc();

            if !batch.dry_run {
                match crate::logs::write_fix_batch_log(
                    engine.home_dir(),
                    started_at,
                    finished_at,
                    elevation_name,
                    &batch,
                ) {
                    Ok(path) => {
                        if ui_cfg.verbose && !cli.json {
                            eprintln!("ログ: {}", path.display());
                        }
                    }
                    Err(err) => warn!("fix log write failed: {err:#}"),
                }
            }

            if cli.json {
                write_json(&batch)?;
            } else {
                crate::ui::print_fix_result(&batch, &ui_cfg);
            }

            if batch.total_failed > 0 {
                return Err(crate::exit::fix_failed(format!(
                    "{}件の修正が失敗しました",
                    batch.total_failed
                )));
            }
        }
        Commands::Cache(args) => match args.command {
            CacheCommand::Status => {
                let cache = engine.cache();
                let cached = cache.get();
                let view = CacheStatusView {
                    path: cache.path().display().to_string(),
                    valid: cached.is_some(),
                    reboot_detected: cache.was_reboot_detected(),
                    age: cache.age_string(),
                    issues: cached.as_ref().map(|r| r.issues.len()),
                };
                if cli.json {
                    write_json(&view)?;
                } else if !ui_cfg.quiet {
                    println!("キャッシュ: {}", view.path);
                    let state = match (&cached, view.reboot_detected) {
                        (Some(r), _) => format!("有効（{}、{}件の問題）", view.age, r.issues.len()),
                        (None, true) => "無効（再起動を検出）".to_string(),
                        (None, false) => format!("無効（{}）", view.age),
                    };
                    println!("状態: {state}");
                }
            }
            CacheCommand::Clear => {
                engine.cache().clear()?;
                if !ui_cfg.quiet && !cli.json {
                    println!("キャッシュを削除しました");
                }
            }
        },
        Commands::Detectors => {
            let missing = engine.registry().missing(engine.root());
            if cli.json {
                let views: Vec<DetectorView<'_>> = engine
                    .registry()
                    .specs()
                    .iter()
                    .map(|spec| DetectorView {
                        spec,
                        present: !missing.iter().any(|m| m.script == spec.script),
                    })
                    .collect();
                write_json(&views)?;
            } else {
                crate::ui::print_detectors(&engine.detector_infos(), &missing, &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "bootdiag", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                write_json(&cfg)?;
            } else if !ui_cfg.quiet {
                eprintln!("config: `bootdiag config --show` を使用してください");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_scan(
    engine: &Engine,
    ctx: &RunContext,
    refresh: bool,
    show_progress: bool,
) -> (ScanResult, bool) {
    let mut infos = engine.detector_infos();
    let pb = show_progress.then(|| {
        let pb = ProgressBar::new(infos.len() as u64);
        pb.set_draw_target(ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message("診断スクリプトを実行中...");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    });

    let on_progress = |event: &crate::core::DetectorProgress| {
        let Some(info) = infos.get_mut(event.detector_id) else {
            return;
        };
        if !info.apply(event) {
            return;
        }
        if let Some(pb) = &pb {
            let line = crate::ui::format_progress_line(info);
            if info.status.is_terminal() {
                pb.inc(1);
                pb.println(&line);
            }
            pb.set_message(line);
        }
    };

    let outcome = if refresh {
        (engine.scan(ctx, on_progress), false)
    } else {
        engine.cached_or_scan(ctx, on_progress)
    };

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    outcome
}

fn require_cached_scan(engine: &Engine) -> Result<ScanResult> {
    engine.cached().ok_or_else(|| {
        crate::exit::invalid_args(
            "有効なスキャン結果がありません。先に `bootdiag scan` を実行してください",
        )
    })
}

/// Resolves 1-based issue numbers against the displayed order.
fn select_by_number(issues: &[Issue], numbers: &[usize]) -> Result<Vec<Issue>> {
    let mut selection = IssueSelection::new();
    for &n in numbers {
        let Some(issue) = n.checked_sub(1).and_then(|i| issues.get(i)) else {
            return Err(crate::exit::invalid_args(format!(
                "問題番号が範囲外です: {n}（1..={}）",
                issues.len()
            )));
        };
        if !selection.select(issue) {
            return Err(crate::exit::invalid_args(format!(
                "[{n}] {} は自動修正できません",
                issue.name
            )));
        }
    }
    Ok(selection.resolve(issues))
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Fixability, Severity};

    fn issue(name: &str, severity: Severity, fixable: Fixability) -> Issue {
        Issue {
            name: name.to_string(),
            description: String::new(),
            severity,
            fix_command: "true".to_string(),
            fixable,
            source: "probe".to_string(),
            requires_reboot: false,
        }
    }

    #[test]
    fn cli_parses_fix_selection_list() {
        let cli = Cli::try_parse_from(["bootdiag", "fix", "--select", "1,3", "--sudo"])
            .expect("parse");
        let Commands::Fix(args) = cli.command else {
            panic!("expected fix");
        };
        assert_eq!(args.select, vec![1, 3]);
        assert!(args.sudo);
        assert!(Cli::try_parse_from(["bootdiag", "fix", "--all", "--select", "1"]).is_err());
    }

    #[test]
    fn select_by_number_follows_display_order_and_rejects_manual() {
        let issues = vec![
            issue("a", Severity::Critical, Fixability::Auto),
            issue("b", Severity::Moderate, Fixability::Manual),
            issue("c", Severity::Low, Fixability::AutoSudo),
        ];
        let picked = select_by_number(&issues, &[3, 1, 3]).expect("select");
        let names: Vec<_> = picked.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);

        let err = select_by_number(&issues, &[2]).unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
        assert!(select_by_number(&issues, &[0]).is_err());
        assert!(select_by_number(&issues, &[4]).is_err());
    }

    #[test]
    fn parse_shell_rejects_unknown() {
        assert!(parse_shell("Bash").is_ok());
        let err = parse_shell("tcsh").unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
    }
}
