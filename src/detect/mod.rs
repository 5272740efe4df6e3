use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::core::{DetectorProgress, DetectorStatus, Issue, ProbeError, ScanResult};
use crate::parser::parse_issues;
use crate::platform::{self, CommandRunOptions, RunOutcome};
use crate::registry::{DetectorSpec, Registry};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_STDERR_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub probe_timeout: Duration,
    pub shell: String,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            shell: "bash".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeRun {
    pub issues: Vec<Issue>,
    pub error: Option<ProbeError>,
    pub duration: Duration,
}

impl ProbeRun {
    pub fn status(&self) -> DetectorStatus {
        match &self.error {
            None => DetectorStatus::Complete,
            Some(err) if err.is_timeout() => DetectorStatus::TimedOut,
            Some(_) => DetectorStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectOutcome {
    pub issues: Vec<Issue>,
    pub errors: Vec<ProbeError>,
}

/// Runs every registered probe and collects the results.
pub fn run_detectors(
    ctx: &RunContext,
    registry: &Registry,
    root: &Path,
    opts: &DetectOptions,
) -> DetectOutcome {
    let (tx, rx) = mpsc::channel();
    drop(rx);
    run_detectors_with_progress(ctx, registry, root, opts, tx)
}

/// Runs every registered probe on its own thread. Each probe reports
/// `Running` and then exactly one terminal status on `progress`; the sender is
/// dropped once the last probe has finished, which closes the stream.
///
/// Issues are concatenated in registry order. Probe failures are collected,
/// never fatal.
pub fn run_detectors_with_progress(
    ctx: &RunContext,
    registry: &Registry,
    root: &Path,
    opts: &DetectOptions,
    progress: Sender<DetectorProgress>,
) -> DetectOutcome {
    let runs: Vec<ProbeRun> = thread::scope(|scope| {
        let handles: Vec<_> = registry
            .specs()
            .iter()
            .enumerate()
            .map(|(id, spec)| {
                let tx = progress.clone();
                scope.spawn(move || {
                    let _ = tx.send(DetectorProgress {
                        detector_id: id,
                        status: DetectorStatus::Running,
                        issue_count: 0,
                        error: None,
                        duration: Duration::ZERO,
                    });

                    let run = run_single_detector(ctx, root, spec, opts);

                    let _ = tx.send(DetectorProgress {
                        detector_id: id,
                        status: run.status(),
                        issue_count: run.issues.len(),
                        error: run.error.clone(),
                        duration: run.duration,
                    });
                    run
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(registry.specs())
            .enumerate()
            .map(|(id, (handle, spec))| {
                handle.join().unwrap_or_else(|_| {
                    let run = ProbeRun {
                        issues: vec![],
                        error: Some(ProbeError::Launch {
                            detector: spec.display_name.clone(),
                            message: "検出スレッドが異常終了しました".to_string(),
                        }),
                        duration: Duration::ZERO,
                    };
                    let _ = progress.send(DetectorProgress {
                        detector_id: id,
                        status: run.status(),
                        issue_count: 0,
                        error: run.error.clone(),
                        duration: run.duration,
                    });
                    run
                })
            })
            .collect()
    });
    drop(progress);

    let mut outcome = DetectOutcome::default();
    for run in runs {
        match run.error {
            Some(err) => outcome.errors.push(err),
            None => outcome.issues.extend(run.issues),
        }
    }
    outcome
}

pub fn run_full_scan(
    ctx: &RunContext,
    registry: &Registry,
    root: &Path,
    opts: &DetectOptions,
) -> ScanResult {
    let (tx, rx) = mpsc::channel();
    drop(rx);
    run_full_scan_with_progress(ctx, registry, root, opts, tx)
}

pub fn run_full_scan_with_progress(
    ctx: &RunContext,
    registry: &Registry,
    root: &Path,
    opts: &DetectOptions,
    progress: Sender<DetectorProgress>,
) -> ScanResult {
    let started_at = OffsetDateTime::now_utc();
    let start = Instant::now();

    let outcome = run_detectors_with_progress(ctx, registry, root, opts, progress);

    let scan_time = started_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());
    let scripts_failed = outcome.errors.len();
    ScanResult {
        issues: outcome.issues,
        errors: outcome.errors,
        scan_time,
        duration_ms: start.elapsed().as_millis() as u64,
        scripts_ran: registry.len(),
        scripts_failed,
    }
}

pub fn run_single_detector(
    ctx: &RunContext,
    root: &Path,
    spec: &DetectorSpec,
    opts: &DetectOptions,
) -> ProbeRun {
    let start = Instant::now();
    let result = probe(ctx, root, spec, opts);
    let duration = start.elapsed();

    match result {
        Ok(issues) => {
            debug!(
                detector = %spec.display_name,
                issues = issues.len(),
                elapsed_ms = duration.as_millis() as u64,
                "probe complete"
            );
            ProbeRun {
                issues,
                error: None,
                duration,
            }
        }
        Err(err) => {
            warn!(detector = %spec.display_name, "probe failed: {err}");
            ProbeRun {
                issues: vec![],
                error: Some(err),
                duration,
            }
        }
    }
}

fn probe(
    ctx: &RunContext,
    root: &Path,
    spec: &DetectorSpec,
    opts: &DetectOptions,
) -> Result<Vec<Issue>, ProbeError> {
    let detector = spec.display_name.clone();
    if ctx.is_cancelled() {
        return Err(ProbeError::Cancelled { detector });
    }

    let path = spec.path(root);
    if !path.is_file() {
        return Err(ProbeError::Missing {
            detector,
            path: path.display().to_string(),
        });
    }

    let deadline = ctx.child_deadline(opts.probe_timeout);
    let budget = deadline.saturating_duration_since(Instant::now());
    let options = CommandRunOptions {
        cwd: Some(root.to_path_buf()),
        ..CommandRunOptions::default()
    };
    let path_s = path.display().to_string();

    let outcome = platform::run_until(&opts.shell, &[path_s.as_str()], &options, deadline, &ctx.cancel)
        .map_err(|err| ProbeError::Launch {
            detector: detector.clone(),
            message: format!("{err:#}"),
        })?;

    match outcome {
        RunOutcome::TimedOut => Err(ProbeError::Timeout {
            detector,
            timeout_ms: budget.as_millis() as u64,
        }),
        RunOutcome::Cancelled => Err(ProbeError::Cancelled { detector }),
        RunOutcome::Exited(output) => {
            if output.exit_code != 0 && output.stdout.trim().is_empty() {
                return Err(ProbeError::Exit {
                    detector,
                    code: output.exit_code,
                    stderr: output.stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
                });
            }
            Ok(parse_issues(&output.stdout, &spec.script))
        }
    }
}
