use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::context::RunContext;
use crate::core::{BatchFixResult, FixError, FixResult, Fixability, Issue};
use crate::platform::{self, CommandOutput, CommandRunOptions, RunOutcome};

pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(300);
pub const MAX_CMD_OUTPUT_BYTES: usize = 64 * 1024;

/// Provides the pre-authorised channel sudo-tier fixes run through. The fixer
/// never prompts; it only asks the provider to wrap a command line.
pub trait Elevation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Program and arguments that run `program args..` with elevated
    /// privileges, or `None` when elevation has not been established.
    fn elevate(&self, program: &str, args: &[String]) -> Option<(String, Vec<String>)>;
}

/// `sudo -n`: succeeds only while a cached credential is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct SudoNonInteractive;

impl Elevation for SudoNonInteractive {
    fn name(&self) -> &'static str {
        "sudo"
    }

    fn elevate(&self, program: &str, args: &[String]) -> Option<(String, Vec<String>)> {
        let mut wrapped = vec!["-n".to_string(), "--".to_string(), program.to_string()];
        wrapped.extend(args.iter().cloned());
        Some(("sudo".to_string(), wrapped))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadyRoot;

impl Elevation for AlreadyRoot {
    fn name(&self) -> &'static str {
        "root"
    }

    fn elevate(&self, program: &str, args: &[String]) -> Option<(String, Vec<String>)> {
        Some((program.to_string(), args.to_vec()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl Elevation for Unavailable {
    fn name(&self) -> &'static str {
        "none"
    }

    fn elevate(&self, _program: &str, _args: &[String]) -> Option<(String, Vec<String>)> {
        None
    }
}

/// Root needs no wrapper; otherwise sudo is only used when the caller says a
/// credential has been cached.
pub fn elevation_for_current_user(sudo_cached: bool) -> Box<dyn Elevation> {
    if platform::is_root() {
        Box::new(AlreadyRoot)
    } else if sudo_cached {
        Box::new(SudoNonInteractive)
    } else {
        Box::new(Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct FixerOptions {
    pub shell: String,
    pub timeout: Duration,
    pub dry_run: bool,
    pub cwd: Option<PathBuf>,
}

impl Default for FixerOptions {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            timeout: DEFAULT_FIX_TIMEOUT,
            dry_run: false,
            cwd: None,
        }
    }
}

pub struct Fixer {
    opts: FixerOptions,
    elevation: Box<dyn Elevation>,
}

impl Fixer {
    pub fn new(opts: FixerOptions, elevation: Box<dyn Elevation>) -> Self {
        Self { opts, elevation }
    }

    pub fn options(&self) -> &FixerOptions {
        &self.opts
    }

    pub fn elevation_name(&self) -> &'static str {
        self.elevation.name()
    }

    /// Runs the fix command of every issue. User-level fixes run first, then
    /// the sudo tier; each command is isolated, so one failure never stops the
    /// rest of the batch.
    pub fn execute_batch(&self, ctx: &RunContext, issues: &[Issue]) -> BatchFixResult {
        let mut batch = BatchFixResult {
            dry_run: self.opts.dry_run,
            ..BatchFixResult::default()
        };

        let (sudo, user): (Vec<&Issue>, Vec<&Issue>) = issues.iter().partition(|i| {
            i.fixable == Fixability::AutoSudo && !i.fix_command.trim().is_empty()
        });

        for issue in user {
            batch.record_user(self.execute_one(ctx, issue, false));
        }
        for issue in sudo {
            batch.record_sudo(self.execute_one(ctx, issue, true));
        }

        info!(
            fixed = batch.total_fixed,
            failed = batch.total_failed,
            needs_reboot = batch.needs_reboot,
            "fix batch finished"
        );
        batch
    }

    fn execute_one(&self, ctx: &RunContext, issue: &Issue, elevated: bool) -> FixResult {
        match self.try_execute(ctx, issue, elevated) {
            Ok(output) => FixResult {
                issue: issue.clone(),
                success: true,
                output,
                error: None,
            },
            Err((error, output)) => {
                warn!(issue = %issue.name, "fix failed: {error}");
                FixResult {
                    issue: issue.clone(),
                    success: false,
                    output,
                    error: Some(error),
                }
            }
        }
    }

    fn try_execute(
        &self,
        ctx: &RunContext,
        issue: &Issue,
        elevated: bool,
    ) -> Result<String, (FixError, String)> {
        if issue.fixable == Fixability::Manual {
            return Err((
                FixError::NotFixable {
                    name: issue.name.clone(),
                },
                String::new(),
            ));
        }
        let command = issue.fix_command.trim();
        if command.is_empty() {
            return Err((
                FixError::EmptyCommand {
                    name: issue.name.clone(),
                },
                String::new(),
            ));
        }
        if ctx.is_cancelled() {
            return Err((FixError::Cancelled, String::new()));
        }

        let shell_args = vec!["-c".to_string(), command.to_string()];
        let (program, args, options) = if elevated {
            let Some((program, args)) = self.elevation.elevate(&self.opts.shell, &shell_args)
            else {
                return Err((
                    FixError::ElevationUnavailable {
                        name: issue.name.clone(),
                    },
                    String::new(),
                ));
            };
            let options = CommandRunOptions {
                cwd: self.opts.cwd.clone(),
                ..CommandRunOptions::default()
            };
            (program, args, options)
        } else {
            (
                self.opts.shell.clone(),
                shell_args,
                platform::invoking_user_options(self.opts.cwd.clone()),
            )
        };

        if self.opts.dry_run {
            return Ok(format!("[dry-run] {}", format_cmdline(&program, &args)));
        }

        let deadline = ctx.child_deadline(self.opts.timeout);
        let budget = deadline.saturating_duration_since(Instant::now());
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let outcome = platform::run_until(&program, &args_ref, &options, deadline, &ctx.cancel)
            .map_err(|err| {
                (
                    FixError::Launch {
                        message: format!("{err:#}"),
                    },
                    String::new(),
                )
            })?;

        match outcome {
            RunOutcome::TimedOut => Err((
                FixError::Timeout {
                    timeout_ms: budget.as_millis() as u64,
                },
                String::new(),
            )),
            RunOutcome::Cancelled => Err((FixError::Cancelled, String::new())),
            RunOutcome::Exited(output) => evaluate_output(&output),
        }
    }
}

fn evaluate_output(output: &CommandOutput) -> Result<String, (FixError, String)> {
    let combined = truncate_output(&output.combined());
    if output.exit_code == 0 {
        Ok(combined)
    } else {
        Err((
            FixError::Exit {
                code: output.exit_code,
            },
            combined,
        ))
    }
}

pub fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_CMD_OUTPUT_BYTES {
        return s.to_string();
    }
    let mut end = MAX_CMD_OUTPUT_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n…(truncated)", &s[..end])
}

fn format_cmdline(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        if arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
            out.push('\'');
            out.push_str(&arg.replace('\'', "'\\''"));
            out.push('\'');
        } else {
            out.push_str(arg);
        }
    }
    out
}
