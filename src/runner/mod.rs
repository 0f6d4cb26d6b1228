//! Per-case runners: execute a submission against one test case and
//! reduce the raw outcomes to a structured case result.
//!
//! The runners do NOT:
//! - Aggregate across cases or know about groups (the session's job)
//! - Interpret checker exit codes themselves (the trusted layer's job)
//! - Suppress SYSTEM_ERROR: sandbox breakage always reaches the session.

pub mod interactive;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use tempfile::TempDir;
use tracing::debug;

use crate::artifact::{Artifact, RunRequest};
use crate::case::Case;
use crate::error::Result;
use crate::sandbox::{ExecutionResult, Stdio};
use crate::trusted::Checker;
use crate::util::read_bounded;
use crate::verdict::Verdict;

pub use interactive::InteractiveRunner;

/// Submission limits applied to every case.
#[derive(Debug, Clone, Copy)]
pub struct CaseLimits {
    pub cpu_time_ms: u64,
    pub memory_mb: u64,
}

/// Structured result of judging one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub verdict: Verdict,
    pub time_ms: u64,
    pub memory_kb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
}

impl CaseOutcome {
    /// Sentinel for cases that were never executed.
    pub fn skipped() -> Self {
        Self {
            verdict: Verdict::Skipped,
            time_ms: 0,
            memory_kb: 0,
            message: None,
            point: None,
        }
    }
}

/// Anything that can judge one case. The seam lets the session state
/// machine be exercised with a scripted stand-in.
#[async_trait]
pub trait CaseJudge: Send {
    async fn judge(&mut self, case: &Case) -> Result<CaseOutcome>;
}

/// Non-interactive runner: execute, then check.
pub struct CaseRunner<'a> {
    submission: &'a Artifact,
    checker: &'a Checker,
    limits: CaseLimits,
    /// Scratch the confined submission may scribble in.
    workspace: TempDir,
    /// Scratch for outputs and trusted-program files.
    trusted_workspace: TempDir,
    report: Option<File>,
}

impl<'a> CaseRunner<'a> {
    pub fn new(
        submission: &'a Artifact,
        checker: &'a Checker,
        limits: CaseLimits,
    ) -> Result<Self> {
        Ok(Self {
            submission,
            checker,
            limits,
            workspace: scratch_dir()?,
            trusted_workspace: scratch_dir()?,
            report: None,
        })
    }

    /// Append a post-mortem line per case to this report file.
    pub fn with_report(mut self, path: &Path) -> Result<Self> {
        self.report = Some(File::create(path)?);
        Ok(self)
    }
}

#[async_trait]
impl CaseJudge for CaseRunner<'_> {
    async fn judge(&mut self, case: &Case) -> Result<CaseOutcome> {
        case.validate()?;
        let tag = case.fingerprint().as_str();
        let output_path = self.trusted_workspace.path().join(format!("{}.out", tag));
        let stderr_path = self.trusted_workspace.path().join(format!("{}.err", tag));

        let execution = self
            .submission
            .run(RunRequest {
                stdin: Stdio::File(case.input_file().to_path_buf()),
                stdout: Stdio::File(output_path.clone()),
                stderr: Stdio::File(stderr_path.clone()),
                cpu_time_ms: self.limits.cpu_time_ms,
                memory_mb: self.limits.memory_mb,
                workdir: self.workspace.path().to_path_buf(),
                extra_args: vec![],
            })
            .await?;

        let outcome = if !execution.verdict.is_accepted() {
            // The submission's own failure is final; the checker never
            // gets a say.
            running_failure(&execution)
        } else {
            let check = self
                .checker
                .evaluate(
                    case.input_file(),
                    &output_path,
                    case.answer_file(),
                    self.trusted_workspace.path(),
                    self.limits.cpu_time_ms,
                    self.limits.memory_mb,
                )
                .await?;
            // Timing and memory always come from the submission's run;
            // checker cost is never charged to the contestant.
            CaseOutcome {
                verdict: check.verdict,
                time_ms: execution.time_ms,
                memory_kb: execution.memory_kb,
                message: non_empty(check.message),
                point: check.point,
            }
        };

        debug!(case = tag, verdict = %outcome.verdict, "case judged");

        if let Some(report) = &mut self.report {
            let limit = self.submission.config().message_limit;
            write_report_line(
                report,
                limit,
                case,
                &output_path,
                &stderr_path,
                &execution,
                &outcome,
                &[],
            )?;
        }
        Ok(outcome)
    }
}

/// Outcome when the submission itself did not come back accepted; for a
/// runtime error the OS signal name becomes the message.
pub(crate) fn running_failure(execution: &ExecutionResult) -> CaseOutcome {
    let message = if execution.verdict == Verdict::RuntimeError {
        execution.signal_name().map(str::to_string)
    } else {
        None
    };
    CaseOutcome {
        verdict: execution.verdict,
        time_ms: execution.time_ms,
        memory_kb: execution.memory_kb,
        message,
        point: None,
    }
}

pub(crate) fn non_empty(message: String) -> Option<String> {
    if message.trim().is_empty() {
        None
    } else {
        Some(message)
    }
}

/// A world-writable scratch dir: the confined identity still needs to
/// create files in it after the privilege drop.
pub(crate) fn scratch_dir() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    let mut perms = fs::metadata(dir.path())?.permissions();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o777);
    fs::set_permissions(dir.path(), perms)?;
    Ok(dir)
}

/// One pipe-separated post-mortem line: timing, verdict, then bounded
/// base64 segments of input/output/stderr/answer/checker message and any
/// interaction transcripts.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_report_line(
    report: &mut File,
    limit: usize,
    case: &Case,
    output_path: &Path,
    stderr_path: &Path,
    execution: &ExecutionResult,
    outcome: &CaseOutcome,
    transcripts: &[PathBuf],
) -> std::io::Result<()> {
    let encode_file = |path: &Path| BASE64.encode(read_bounded(path, limit));
    let mut line = format!(
        "time: {}ms, memory: {}kb, exit code: {}, verdict: {}|{}|{}|{}|{}|{}",
        execution.time_ms,
        execution.memory_kb,
        execution.exit_code,
        outcome.verdict,
        encode_file(case.input_file()),
        encode_file(output_path),
        encode_file(stderr_path),
        encode_file(case.answer_file()),
        BASE64.encode(outcome.message.as_deref().unwrap_or("")),
    );
    for transcript in transcripts {
        line.push('|');
        line.push_str(&encode_file(transcript));
    }
    line.push('\n');
    report.write_all(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(verdict: Verdict, signal: i32) -> ExecutionResult {
        ExecutionResult {
            verdict,
            time_ms: 42,
            memory_kb: 1024,
            exit_code: 0,
            signal,
        }
    }

    #[test]
    fn runtime_error_carries_the_signal_name() {
        let outcome = running_failure(&execution(Verdict::RuntimeError, libc::SIGSEGV));
        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.message.as_deref(), Some("SIGSEGV"));
        assert_eq!(outcome.time_ms, 42);
    }

    #[test]
    fn limit_verdicts_carry_no_message() {
        let outcome = running_failure(&execution(Verdict::TimeLimitExceeded, libc::SIGKILL));
        assert_eq!(outcome.verdict, Verdict::TimeLimitExceeded);
        assert_eq!(outcome.message, None);
    }

    #[test]
    fn skipped_outcome_is_a_sentinel() {
        let outcome = CaseOutcome::skipped();
        assert_eq!(outcome.verdict, Verdict::Skipped);
        assert_eq!(outcome.time_ms, 0);
    }

    #[test]
    fn scratch_dirs_are_world_accessible() {
        use std::os::unix::fs::PermissionsExt;
        let dir = scratch_dir().unwrap();
        let mode = fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }
}
