//! Interactive runner: submission and interactor as two concurrently
//! confined processes joined by a pipe loop.
//!
//! submission stdout ─▶ proxy A ─▶ interactor stdin
//! interactor stdout ─▶ proxy B ─▶ submission stdin
//!
//! The proxies tee traffic into transcript files for post-mortems. Both
//! confined legs and both proxies start before anything is joined;
//! starting them sequentially risks a full pipe buffer deadlocking both
//! sides. Every pipe end is opened close-on-exec, so no confined child
//! keeps a stray writable duplicate alive that would rob a reader of its
//! EOF.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use tempfile::TempDir;
use tracing::debug;

use crate::artifact::{Artifact, RunRequest};
use crate::case::Case;
use crate::error::{Error, Result};
use crate::sandbox::Stdio;
use crate::trusted::{translate, Checker, TrustedProgram};
use crate::util::read_bounded;

use super::{
    non_empty, running_failure, scratch_dir, write_report_line, CaseJudge, CaseLimits,
    CaseOutcome,
};

/// Runner for one interactive case.
pub struct InteractiveRunner<'a> {
    submission: &'a Artifact,
    interactor: &'a TrustedProgram,
    checker: &'a Checker,
    limits: CaseLimits,
    workspace: TempDir,
    trusted_workspace: TempDir,
    report: Option<File>,
}

impl<'a> InteractiveRunner<'a> {
    pub fn new(
        submission: &'a Artifact,
        interactor: &'a TrustedProgram,
        checker: &'a Checker,
        limits: CaseLimits,
    ) -> Result<Self> {
        Ok(Self {
            submission,
            interactor,
            checker,
            limits,
            workspace: scratch_dir()?,
            trusted_workspace: scratch_dir()?,
            report: None,
        })
    }

    pub fn with_report(mut self, path: &Path) -> Result<Self> {
        self.report = Some(File::create(path)?);
        Ok(self)
    }

    fn trusted_file(&self, tag: &str, suffix: &str) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;
        let path = self
            .trusted_workspace
            .path()
            .join(format!("{}.{}", tag, suffix));
        std::fs::write(&path, b"")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))?;
        Ok(path)
    }
}

#[async_trait]
impl CaseJudge for InteractiveRunner<'_> {
    async fn judge(&mut self, case: &Case) -> Result<CaseOutcome> {
        case.validate()?;
        let tag = case.fingerprint().as_str().to_string();

        // The interactor writes the submission's effective output here;
        // it is what the checker sees afterwards.
        let produced_output = self.trusted_file(&tag, "out")?;
        let result_file = self.trusted_file(&tag, "result")?;
        let stderr_path = self.workspace.path().join(format!("{}.err", &tag));
        let record_from_submission = self.trusted_workspace.path().join(format!("{}.up", &tag));
        let record_to_submission = self.trusted_workspace.path().join(format!("{}.down", &tag));

        // Close-on-exec everywhere: only the descriptor each child dup2s
        // onto its stdio survives its exec.
        let (sub_out_read, sub_out_write) = new_pipe()?;
        let (int_in_read, int_in_write) = new_pipe()?;
        let (int_out_read, int_out_write) = new_pipe()?;
        let (sub_in_read, sub_in_write) = new_pipe()?;

        let submission_leg = self.submission.run(RunRequest {
            stdin: Stdio::Fd(sub_in_read),
            stdout: Stdio::Fd(sub_out_write),
            stderr: Stdio::File(stderr_path.clone()),
            cpu_time_ms: self.limits.cpu_time_ms,
            memory_mb: self.limits.memory_mb,
            workdir: self.workspace.path().to_path_buf(),
            extra_args: vec![],
        });

        let interactor_leg = self.interactor.artifact().run(RunRequest {
            stdin: Stdio::Fd(int_in_read),
            stdout: Stdio::Fd(int_out_write),
            stderr: Stdio::Null,
            cpu_time_ms: self.limits.cpu_time_ms,
            memory_mb: self.limits.memory_mb,
            workdir: self.trusted_workspace.path().to_path_buf(),
            extra_args: vec![
                case.input_file().to_string_lossy().into_owned(),
                produced_output.to_string_lossy().into_owned(),
                case.answer_file().to_string_lossy().into_owned(),
                result_file.to_string_lossy().into_owned(),
            ],
        });

        let upstream = spawn_proxy(record_from_submission.clone(), sub_out_read, int_in_write);
        let downstream = spawn_proxy(record_to_submission.clone(), int_out_read, sub_in_write);

        // All four legs progress together; joining any one of them first
        // would let a full pipe buffer wedge the rest.
        let (submission_result, interactor_result, upstream_result, downstream_result) =
            tokio::join!(submission_leg, interactor_leg, upstream, downstream);

        let execution = submission_result?;
        let interactor_execution = interactor_result?;
        for proxy in [upstream_result, downstream_result] {
            proxy.map_err(|e| Error::Sandbox(format!("interaction proxy failed: {}", e)))??;
        }

        let message_limit = self.submission.config().message_limit;
        let outcome = if !execution.verdict.is_accepted() {
            // A crashed submission is never the interactor's fault; its
            // outcome is discarded.
            running_failure(&execution)
        } else {
            let message = read_bounded(&result_file, message_limit);
            let translation = translate(
                interactor_execution.verdict,
                interactor_execution.exit_code,
                &message,
            );
            if !translation.verdict.is_accepted() {
                CaseOutcome {
                    verdict: translation.verdict,
                    time_ms: execution.time_ms,
                    memory_kb: execution.memory_kb,
                    message: non_empty(message),
                    point: translation.point,
                }
            } else {
                // Interactor content: the recorded output goes through
                // the ordinary check.
                let check = self
                    .checker
                    .evaluate(
                        case.input_file(),
                        &produced_output,
                        case.answer_file(),
                        self.trusted_workspace.path(),
                        self.limits.cpu_time_ms,
                        self.limits.memory_mb,
                    )
                    .await?;
                CaseOutcome {
                    verdict: check.verdict,
                    time_ms: execution.time_ms,
                    memory_kb: execution.memory_kb,
                    message: non_empty(check.message),
                    point: check.point,
                }
            }
        };

        debug!(case = %tag, verdict = %outcome.verdict, "interactive case judged");

        if let Some(report) = &mut self.report {
            write_report_line(
                report,
                message_limit,
                case,
                &produced_output,
                &stderr_path,
                &execution,
                &outcome,
                &[record_to_submission, record_from_submission],
            )?;
        }
        Ok(outcome)
    }
}

fn new_pipe() -> Result<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::Sandbox(format!("pipe creation failed: {}", e)))
}

/// Copy `from` to `to`, teeing into `record`, until EOF or until the
/// reader goes away. Dropping the descriptors at the end is what hands
/// the EOF on to the next process in the loop.
fn spawn_proxy(
    record: PathBuf,
    from: OwnedFd,
    to: OwnedFd,
) -> tokio::task::JoinHandle<std::io::Result<()>> {
    tokio::task::spawn_blocking(move || {
        let mut source = File::from(from);
        let mut sink = File::from(to);
        let mut transcript = File::create(record)?;
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                // Reader side torn down mid-transfer; the verdict logic
                // decides whose fault that was.
                Err(_) => break,
            };
            transcript.write_all(&buffer[..n])?;
            if sink.write_all(&buffer[..n]).is_err() {
                break;
            }
        }
        Ok(())
    })
}
