//! Trusted judge programs and their verdict translation.
//!
//! Checkers, interactors, generators and validators are author-supplied,
//! so they run unfiltered and privileged — but their raw process outcome
//! still goes through one fixed translation before it may become a
//! verdict. The exit-code convention below is a contract with every
//! problem author and must never change silently:
//!
//! ```text
//! 0 -> ACCEPTED            3 -> JUDGE_ERROR (the judge program is broken)
//! 1 -> WRONG_ANSWER        7 -> POINT (message leads with a 0-100 score)
//! 2 -> WRONG_ANSWER (presentation)        anything else -> WRONG_ANSWER
//! ```

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::artifact::{Artifact, RunRequest};
use crate::compare;
use crate::error::{Error, Result};
use crate::sandbox::Stdio;
use crate::util::read_bounded;
use crate::verdict::Verdict;

/// Closed set of trusted-program roles. No open extensibility: every
/// role the engine understands is listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Checker,
    Interactor,
    Generator,
    Validator,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Checker => "checker",
            Role::Interactor => "interactor",
            Role::Generator => "generator",
            Role::Validator => "validator",
        }
    }
}

/// Author-facing exit codes (testlib-compatible).
mod exit_codes {
    pub const FAIL: i32 = 3;
    pub const POINTS: i32 = 7;
}

/// Result of translating a trusted program's raw outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub verdict: Verdict,
    pub point: Option<f64>,
}

/// Apply the shared translation rule: a raw verdict that is non-accepted
/// for a reason other than a plain non-zero exit (killed for time or
/// memory, sandbox breakage) passes through unchanged; otherwise the exit
/// code is mapped by the author convention.
pub fn translate(raw_verdict: Verdict, exit_code: i32, message: &str) -> Translation {
    if raw_verdict.is_accepted() {
        return Translation {
            verdict: Verdict::Accepted,
            point: None,
        };
    }
    if raw_verdict != Verdict::RuntimeError {
        return Translation {
            verdict: raw_verdict,
            point: None,
        };
    }
    match exit_code {
        exit_codes::FAIL => Translation {
            verdict: Verdict::JudgeError,
            point: None,
        },
        exit_codes::POINTS => {
            let point = message
                .split_whitespace()
                .next()
                .and_then(|token| token.parse::<f64>().ok())
                .unwrap_or(0.0)
                .clamp(0.0, 100.0);
            Translation {
                verdict: Verdict::Point,
                point: Some(point),
            }
        }
        // 1, 2 (presentation) and anything unrecognized.
        _ => Translation {
            verdict: Verdict::WrongAnswer,
            point: None,
        },
    }
}

/// Outcome of a checker invocation.
#[derive(Debug)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub message: String,
    pub point: Option<f64>,
}

/// Outcome of a validator invocation.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub message: String,
}

/// An author-supplied program with one fixed role.
#[derive(Debug)]
pub struct TrustedProgram {
    role: Role,
    artifact: Artifact,
}

impl TrustedProgram {
    pub fn new(role: Role, artifact: Artifact) -> Self {
        Self {
            role,
            artifact: artifact.into_trusted(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Compile the trusted program. A build failure here is an operator
    /// problem, not a contestant one, so it surfaces as a judge error.
    pub async fn compile(&mut self, max_time_ms: u64) -> Result<()> {
        match self.artifact.compile(max_time_ms).await {
            Ok(()) => Ok(()),
            Err(Error::Compile { diagnostic }) => Err(Error::Judge(format!(
                "{} failed to compile: {}",
                self.role.name(),
                diagnostic
            ))),
            Err(other) => Err(other),
        }
    }

    /// Checker convention: `check <input> <output> <answer> <result>`.
    /// The result-file content (bounded) becomes the verdict message.
    pub async fn check(
        &self,
        input: &Path,
        output: &Path,
        answer: &Path,
        workdir: &Path,
        cpu_time_ms: u64,
        memory_mb: u64,
    ) -> Result<CheckOutcome> {
        if self.role != Role::Checker {
            return Err(Error::Config(format!(
                "{} cannot act as a checker",
                self.role.name()
            )));
        }

        let result_file = sibling(workdir, output, "result")?;
        let stderr_file = sibling(workdir, output, "checker.err")?;

        let raw = self
            .artifact
            .run(RunRequest {
                stdin: Stdio::Null,
                stdout: Stdio::Null,
                stderr: Stdio::File(stderr_file.clone()),
                cpu_time_ms,
                memory_mb,
                workdir: workdir.to_path_buf(),
                extra_args: vec![
                    path_arg(input)?,
                    path_arg(output)?,
                    path_arg(answer)?,
                    path_arg(&result_file)?,
                ],
            })
            .await?;

        let limit = self.artifact.config().message_limit;
        let mut message = read_bounded(&result_file, limit);
        if message.trim().is_empty() {
            message = read_bounded(&stderr_file, limit);
        }
        let _ = fs::remove_file(&result_file);
        let _ = fs::remove_file(&stderr_file);

        let translation = translate(raw.verdict, raw.exit_code, &message);
        debug!(
            verdict = %translation.verdict,
            exit_code = raw.exit_code,
            "checker finished"
        );
        Ok(CheckOutcome {
            verdict: translation.verdict,
            message: message.trim().to_string(),
            point: translation.point,
        })
    }

    /// Generator convention: arbitrary arguments, test data on stdout.
    pub async fn generate(
        &self,
        args: &[String],
        output: &Path,
        workdir: &Path,
        cpu_time_ms: u64,
        memory_mb: u64,
    ) -> Result<()> {
        if self.role != Role::Generator {
            return Err(Error::Config(format!(
                "{} cannot act as a generator",
                self.role.name()
            )));
        }

        let raw = self
            .artifact
            .run(RunRequest {
                stdin: Stdio::Null,
                stdout: Stdio::File(output.to_path_buf()),
                stderr: Stdio::Null,
                cpu_time_ms,
                memory_mb,
                workdir: workdir.to_path_buf(),
                extra_args: args.to_vec(),
            })
            .await?;

        if raw.verdict.is_accepted() {
            Ok(())
        } else {
            Err(Error::Judge(format!(
                "generator failed: {} (exit code {})",
                raw.verdict, raw.exit_code
            )))
        }
    }

    /// Validator convention: the case input arrives on stdin, exit 0
    /// means valid, the message (if any) is on stdout.
    pub async fn validate(
        &self,
        input: &Path,
        workdir: &Path,
        cpu_time_ms: u64,
        memory_mb: u64,
    ) -> Result<ValidationOutcome> {
        if self.role != Role::Validator {
            return Err(Error::Config(format!(
                "{} cannot act as a validator",
                self.role.name()
            )));
        }

        let message_file = sibling(workdir, input, "validator.out")?;

        let raw = self
            .artifact
            .run(RunRequest {
                stdin: Stdio::File(input.to_path_buf()),
                stdout: Stdio::File(message_file.clone()),
                stderr: Stdio::Null,
                cpu_time_ms,
                memory_mb,
                workdir: workdir.to_path_buf(),
                extra_args: vec![],
            })
            .await?;

        if raw.verdict == Verdict::SystemError {
            return Err(Error::Sandbox("validator could not be executed".into()));
        }

        let message = read_bounded(&message_file, self.artifact.config().message_limit)
            .trim()
            .to_string();
        let _ = fs::remove_file(&message_file);

        let valid = raw.verdict.is_accepted() && raw.exit_code == 0;
        if !valid {
            warn!(exit_code = raw.exit_code, "validator rejected input");
        }
        Ok(ValidationOutcome { valid, message })
    }
}

/// The checker seam: either the built-in token comparison or an external
/// trusted program. A closed two-variant type, not an open interface.
#[derive(Debug)]
pub enum Checker {
    /// Whitespace-tolerant token comparison of output vs answer.
    Tokens,
    /// External checker following the exit-code convention.
    Program(TrustedProgram),
}

impl Checker {
    pub async fn evaluate(
        &self,
        input: &Path,
        output: &Path,
        answer: &Path,
        workdir: &Path,
        cpu_time_ms: u64,
        memory_mb: u64,
    ) -> Result<CheckOutcome> {
        match self {
            Checker::Tokens => {
                let verdict = if compare::files_match(output, answer)? {
                    Verdict::Accepted
                } else {
                    Verdict::WrongAnswer
                };
                Ok(CheckOutcome {
                    verdict,
                    message: String::new(),
                    point: None,
                })
            }
            Checker::Program(program) => {
                program
                    .check(input, output, answer, workdir, cpu_time_ms, memory_mb)
                    .await
            }
        }
    }
}

/// A scratch file next to the trusted run, named after the file it
/// belongs to, writable by the (possibly non-root) trusted identity.
fn sibling(workdir: &Path, base: &Path, suffix: &str) -> Result<PathBuf> {
    let stem = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "case".into());
    let path = workdir.join(format!("{}.{}", stem, suffix));
    fs::write(&path, b"")?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o666))?;
    Ok(path)
}

fn path_arg(path: &Path) -> Result<String> {
    Ok(path.to_string_lossy().into_owned())
}
