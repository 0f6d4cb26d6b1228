//! Two-stage spawn builder for confined executions.
//!
//! `SandboxSpec` describes what a confined process should look like;
//! `SpawnPlan` is the frozen picture the forked child replays with raw
//! syscalls. The plan is fully materialized before `fork()` — CStrings,
//! opened descriptors, rlimit values — so the child allocates nothing, and
//! so unit tests can inspect a plan without ever spawning.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Identity;
use crate::error::{Error, Result};
use crate::sandbox::seccomp::FilterProfile;

/// Stream binding for one of the child's standard descriptors.
#[derive(Debug)]
pub enum Stdio {
    /// Keep the parent's descriptor.
    Inherit,
    /// Bind to /dev/null.
    Null,
    /// Bind to a file: opened read-only for stdin, created/truncated for
    /// stdout and stderr.
    File(PathBuf),
    /// Bind to an already-open descriptor (a pipe end). The parent's copy
    /// is closed right after fork so readers on the other end see EOF.
    Fd(OwnedFd),
}

/// Resource ceilings. `None` means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub cpu_time_ms: Option<u64>,
    pub real_time_ms: Option<u64>,
    pub memory_mb: Option<u64>,
    pub output_mb: Option<u64>,
    pub processes: Option<u32>,
    /// Apply the address-space rlimit when a memory ceiling is set.
    /// Managed runtimes turn this off and get the ceiling via their own
    /// flags; the post-hoc rusage check still applies.
    pub limit_address_space: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_ms: None,
            real_time_ms: None,
            memory_mb: None,
            output_mb: None,
            processes: None,
            limit_address_space: true,
        }
    }
}

/// Which rlimit a plan entry sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitResource {
    Cpu,
    AddressSpace,
    Stack,
    OutputSize,
    Processes,
}

/// One rlimit the child will install (soft == hard).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitSpec {
    pub resource: LimitResource,
    pub limit: u64,
}

/// Address-space and stack ceilings get headroom above the memory limit to
/// tolerate allocator and runtime overhead; the verdict still compares
/// measured RSS against the configured ceiling.
const MEMORY_SLACK_FACTOR: u64 = 2;

/// Specification of one confined execution.
#[derive(Debug)]
pub struct SandboxSpec {
    executable: PathBuf,
    args: Vec<String>,
    env: Vec<String>,
    workdir: Option<PathBuf>,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    limits: ResourceLimits,
    identity: Option<Identity>,
    filter: Option<FilterProfile>,
}

impl SandboxSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            workdir: None,
            stdin: Stdio::Null,
            stdout: Stdio::Null,
            stderr: Stdio::Null,
            limits: ResourceLimits::default(),
            identity: None,
            filter: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_stdin(mut self, stdin: Stdio) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_stdout(mut self, stdout: Stdio) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn with_stderr(mut self, stderr: Stdio) -> Self {
        self.stderr = stderr;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Drop to this identity in the child (group first, then user).
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_filter(mut self, filter: FilterProfile) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Freeze the spec into a spawn plan: derive rlimits, open files,
    /// convert strings. Everything fallible happens here, before fork.
    pub fn plan(self) -> Result<SpawnPlan> {
        let exe = cstring(self.executable.as_os_str().as_bytes(), "executable path")?;

        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(exe.clone());
        for arg in &self.args {
            argv.push(cstring(arg.as_bytes(), "argument")?);
        }

        let mut envp = Vec::with_capacity(self.env.len());
        for entry in &self.env {
            envp.push(cstring(entry.as_bytes(), "environment entry")?);
        }

        let workdir = match &self.workdir {
            Some(dir) => Some(cstring(dir.as_os_str().as_bytes(), "working directory")?),
            None => None,
        };

        let rlimits = derive_rlimits(&self.limits);

        let stdin = open_stdio(self.stdin, StreamDirection::Read)?;
        let stdout = open_stdio(self.stdout, StreamDirection::Write)?;
        let stderr = open_stdio(self.stderr, StreamDirection::Write)?;

        Ok(SpawnPlan {
            exe,
            argv,
            envp,
            workdir,
            rlimits,
            stdin,
            stdout,
            stderr,
            identity: self.identity,
            filter: self.filter,
            limits: self.limits,
        })
    }
}

/// The frozen, pre-fork picture of a confined child.
#[derive(Debug)]
pub struct SpawnPlan {
    pub(crate) exe: CString,
    pub(crate) argv: Vec<CString>,
    pub(crate) envp: Vec<CString>,
    pub(crate) workdir: Option<CString>,
    pub(crate) rlimits: Vec<RlimitSpec>,
    pub(crate) stdin: Option<OwnedFd>,
    pub(crate) stdout: Option<OwnedFd>,
    pub(crate) stderr: Option<OwnedFd>,
    pub(crate) identity: Option<Identity>,
    pub(crate) filter: Option<FilterProfile>,
    pub(crate) limits: ResourceLimits,
}

impl SpawnPlan {
    pub fn rlimits(&self) -> &[RlimitSpec] {
        &self.rlimits
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn filter(&self) -> Option<FilterProfile> {
        self.filter
    }
}

fn derive_rlimits(limits: &ResourceLimits) -> Vec<RlimitSpec> {
    let mut rlimits = Vec::new();
    if let Some(cpu_ms) = limits.cpu_time_ms {
        // One extra second of slack; the verdict compares measured CPU time
        // against the configured ceiling, not the rlimit.
        rlimits.push(RlimitSpec {
            resource: LimitResource::Cpu,
            limit: cpu_ms.div_ceil(1000) + 1,
        });
    }
    if let Some(memory_mb) = limits.memory_mb {
        let bytes = memory_mb * 1024 * 1024 * MEMORY_SLACK_FACTOR;
        if limits.limit_address_space {
            rlimits.push(RlimitSpec {
                resource: LimitResource::AddressSpace,
                limit: bytes,
            });
        }
        rlimits.push(RlimitSpec {
            resource: LimitResource::Stack,
            limit: bytes,
        });
    }
    if let Some(output_mb) = limits.output_mb {
        rlimits.push(RlimitSpec {
            resource: LimitResource::OutputSize,
            limit: output_mb * 1024 * 1024,
        });
    }
    if let Some(processes) = limits.processes {
        rlimits.push(RlimitSpec {
            resource: LimitResource::Processes,
            limit: processes as u64,
        });
    }
    rlimits
}

enum StreamDirection {
    Read,
    Write,
}

fn open_stdio(stdio: Stdio, direction: StreamDirection) -> Result<Option<OwnedFd>> {
    match stdio {
        Stdio::Inherit => Ok(None),
        Stdio::Null => {
            let file = match direction {
                StreamDirection::Read => File::open("/dev/null"),
                StreamDirection::Write => OpenOptions::new().write(true).open("/dev/null"),
            }
            .context("opening /dev/null")?;
            Ok(Some(file.into()))
        }
        Stdio::File(path) => {
            let file = match direction {
                StreamDirection::Read => File::open(&path)
                    .with_context(|| format!("opening {} for reading", path.display()))?,
                StreamDirection::Write => OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .with_context(|| format!("opening {} for writing", path.display()))?,
            };
            Ok(Some(file.into()))
        }
        Stdio::Fd(fd) => Ok(Some(fd)),
    }
}

fn cstring(bytes: &[u8], what: &str) -> Result<CString> {
    CString::new(bytes).map_err(|_| Error::Config(format!("{} contains a NUL byte", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_derives_cpu_and_memory_rlimits() {
        let spec = SandboxSpec::new("/bin/true").with_limits(ResourceLimits {
            cpu_time_ms: Some(1500),
            memory_mb: Some(64),
            output_mb: Some(16),
            processes: Some(1),
            ..ResourceLimits::default()
        });
        let plan = spec.plan().unwrap();

        assert!(plan.rlimits().contains(&RlimitSpec {
            resource: LimitResource::Cpu,
            limit: 3, // ceil(1.5s) + 1s slack
        }));
        assert!(plan.rlimits().contains(&RlimitSpec {
            resource: LimitResource::AddressSpace,
            limit: 64 * 1024 * 1024 * 2,
        }));
        assert!(plan.rlimits().contains(&RlimitSpec {
            resource: LimitResource::Stack,
            limit: 64 * 1024 * 1024 * 2,
        }));
        assert!(plan.rlimits().contains(&RlimitSpec {
            resource: LimitResource::OutputSize,
            limit: 16 * 1024 * 1024,
        }));
        assert!(plan.rlimits().contains(&RlimitSpec {
            resource: LimitResource::Processes,
            limit: 1,
        }));
    }

    #[test]
    fn unlimited_spec_installs_no_rlimits() {
        let plan = SandboxSpec::new("/bin/true").plan().unwrap();
        assert!(plan.rlimits().is_empty());
    }

    #[test]
    fn managed_runtimes_skip_the_address_space_limit() {
        let spec = SandboxSpec::new("/usr/bin/java").with_limits(ResourceLimits {
            memory_mb: Some(256),
            limit_address_space: false,
            ..ResourceLimits::default()
        });
        let plan = spec.plan().unwrap();
        assert!(!plan
            .rlimits()
            .iter()
            .any(|r| r.resource == LimitResource::AddressSpace));
        assert!(plan
            .rlimits()
            .iter()
            .any(|r| r.resource == LimitResource::Stack));
    }

    #[test]
    fn argv_zero_is_the_executable() {
        let plan = SandboxSpec::new("/w/main")
            .with_args(["in", "out"])
            .plan()
            .unwrap();
        let argv: Vec<_> = plan
            .argv()
            .iter()
            .map(|c| c.to_str().unwrap().to_string())
            .collect();
        assert_eq!(argv, vec!["/w/main", "in", "out"]);
    }

    #[test]
    fn identity_and_filter_survive_planning() {
        let spec = SandboxSpec::new("/bin/true")
            .with_identity(Identity { uid: 65534, gid: 65534 })
            .with_filter(FilterProfile::General);
        let plan = spec.plan().unwrap();
        assert_eq!(plan.identity().unwrap().uid, 65534);
        assert_eq!(plan.filter(), Some(FilterProfile::General));
    }

    #[test]
    fn nul_bytes_are_rejected() {
        let spec = SandboxSpec::new("/bin/true").with_args(["bad\0arg"]);
        assert!(spec.plan().is_err());
    }
}
