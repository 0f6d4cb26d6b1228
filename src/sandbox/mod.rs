//! Single-process confinement primitive.
//!
//! One confined execution = one fork. The child installs resource
//! ceilings, redirects its standard streams, drops group then user
//! identity, arms the syscall filter and replaces its image. The parent
//! waits with an independent wall-clock watchdog and derives a verdict
//! from the collected exit status and rusage.
//!
//! The sandbox does NOT:
//! - Interpret checker conventions (that's the trusted-program layer)
//! - Know about languages or compilation
//! - Compare outputs

pub mod seccomp;
pub mod spec;

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::{fork, ForkResult, Pid, Uid};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::verdict::Verdict;

pub use seccomp::FilterProfile;
pub use spec::{LimitResource, ResourceLimits, RlimitSpec, SandboxSpec, SpawnPlan, Stdio};

/// Exit code the child reserves for failures between fork and exec.
/// The parent maps it to SYSTEM_ERROR so setup breakage is never read as a
/// contestant crash.
pub const SETUP_FAILURE_EXIT_CODE: i32 = 203;

const FORK_ATTEMPTS: u32 = 3;
const FORK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Immutable outcome of one confined execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub verdict: Verdict,
    /// CPU time consumed (user + system), milliseconds.
    pub time_ms: u64,
    /// Peak resident set size, KB.
    pub memory_kb: u64,
    /// Exit code if the process exited, 0 otherwise.
    pub exit_code: i32,
    /// Terminating signal number, 0 if none.
    pub signal: i32,
}

impl ExecutionResult {
    /// Name of the terminating signal ("SIGSEGV"), if any.
    pub fn signal_name(&self) -> Option<&'static str> {
        if self.signal == 0 {
            return None;
        }
        Signal::try_from(self.signal).ok().map(|s| s.as_str())
    }
}

/// Execute a spec to completion, blocking the calling thread.
pub fn run_blocking(spec: SandboxSpec) -> Result<ExecutionResult> {
    if spec.identity().is_some() && !Uid::effective().is_root() {
        // Fatal: without CAP_SETUID the confinement contract cannot hold.
        return Err(Error::Privilege(
            "dropping to the confined identity requires running as root".into(),
        ));
    }

    let mut plan = spec.plan()?;

    // Raw pointer tables must exist before fork; the child allocates
    // nothing between fork and exec.
    let mut argv_ptrs: Vec<*const libc::c_char> =
        plan.argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let mut envp_ptrs: Vec<*const libc::c_char> =
        plan.envp.iter().map(|e| e.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    let child = spawn_child(&plan, &argv_ptrs, &envp_ptrs)?;

    // Close our copies of the child's descriptors immediately: a pipe
    // reader must see EOF once the child side is done, and a stray
    // writable duplicate here would keep it open forever.
    drop(plan.stdin.take());
    drop(plan.stdout.take());
    drop(plan.stderr.take());

    wait_for_child(child, &plan.limits)
}

/// Async wrapper; the fork/wait core stays blocking on a worker thread.
pub async fn run(spec: SandboxSpec) -> Result<ExecutionResult> {
    tokio::task::spawn_blocking(move || run_blocking(spec))
        .await
        .map_err(|e| Error::Sandbox(format!("sandbox task failed: {}", e)))?
}

fn spawn_child(
    plan: &SpawnPlan,
    argv_ptrs: &[*const libc::c_char],
    envp_ptrs: &[*const libc::c_char],
) -> Result<Pid> {
    let mut attempt = 0;
    loop {
        // SAFETY: the child branch only issues async-signal-safe calls
        // (raw syscalls and _exit) before execve.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let failure = unsafe { child_setup_and_exec(plan, argv_ptrs, envp_ptrs) };
                // Only reached when setup or exec failed.
                unsafe {
                    report_child_failure(failure);
                    libc::_exit(SETUP_FAILURE_EXIT_CODE);
                }
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), "spawned confined child");
                return Ok(child);
            }
            Err(errno) => {
                attempt += 1;
                if attempt >= FORK_ATTEMPTS {
                    return Err(Error::Sandbox(format!(
                        "fork failed after {} attempts: {}",
                        FORK_ATTEMPTS, errno
                    )));
                }
                warn!(attempt, %errno, "fork failed, retrying");
                thread::sleep(FORK_RETRY_DELAY);
            }
        }
    }
}

/// Everything the child does between fork and exec, in the mandatory
/// order. Returns only on failure, with a static description.
unsafe fn child_setup_and_exec(
    plan: &SpawnPlan,
    argv_ptrs: &[*const libc::c_char],
    envp_ptrs: &[*const libc::c_char],
) -> &'static str {
    // Fresh process group so the watchdog's kill reaches the whole subtree.
    if libc::setpgid(0, 0) != 0 {
        return "setpgid failed";
    }

    for rlimit in &plan.rlimits {
        let resource = match rlimit.resource {
            LimitResource::Cpu => libc::RLIMIT_CPU,
            LimitResource::AddressSpace => libc::RLIMIT_AS,
            LimitResource::Stack => libc::RLIMIT_STACK,
            LimitResource::OutputSize => libc::RLIMIT_FSIZE,
            LimitResource::Processes => libc::RLIMIT_NPROC,
        };
        let value = libc::rlimit {
            rlim_cur: rlimit.limit as libc::rlim_t,
            rlim_max: rlimit.limit as libc::rlim_t,
        };
        if libc::setrlimit(resource, &value) != 0 {
            return "setrlimit failed";
        }
    }

    if let Some(fd) = &plan.stdin {
        if libc::dup2(owned_raw(fd), libc::STDIN_FILENO) < 0 {
            return "stdin redirection failed";
        }
    }
    if let Some(fd) = &plan.stdout {
        if libc::dup2(owned_raw(fd), libc::STDOUT_FILENO) < 0 {
            return "stdout redirection failed";
        }
    }
    if let Some(fd) = &plan.stderr {
        if libc::dup2(owned_raw(fd), libc::STDERR_FILENO) < 0 {
            return "stderr redirection failed";
        }
    }

    if let Some(dir) = &plan.workdir {
        if libc::chdir(dir.as_ptr()) != 0 {
            return "chdir failed";
        }
    }

    // Group before user: after setuid we no longer may call setgid, and
    // the reverse order would leave elevated group membership in place.
    if let Some(identity) = plan.identity {
        if libc::setgid(identity.gid) != 0 {
            return "setgid failed";
        }
        if libc::setuid(identity.uid) != 0 {
            return "setuid failed";
        }
    }

    if let Some(profile) = plan.filter {
        if let Err(msg) = seccomp::install(profile, plan.exe.as_ptr()) {
            return msg;
        }
    }

    libc::execve(plan.exe.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
    "execve failed"
}

fn owned_raw(fd: &std::os::fd::OwnedFd) -> libc::c_int {
    use std::os::fd::AsRawFd;
    fd.as_raw_fd()
}

/// Best-effort note on stderr (already redirected if setup got that far).
unsafe fn report_child_failure(message: &str) {
    let prefix = b"sandbox child setup: ";
    libc::write(
        libc::STDERR_FILENO,
        prefix.as_ptr() as *const libc::c_void,
        prefix.len(),
    );
    libc::write(
        libc::STDERR_FILENO,
        message.as_ptr() as *const libc::c_void,
        message.len(),
    );
    libc::write(
        libc::STDERR_FILENO,
        b"\n".as_ptr() as *const libc::c_void,
        1,
    );
}

fn wait_for_child(child: Pid, limits: &ResourceLimits) -> Result<ExecutionResult> {
    let start = Instant::now();

    // Real-time watchdog: an independent backstop for children blocked on
    // I/O that CPU limiting cannot catch. Kills the whole process group.
    let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
    let watchdog = limits.real_time_ms.map(|real_ms| {
        let pgid = child;
        thread::spawn(move || {
            if cancel_rx.recv_timeout(Duration::from_millis(real_ms)).is_err() {
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        })
    });

    let mut status: libc::c_int = 0;
    // SAFETY: plain wait4 on a pid we own; rusage is a POD out-param.
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::wait4(child.as_raw(), &mut status, 0, &mut rusage) };
    let real_time_ms = start.elapsed().as_millis() as u64;

    let _ = cancel_tx.send(());
    if let Some(handle) = watchdog {
        let _ = handle.join();
    }

    if rc < 0 {
        return Err(Error::Sandbox(format!(
            "wait4 failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    // Sweep stragglers: anything the child spawned shares its group and
    // must not outlive the measurement.
    let _ = killpg(child, Signal::SIGKILL);

    let time_ms =
        timeval_ms(&rusage.ru_utime).saturating_add(timeval_ms(&rusage.ru_stime));
    let memory_kb = rusage.ru_maxrss as u64;

    let result = derive_result(status, time_ms, memory_kb, real_time_ms, limits);
    debug!(
        verdict = %result.verdict,
        time_ms = result.time_ms,
        memory_kb = result.memory_kb,
        exit_code = result.exit_code,
        signal = result.signal,
        "confined execution finished"
    );
    Ok(result)
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000
}

/// Derive the verdict from raw wait status and usage, in the fixed
/// precedence: setup failure, then memory, then CPU time, then wall time,
/// then plain crash. Limit-exceeded outcomes deliberately outrank a merely
/// non-zero exit; a fatal setup failure outranks everything.
pub(crate) fn derive_result(
    status: libc::c_int,
    time_ms: u64,
    memory_kb: u64,
    real_time_ms: u64,
    limits: &ResourceLimits,
) -> ExecutionResult {
    let exited = libc::WIFEXITED(status);
    let exit_code = if exited { libc::WEXITSTATUS(status) } else { 0 };
    let signaled = libc::WIFSIGNALED(status);
    let signal = if signaled { libc::WTERMSIG(status) } else { 0 };

    let verdict = if exited && exit_code == SETUP_FAILURE_EXIT_CODE {
        Verdict::SystemError
    } else if signaled && signal == libc::SIGUSR1 {
        // Reserved for in-sandbox sabotage of the machinery itself.
        Verdict::SystemError
    } else if limits.memory_mb.is_some_and(|mb| memory_kb > mb * 1024) {
        Verdict::MemoryLimitExceeded
    } else if limits.cpu_time_ms.is_some_and(|ms| time_ms > ms) {
        Verdict::TimeLimitExceeded
    } else if limits.real_time_ms.is_some_and(|ms| real_time_ms > ms) {
        Verdict::IdlenessLimitExceeded
    } else if exited && exit_code != 0 {
        Verdict::RuntimeError
    } else if signaled {
        Verdict::RuntimeError
    } else {
        Verdict::Accepted
    };

    ExecutionResult {
        verdict,
        time_ms,
        memory_kb,
        exit_code,
        signal,
    }
}
