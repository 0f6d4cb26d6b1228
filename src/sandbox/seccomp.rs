//! Syscall-filter profiles for confined executions.
//!
//! Denylist semantics: everything is allowed except the syscalls a profile
//! forbids, and `execve` is pinned to the one executable the sandbox is
//! about to map. Language-specific profiles relax the denylist for
//! runtimes that need threads or helper processes.

use seccomp_sys::{
    scmp_arg_cmp, scmp_compare, seccomp_init, seccomp_load, seccomp_rule_add, SCMP_ACT_ALLOW,
    SCMP_ACT_KILL,
};

/// Named filter profile, referenced from the language table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterProfile {
    /// Compiled languages: no sockets, no process spawning, no kill.
    General,
    /// CPython: no process spawning or kill; sockets stay open.
    Python,
    /// V8: clone allowed for worker threads; no sockets.
    JavaScript,
    /// Managed runtimes that clone helper processes: only fork/vfork denied.
    CSharp,
}

impl FilterProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "general" => Some(FilterProfile::General),
            "python" | "py" => Some(FilterProfile::Python),
            "javascript" | "js" => Some(FilterProfile::JavaScript),
            "csharp" => Some(FilterProfile::CSharp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterProfile::General => "general",
            FilterProfile::Python => "python",
            FilterProfile::JavaScript => "javascript",
            FilterProfile::CSharp => "csharp",
        }
    }

    /// Syscalls the profile forbids outright.
    pub fn denied_syscalls(self) -> &'static [libc::c_long] {
        match self {
            FilterProfile::General => &[
                libc::SYS_socket,
                libc::SYS_clone,
                libc::SYS_fork,
                libc::SYS_vfork,
                libc::SYS_kill,
                libc::SYS_execveat,
            ],
            FilterProfile::Python => &[
                libc::SYS_clone,
                libc::SYS_fork,
                libc::SYS_vfork,
                libc::SYS_kill,
                libc::SYS_execveat,
            ],
            FilterProfile::JavaScript => &[
                libc::SYS_socket,
                libc::SYS_fork,
                libc::SYS_vfork,
                libc::SYS_kill,
                libc::SYS_execveat,
            ],
            FilterProfile::CSharp => &[libc::SYS_fork, libc::SYS_vfork],
        }
    }

    /// Whether `execve` is pinned to the mapped executable.
    pub fn restricts_exec(self) -> bool {
        true
    }
}

/// Install the filter in the current (child) process.
///
/// Runs between identity drop and `execve`; only syscalls from here on.
/// `exe` must be the exact pointer later handed to `execve` — the kernel
/// compares the pointer value, not the string.
///
/// # Safety
/// Must only be called in a freshly forked child that is about to exec.
pub(crate) unsafe fn install(
    profile: FilterProfile,
    exe: *const libc::c_char,
) -> Result<(), &'static str> {
    let ctx = seccomp_init(SCMP_ACT_ALLOW);
    if ctx.is_null() {
        return Err("seccomp_init failed");
    }

    for &syscall in profile.denied_syscalls() {
        if seccomp_rule_add(ctx, SCMP_ACT_KILL, syscall as i32, 0) != 0 {
            return Err("seccomp_rule_add failed for denied syscall");
        }
    }

    if profile.restricts_exec() {
        let only_mapped_exe = scmp_arg_cmp {
            arg: 0,
            op: scmp_compare::SCMP_CMP_NE,
            datum_a: exe as u64,
            datum_b: 0,
        };
        if seccomp_rule_add(
            ctx,
            SCMP_ACT_KILL,
            libc::SYS_execve as i32,
            1,
            only_mapped_exe,
        ) != 0
        {
            return Err("seccomp_rule_add failed for execve restriction");
        }
    }

    if seccomp_load(ctx) != 0 {
        return Err("seccomp_load failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_round_trip() {
        for profile in [
            FilterProfile::General,
            FilterProfile::Python,
            FilterProfile::JavaScript,
            FilterProfile::CSharp,
        ] {
            assert_eq!(FilterProfile::from_name(profile.name()), Some(profile));
        }
        assert_eq!(FilterProfile::from_name("unfiltered"), None);
    }

    #[test]
    fn general_profile_denies_spawning_and_networking() {
        let denied = FilterProfile::General.denied_syscalls();
        assert!(denied.contains(&libc::SYS_socket));
        assert!(denied.contains(&libc::SYS_fork));
        assert!(denied.contains(&libc::SYS_clone));
        assert!(denied.contains(&libc::SYS_kill));
    }

    #[test]
    fn javascript_profile_permits_threads() {
        let denied = FilterProfile::JavaScript.denied_syscalls();
        assert!(!denied.contains(&libc::SYS_clone));
        assert!(denied.contains(&libc::SYS_socket));
    }

    #[test]
    fn every_profile_pins_execve() {
        assert!(FilterProfile::General.restricts_exec());
        assert!(FilterProfile::CSharp.restricts_exec());
    }
}
