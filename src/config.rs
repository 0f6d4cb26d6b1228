//! Process-wide judge configuration.
//!
//! Loaded once at startup (environment overrides with fixed defaults) and
//! injected by reference into every constructor. Never mutated afterwards.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Identity a confined process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

/// Immutable judge-wide configuration.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Root of the fingerprint-addressed test-case storage.
    pub data_root: PathBuf,
    /// Root of the fingerprint-addressed artifact workspaces.
    pub artifact_root: PathBuf,
    /// Identity untrusted submissions run as (default: nobody/nogroup).
    pub run_identity: Identity,
    /// Identity compilers and trusted programs run as.
    pub compiler_identity: Identity,
    /// CPU budget for compiling a trusted program, in milliseconds.
    pub compile_time_limit_ms: u64,
    /// Memory budget for compilation, in MB.
    pub compile_memory_limit_mb: u64,
    /// Compile CPU budget = max_time * this factor.
    pub compile_time_factor: u64,
    /// Real-time budget = CPU budget * this factor.
    pub real_time_factor: u64,
    /// Byte budget when reading back a compiler diagnostic.
    pub diagnostic_limit: usize,
    /// Byte budget when reading back a checker/validator message.
    pub message_limit: usize,
    /// Output-size ceiling for confined executions, in MB.
    pub output_limit_mb: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/gavel/data"),
            artifact_root: PathBuf::from("/var/lib/gavel/sub"),
            run_identity: Identity {
                uid: 65534,
                gid: 65534,
            },
            compiler_identity: Identity { uid: 0, gid: 0 },
            compile_time_limit_ms: 30_000,
            compile_memory_limit_mb: 2048,
            compile_time_factor: 10,
            real_time_factor: 2,
            diagnostic_limit: 16 * 1024,
            message_limit: 512,
            output_limit_mb: 256,
        }
    }
}

impl JudgeConfig {
    /// Load configuration with environment overrides.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            data_root: env_path("GAVEL_DATA_ROOT", defaults.data_root.clone()),
            artifact_root: env_path("GAVEL_ARTIFACT_ROOT", defaults.artifact_root.clone()),
            run_identity: Identity {
                uid: env_u32("GAVEL_RUN_UID", defaults.run_identity.uid),
                gid: env_u32("GAVEL_RUN_GID", defaults.run_identity.gid),
            },
            compiler_identity: Identity {
                uid: env_u32("GAVEL_COMPILER_UID", defaults.compiler_identity.uid),
                gid: env_u32("GAVEL_COMPILER_GID", defaults.compiler_identity.gid),
            },
            compile_time_limit_ms: env_u64(
                "GAVEL_COMPILE_TIME_LIMIT_MS",
                defaults.compile_time_limit_ms,
            ),
            compile_memory_limit_mb: env_u64(
                "GAVEL_COMPILE_MEMORY_LIMIT_MB",
                defaults.compile_memory_limit_mb,
            ),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break the judging contracts.
    pub fn validate(&self) -> Result<()> {
        // The interactor shares the submission's real-time window during a
        // compile-heavy session; its budget must not be the smaller one.
        if self.compile_time_factor < self.real_time_factor {
            return Err(Error::Config(format!(
                "compile_time_factor ({}) must be >= real_time_factor ({})",
                self.compile_time_factor, self.real_time_factor
            )));
        }
        if self.diagnostic_limit == 0 || self.message_limit == 0 {
            return Err(Error::Config(
                "diagnostic and message byte budgets must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Real-time ceiling derived from a CPU ceiling.
    pub fn real_time_for(&self, cpu_time_ms: u64) -> u64 {
        cpu_time_ms.saturating_mul(self.real_time_factor)
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var_os(key).map(PathBuf::from).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        JudgeConfig::default().validate().unwrap();
    }

    #[test]
    fn compile_factor_below_real_factor_is_rejected() {
        let config = JudgeConfig {
            compile_time_factor: 1,
            real_time_factor: 2,
            ..JudgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn real_time_scales_with_factor() {
        let config = JudgeConfig::default();
        assert_eq!(config.real_time_for(1000), 2000);
    }
}
