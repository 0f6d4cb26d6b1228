//! Compiled artifact lifecycle: source in, executable out, run many times.
//!
//! Compilation happens in a fresh scratch directory under trusted
//! confinement (build toolchains need filesystem and process access that
//! submissions never get), and the produced executable is persisted into
//! the artifact's fingerprint-keyed workspace. Because the workspace is
//! content-addressed, concurrent sessions compiling the same source land
//! on the same executable without racing.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Identity, JudgeConfig};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::languages::{render_command, render_token, CommandContext, LanguageProfile, LanguageTable};
use crate::sandbox::{self, ExecutionResult, ResourceLimits, SandboxSpec, Stdio};
use crate::util::read_bounded;
use crate::verdict::Verdict;

/// Per-run parameters for executing a compiled artifact.
#[derive(Debug)]
pub struct RunRequest {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
    pub cpu_time_ms: u64,
    pub memory_mb: u64,
    /// Exclusively owned scratch directory for this run.
    pub workdir: PathBuf,
    /// Arguments appended after the execute-command template.
    pub extra_args: Vec<String>,
}

/// A source program somewhere in its compile-once/run-many lifecycle.
#[derive(Debug)]
pub struct Artifact {
    config: Arc<JudgeConfig>,
    profile: LanguageProfile,
    fingerprint: Fingerprint,
    workspace: PathBuf,
    exe_path: PathBuf,
    source: Option<String>,
    compiled: bool,
    permanent: bool,
    trusted: bool,
}

impl Artifact {
    /// New artifact from source text; the fingerprint is derived from the
    /// language and the source bytes.
    pub fn new(
        config: Arc<JudgeConfig>,
        table: &LanguageTable,
        language: &str,
        source: impl Into<String>,
    ) -> Result<Self> {
        let profile = table.get(language)?.clone();
        let source = source.into();
        let fingerprint =
            Fingerprint::of_bytes(format!("{}\n{}", profile.name, source).as_bytes());
        Ok(Self::with_fingerprint(config, profile, fingerprint, Some(source), false))
    }

    /// Attach to a previously compiled artifact by fingerprint (e.g. a
    /// pre-uploaded checker). The executable must already be in place.
    pub fn from_existing(
        config: Arc<JudgeConfig>,
        table: &LanguageTable,
        language: &str,
        fingerprint: Fingerprint,
    ) -> Result<Self> {
        let profile = table.get(language)?.clone();
        let mut artifact = Self::with_fingerprint(config, profile, fingerprint, None, true);
        if !artifact.exe_path.is_file() {
            return Err(Error::Config(format!(
                "no executable stored for fingerprint {}",
                artifact.fingerprint
            )));
        }
        artifact.compiled = true;
        Ok(artifact)
    }

    fn with_fingerprint(
        config: Arc<JudgeConfig>,
        profile: LanguageProfile,
        fingerprint: Fingerprint,
        source: Option<String>,
        permanent: bool,
    ) -> Self {
        let workspace = config.artifact_root.join(fingerprint.as_str());
        let exe_path = workspace.join(&profile.executable_file);
        Self {
            config,
            profile,
            fingerprint,
            workspace,
            exe_path,
            source,
            compiled: false,
            permanent,
            trusted: false,
        }
    }

    /// Mark as a trusted program: runs unfiltered under the compiler
    /// identity instead of the confined contestant identity.
    pub fn into_trusted(mut self) -> Self {
        self.trusted = true;
        self
    }

    /// Permanent artifacts survive ordinary cleans.
    pub fn into_permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub(crate) fn config(&self) -> &Arc<JudgeConfig> {
        &self.config
    }

    pub fn language(&self) -> &str {
        &self.profile.name
    }

    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// Compile the source under trusted confinement, persisting the
    /// executable into the workspace. Raises `Error::Compile` with the
    /// bounded diagnostic on failure.
    pub async fn compile(&mut self, max_time_ms: u64) -> Result<()> {
        if self.compiled {
            return Ok(());
        }
        let source = self
            .source
            .clone()
            .ok_or_else(|| Error::Config("artifact has no source to compile".into()))?;

        fs::create_dir_all(&self.workspace)?;
        // The confined identity must be able to traverse to the
        // executable whatever the judge's umask says.
        fs::set_permissions(&self.workspace, fs::Permissions::from_mode(0o755))?;
        if self.exe_path.is_file() {
            // Another session already built this fingerprint.
            debug!(fingerprint = %self.fingerprint, "reusing stored executable");
            self.compiled = true;
            return Ok(());
        }

        let scratch = tempfile::tempdir()?;
        let src_path = scratch.path().join(&self.profile.source_file);
        fs::write(&src_path, &source)?;

        if self.profile.compile_commands.is_empty() {
            // Interpreted language: the source is the executable.
            fs::copy(&src_path, &self.exe_path)?;
            fs::set_permissions(&self.exe_path, fs::Permissions::from_mode(0o755))?;
            self.compiled = true;
            return Ok(());
        }

        let scratch_exe = scratch.path().join(&self.profile.executable_file);
        let src_str = src_path.to_string_lossy();
        let exe_str = scratch_exe.to_string_lossy();
        let dir_str = scratch.path().to_string_lossy();
        let ctx = CommandContext {
            src_path: &src_str,
            exe_path: &exe_str,
            exe_dir: &dir_str,
            exe_name: &self.profile.executable_file,
            max_memory_mb: self.config.compile_memory_limit_mb,
        };

        let out_path = scratch.path().join("compile.out");
        let err_path = scratch.path().join("compile.err");

        for template in &self.profile.compile_commands {
            let argv = render_command(template, &ctx);
            if argv.is_empty() {
                return Err(Error::Config(format!(
                    "empty compile command for language {}",
                    self.profile.name
                )));
            }

            let spec = SandboxSpec::new(&argv[0])
                .with_args(argv[1..].iter().cloned())
                .with_env(base_env(&self.profile, &ctx))
                .with_workdir(scratch.path())
                .with_stdin(Stdio::Null)
                .with_stdout(Stdio::File(out_path.clone()))
                .with_stderr(Stdio::File(err_path.clone()))
                .with_limits(ResourceLimits {
                    cpu_time_ms: Some(max_time_ms),
                    real_time_ms: Some(self.config.real_time_for(max_time_ms)),
                    memory_mb: Some(self.config.compile_memory_limit_mb),
                    output_mb: Some(self.config.output_limit_mb),
                    processes: None,
                    limit_address_space: false,
                });
            let spec = match privileged_identity(&self.config) {
                Some(identity) => spec.with_identity(identity),
                None => spec,
            };

            let result = sandbox::run(spec).await?;
            if !result.verdict.is_accepted() {
                let diagnostic = self.compile_diagnostic(&result, &err_path, &out_path, scratch.path());
                return Err(Error::Compile { diagnostic });
            }
        }

        if !scratch_exe.is_file() {
            return Err(Error::Compile {
                diagnostic: "compiler reported success but produced no executable".into(),
            });
        }
        fs::copy(&scratch_exe, &self.exe_path)?;
        fs::set_permissions(&self.exe_path, fs::Permissions::from_mode(0o755))?;
        self.compiled = true;
        info!(
            fingerprint = %self.fingerprint,
            language = %self.profile.name,
            "compiled artifact"
        );
        Ok(())
    }

    fn compile_diagnostic(
        &self,
        result: &ExecutionResult,
        err_path: &Path,
        out_path: &Path,
        scratch: &Path,
    ) -> String {
        let mut diagnostic = read_bounded(err_path, self.config.diagnostic_limit);
        if diagnostic.trim().is_empty() {
            diagnostic = read_bounded(out_path, self.config.diagnostic_limit);
        }
        if diagnostic.trim().is_empty() {
            diagnostic = match result.verdict {
                Verdict::TimeLimitExceeded | Verdict::IdlenessLimitExceeded => {
                    "time limit exceeded when compiling".into()
                }
                Verdict::MemoryLimitExceeded => "memory limit exceeded when compiling".into(),
                _ => format!("compiler exited with code {}", result.exit_code),
            };
        }
        // Scratch paths mean nothing to the submitter.
        diagnostic.replace(&scratch.to_string_lossy().into_owned(), "~")
    }

    /// Execute the compiled artifact under the language's confinement:
    /// filtered and identity-dropped for submissions, unfiltered and
    /// privileged for trusted programs.
    pub async fn run(&self, request: RunRequest) -> Result<ExecutionResult> {
        if !self.compiled {
            return Err(Error::Config(format!(
                "artifact {} was never compiled",
                self.fingerprint
            )));
        }

        let exe_str = self.exe_path.to_string_lossy();
        let dir_str = self.workspace.to_string_lossy();
        let ctx = CommandContext {
            src_path: &exe_str,
            exe_path: &exe_str,
            exe_dir: &dir_str,
            exe_name: &self.profile.executable_file,
            max_memory_mb: request.memory_mb,
        };
        let mut argv = render_command(&self.profile.run_command, &ctx);
        if argv.is_empty() {
            return Err(Error::Config(format!(
                "empty run command for language {}",
                self.profile.name
            )));
        }
        argv.extend(request.extra_args.iter().cloned());

        // Managed runtimes get the ceiling through their own flags; the
        // address-space rlimit would kill them while they reserve.
        let memory_mb = if self.profile.memory_managed {
            None
        } else {
            Some(request.memory_mb)
        };

        let limits = ResourceLimits {
            cpu_time_ms: Some(request.cpu_time_ms),
            real_time_ms: Some(self.config.real_time_for(request.cpu_time_ms)),
            memory_mb,
            output_mb: Some(self.config.output_limit_mb),
            processes: None,
            limit_address_space: !self.profile.memory_managed,
        };

        let mut spec = SandboxSpec::new(&argv[0])
            .with_args(argv[1..].iter().cloned())
            .with_env(base_env(&self.profile, &ctx))
            .with_workdir(&request.workdir)
            .with_stdin(request.stdin)
            .with_stdout(request.stdout)
            .with_stderr(request.stderr)
            .with_limits(limits);

        if self.trusted {
            if let Some(identity) = privileged_identity(&self.config) {
                spec = spec.with_identity(identity);
            }
        } else {
            spec = spec.with_identity(self.config.run_identity);
            if let Some(filter) = self.profile.filter {
                spec = spec.with_filter(filter);
            }
        }

        sandbox::run(spec).await
    }

    /// Remove the stored executable. No-op for permanent artifacts.
    pub fn clean(&mut self) -> Result<()> {
        if self.permanent {
            debug!(fingerprint = %self.fingerprint, "skipping clean of permanent artifact");
            return Ok(());
        }
        self.force_clean()
    }

    /// Remove the stored executable even if permanent.
    pub fn force_clean(&mut self) -> Result<()> {
        if self.exe_path.exists() {
            fs::remove_file(&self.exe_path)?;
        }
        let _ = fs::remove_dir(&self.workspace);
        self.compiled = false;
        Ok(())
    }
}

/// PATH passthrough plus the profile's own entries (which may reference
/// the memory ceiling).
fn base_env(profile: &LanguageProfile, ctx: &CommandContext<'_>) -> Vec<String> {
    let mut env = vec![format!(
        "PATH={}",
        std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into())
    )];
    env.extend(profile.env.iter().map(|entry| render_token(entry, ctx)));
    env
}

/// The compiler identity, or `None` when it is root anyway (no drop
/// needed, which also lets an unprivileged test process compile).
fn privileged_identity(config: &JudgeConfig) -> Option<Identity> {
    let identity = config.compiler_identity;
    if identity.uid == 0 && identity.gid == 0 {
        None
    } else {
        Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_setup() -> (tempfile::TempDir, Arc<JudgeConfig>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(JudgeConfig {
            data_root: dir.path().join("data"),
            artifact_root: dir.path().join("sub"),
            ..JudgeConfig::default()
        });
        (dir, config)
    }

    #[test]
    fn fingerprint_depends_on_language_and_source() {
        let (_dir, config) = test_setup();
        let table = LanguageTable::embedded();
        let a = Artifact::new(config.clone(), table, "c", "int main(){}").unwrap();
        let b = Artifact::new(config.clone(), table, "cpp", "int main(){}").unwrap();
        let c = Artifact::new(config, table, "c", "int main(){}").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn from_existing_requires_a_stored_executable() {
        let (_dir, config) = test_setup();
        let table = LanguageTable::embedded();
        let missing = Artifact::from_existing(
            config,
            table,
            "cpp",
            Fingerprint::from_external("feedface"),
        );
        assert!(missing.is_err());
    }

    #[test]
    fn interpreted_compile_persists_the_source() {
        let (_dir, config) = test_setup();
        let table = LanguageTable::embedded();
        let mut artifact =
            Artifact::new(config, table, "python", "print(sum(map(int, input().split())))")
                .unwrap();
        tokio_test::block_on(artifact.compile(5000)).unwrap();
        assert!(artifact.is_compiled());
        assert!(artifact.exe_path().is_file());
    }

    #[tokio::test]
    async fn running_an_uncompiled_artifact_is_an_error() {
        let (_dir, config) = test_setup();
        let table = LanguageTable::embedded();
        let artifact = Artifact::new(config, table, "c", "int main(){}").unwrap();
        let request = RunRequest {
            stdin: Stdio::Null,
            stdout: Stdio::Null,
            stderr: Stdio::Null,
            cpu_time_ms: 1000,
            memory_mb: 64,
            workdir: std::env::temp_dir(),
            extra_args: vec![],
        };
        assert!(artifact.run(request).await.is_err());
    }

    #[test]
    fn clean_spares_permanent_artifacts() {
        let (_dir, config) = test_setup();
        let table = LanguageTable::embedded();
        let mut artifact = Artifact::new(config, table, "python", "print(1)")
            .unwrap()
            .into_permanent();
        fs::create_dir_all(artifact.workspace.clone()).unwrap();
        fs::write(artifact.exe_path(), "print(1)").unwrap();
        artifact.compiled = true;

        artifact.clean().unwrap();
        assert!(artifact.exe_path().exists());

        artifact.force_clean().unwrap();
        assert!(!artifact.exe_path().exists());
    }
}
