//! Language profile table for compilation and execution.
//!
//! The table is embedded at build time and parsed once into an immutable
//! value; nothing mutates it after startup.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::sandbox::seccomp::FilterProfile;

/// Profile of one supported programming language.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    /// Canonical language name (e.g. "cpp").
    pub name: String,
    /// Name of the source file (e.g. "main.cpp").
    pub source_file: String,
    /// Name of the produced executable inside the workspace.
    pub executable_file: String,
    /// Compile command templates, run in order. Empty for interpreted
    /// languages.
    pub compile_commands: Vec<String>,
    /// Execute command template.
    pub run_command: String,
    /// The runtime manages its own heap (JVM and friends): skip the
    /// address-space rlimit and feed the ceiling to the command template.
    pub memory_managed: bool,
    /// Syscall-filter profile applied to untrusted runs.
    pub filter: Option<FilterProfile>,
    /// Extra environment (KEY=VALUE) for confined executions.
    pub env: Vec<String>,
}

/// Placeholder values substituted into command templates.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub src_path: &'a str,
    pub exe_path: &'a str,
    pub exe_dir: &'a str,
    pub exe_name: &'a str,
    pub max_memory_mb: u64,
}

/// Substitute `{placeholder}` markers in a single token (also used for
/// environment entries, which may reference the memory ceiling).
pub fn render_token(token: &str, ctx: &CommandContext<'_>) -> String {
    token
        .replace("{src_path}", ctx.src_path)
        .replace("{exe_path}", ctx.exe_path)
        .replace("{exe_dir}", ctx.exe_dir)
        .replace("{exe_name}", ctx.exe_name)
        .replace("{max_memory}", &ctx.max_memory_mb.to_string())
}

/// Substitute `{placeholder}` tokens and split into an argv vector.
pub fn render_command(template: &str, ctx: &CommandContext<'_>) -> Vec<String> {
    template
        .split_whitespace()
        .map(|token| render_token(token, ctx))
        .collect()
}

/// Raw TOML shape for one language.
#[derive(Debug, Deserialize)]
struct RawLanguageProfile {
    source_file: String,
    executable_file: String,
    #[serde(default)]
    compile_command: Vec<String>,
    run_command: String,
    #[serde(default)]
    memory_managed: bool,
    seccomp_profile: Option<String>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Immutable language-id -> profile table.
#[derive(Debug)]
pub struct LanguageTable {
    profiles: HashMap<String, LanguageProfile>,
}

static EMBEDDED: OnceLock<LanguageTable> = OnceLock::new();

impl LanguageTable {
    /// The table compiled into the binary from `files/languages.toml`.
    pub fn embedded() -> &'static LanguageTable {
        EMBEDDED.get_or_init(|| {
            let content =
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
            LanguageTable::parse(content).expect("embedded language table must parse")
        })
    }

    /// Parse a table from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: HashMap<String, RawLanguageProfile> =
            toml::from_str(content).context("invalid language table")?;

        let mut profiles = HashMap::new();
        for (name, raw) in raw {
            let filter = match raw.seccomp_profile.as_deref() {
                None | Some("") => None,
                Some(profile_name) => {
                    Some(FilterProfile::from_name(profile_name).ok_or_else(|| {
                        Error::Config(format!(
                            "language {}: unknown seccomp profile {:?}",
                            name, profile_name
                        ))
                    })?)
                }
            };

            let profile = LanguageProfile {
                name: name.to_lowercase(),
                source_file: raw.source_file,
                executable_file: raw.executable_file,
                compile_commands: raw.compile_command,
                run_command: raw.run_command,
                memory_managed: raw.memory_managed,
                filter,
                env: raw.env,
            };

            for alias in &raw.aliases {
                profiles.insert(alias.to_lowercase(), profile.clone());
            }
            profiles.insert(name.to_lowercase(), profile);
        }

        Ok(Self { profiles })
    }

    pub fn get(&self, language: &str) -> Result<&LanguageProfile> {
        self.profiles
            .get(&language.to_lowercase())
            .ok_or_else(|| Error::Config(format!("unsupported language: {}", language)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[c]
source_file = "main.c"
executable_file = "main"
compile_command = ["/usr/bin/gcc -O2 {src_path} -o {exe_path}"]
run_command = "{exe_path}"
seccomp_profile = "general"

[python]
source_file = "main.py"
executable_file = "main.py"
run_command = "/usr/bin/python3 {exe_path}"
seccomp_profile = "python"
aliases = ["py", "python3"]
"#;

    #[test]
    fn parses_and_resolves_aliases() {
        let table = LanguageTable::parse(SAMPLE).unwrap();
        assert!(table.get("c").is_ok());
        assert_eq!(table.get("PY").unwrap().name, "python");
        assert_eq!(table.get("python3").unwrap().source_file, "main.py");
        assert!(table.get("cobol").is_err());
    }

    #[test]
    fn interpreted_languages_have_no_compile_step() {
        let table = LanguageTable::parse(SAMPLE).unwrap();
        assert!(table.get("python").unwrap().compile_commands.is_empty());
    }

    #[test]
    fn unknown_filter_profile_is_rejected() {
        let bad = r#"
[weird]
source_file = "m.w"
executable_file = "m"
run_command = "{exe_path}"
seccomp_profile = "no_such_profile"
"#;
        assert!(LanguageTable::parse(bad).is_err());
    }

    #[test]
    fn command_rendering_substitutes_placeholders() {
        let ctx = CommandContext {
            src_path: "/w/main.cpp",
            exe_path: "/w/main",
            exe_dir: "/w",
            exe_name: "main",
            max_memory_mb: 256,
        };
        let argv = render_command("/usr/bin/g++ -O2 {src_path} -o {exe_path}", &ctx);
        assert_eq!(
            argv,
            vec!["/usr/bin/g++", "-O2", "/w/main.cpp", "-o", "/w/main"]
        );

        let java = render_command("/usr/bin/java -Xmx{max_memory}m -cp {exe_dir} Main", &ctx);
        assert_eq!(java[1], "-Xmx256m");
        assert_eq!(java[3], "/w");
    }

    #[test]
    fn embedded_table_parses() {
        let table = LanguageTable::embedded();
        for lang in ["c", "cpp", "java", "python"] {
            assert!(table.get(lang).is_ok(), "missing language {}", lang);
        }
    }
}
