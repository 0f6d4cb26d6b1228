//! Error taxonomy for the judging core.
//!
//! Resource-limit outcomes (TLE/MLE/IDLENESS) are verdict values, not
//! errors. Errors are reserved for the cases where judging itself cannot
//! proceed: a submission that failed to build, a trusted program that
//! malfunctioned, or the sandbox machinery breaking underneath us.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The submission failed to build. Recoverable; surfaced to the
    /// contestant as COMPILE_ERROR together with the bounded diagnostic.
    #[error("compilation failed: {diagnostic}")]
    Compile { diagnostic: String },

    /// A trusted judge program (checker/interactor/generator/validator)
    /// malfunctioned. Reported to the operator, never retried.
    #[error("judge program failure: {0}")]
    Judge(String),

    /// The process lacks the privilege required to drop identity. Fatal.
    #[error("insufficient privilege: {0}")]
    Privilege(String),

    /// The confinement machinery itself failed (fork, rlimit, seccomp).
    #[error("sandbox failure: {0}")]
    Sandbox(String),

    /// Bad static configuration (unknown language, invalid limits).
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Bounded, operator-safe rendering for session abort reports.
    pub fn bounded_message(&self, limit: usize) -> String {
        let mut msg = self.to_string();
        if msg.len() > limit {
            let mut end = limit;
            while !msg.is_char_boundary(end) {
                end -= 1;
            }
            msg.truncate(end);
            msg.push_str("...");
        }
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_message_truncates() {
        let err = Error::Sandbox("x".repeat(100));
        let msg = err.bounded_message(32);
        assert!(msg.len() <= 35);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn compile_error_carries_diagnostic() {
        let err = Error::Compile {
            diagnostic: "main.c:1: error".into(),
        };
        assert!(err.to_string().contains("main.c:1"));
    }
}
