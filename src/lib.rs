//! Gavel: sandboxed execution and verdict engine for online judges.
//!
//! The core pipeline, leaves first: a fork-based confinement primitive
//! ([`sandbox`]), the compile-once/run-many artifact lifecycle
//! ([`artifact`]), the fixed verdict translation for author-supplied
//! judge programs ([`trusted`]), per-case runners including the
//! interactive double-process protocol ([`runner`]), and the cross-case
//! aggregation state machine ([`session`]).
//!
//! Request ingestion, queueing and result transport are the host
//! application's concern; this crate exposes structured inputs and
//! reports at the seams.

pub mod artifact;
pub mod case;
pub mod compare;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod languages;
pub mod runner;
pub mod sandbox;
pub mod session;
pub mod trusted;
pub mod verdict;

mod util;

pub use artifact::{Artifact, RunRequest};
pub use case::Case;
pub use config::{Identity, JudgeConfig};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use languages::{LanguageProfile, LanguageTable};
pub use runner::{CaseJudge, CaseLimits, CaseOutcome, CaseRunner, InteractiveRunner};
pub use sandbox::{ExecutionResult, FilterProfile, ResourceLimits, SandboxSpec, Stdio};
pub use session::{
    CaseProgress, CaseRecord, JudgeSession, SessionCase, SessionLimits, SessionReport,
};
pub use trusted::{Checker, Role, TrustedProgram};
pub use verdict::Verdict;
