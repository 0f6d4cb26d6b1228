//! Verdict enumeration shared by every judging layer.
//!
//! Verdicts carry a total severity order so that cross-case aggregation can
//! always pick the "worst" outcome deterministically.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome classification of one execution or one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
    CompileError,
    /// Wall-clock budget blown without using CPU (blocked on I/O, sleeping).
    IdlenessLimitExceeded,
    /// A trusted judge program itself misbehaved; an operator problem.
    JudgeError,
    /// Partial score awarded by a checker (testlib exit code 7).
    Point,
    /// Sentinel for cases that were never executed.
    Skipped,
}

impl Verdict {
    /// Rank used for worst-wins aggregation. Higher is worse.
    ///
    /// The base order is the judging-fairness contract:
    /// AC < WA < TLE < MLE < RE < SYSTEM_ERROR < COMPILE_ERROR.
    /// Side-channel verdicts slot in between: POINT is a non-accepted
    /// partial result just above AC, IDLENESS ranks with TLE, and
    /// JUDGE_ERROR sits above SYSTEM_ERROR. SKIPPED never aggregates.
    pub fn severity(self) -> u8 {
        match self {
            Verdict::Skipped => 0,
            Verdict::Accepted => 0,
            Verdict::Point => 1,
            Verdict::WrongAnswer => 2,
            Verdict::TimeLimitExceeded => 3,
            Verdict::IdlenessLimitExceeded => 4,
            Verdict::MemoryLimitExceeded => 5,
            Verdict::RuntimeError => 6,
            Verdict::SystemError => 7,
            Verdict::JudgeError => 8,
            Verdict::CompileError => 9,
        }
    }

    /// Pick the worse of two verdicts; ties keep `self`.
    pub fn worst(self, other: Verdict) -> Verdict {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    /// True for verdicts caused by a resource ceiling rather than by the
    /// program's own exit status.
    pub fn is_limit_exceeded(self) -> bool {
        matches!(
            self,
            Verdict::TimeLimitExceeded
                | Verdict::MemoryLimitExceeded
                | Verdict::IdlenessLimitExceeded
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::RuntimeError => "runtime_error",
            Verdict::SystemError => "system_error",
            Verdict::CompileError => "compile_error",
            Verdict::IdlenessLimitExceeded => "idleness_limit_exceeded",
            Verdict::JudgeError => "judge_error",
            Verdict::Point => "point",
            Verdict::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_follows_the_contract_order() {
        assert_eq!(
            Verdict::Accepted.worst(Verdict::WrongAnswer),
            Verdict::WrongAnswer
        );
        assert_eq!(
            Verdict::WrongAnswer.worst(Verdict::TimeLimitExceeded),
            Verdict::TimeLimitExceeded
        );
        assert_eq!(
            Verdict::TimeLimitExceeded.worst(Verdict::MemoryLimitExceeded),
            Verdict::MemoryLimitExceeded
        );
        assert_eq!(
            Verdict::MemoryLimitExceeded.worst(Verdict::RuntimeError),
            Verdict::RuntimeError
        );
        assert_eq!(
            Verdict::RuntimeError.worst(Verdict::SystemError),
            Verdict::SystemError
        );
        assert_eq!(
            Verdict::SystemError.worst(Verdict::CompileError),
            Verdict::CompileError
        );
    }

    #[test]
    fn idleness_is_distinct_but_ranks_near_tle() {
        assert_ne!(Verdict::IdlenessLimitExceeded, Verdict::TimeLimitExceeded);
        assert!(
            Verdict::IdlenessLimitExceeded.severity() > Verdict::TimeLimitExceeded.severity()
        );
        assert!(
            Verdict::IdlenessLimitExceeded.severity() < Verdict::MemoryLimitExceeded.severity()
        );
    }

    #[test]
    fn skipped_never_wins_aggregation() {
        assert_eq!(Verdict::WrongAnswer.worst(Verdict::Skipped), Verdict::WrongAnswer);
        assert_eq!(Verdict::Accepted.worst(Verdict::Skipped), Verdict::Accepted);
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(Verdict::Accepted.to_string(), "accepted");
        assert_eq!(
            Verdict::IdlenessLimitExceeded.to_string(),
            "idleness_limit_exceeded"
        );
        assert_eq!(Verdict::Point.to_string(), "point");
    }
}
