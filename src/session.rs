//! Cross-case aggregation: one submission, an ordered list of cases, one
//! final report.
//!
//! States: JUDGING, then exactly one terminal outcome. A compile failure
//! short-circuits before any case runs. Cases are judged strictly in the
//! caller's order; short-circuiting only stops iteration, never reorders.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::case::Case;
use crate::config::JudgeConfig;
use crate::error::{Error, Result};
use crate::runner::{CaseJudge, CaseLimits, CaseOutcome, CaseRunner, InteractiveRunner};
use crate::trusted::{Checker, TrustedProgram};
use crate::verdict::Verdict;

/// Per-session limits supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// CPU ceiling per case, milliseconds.
    pub max_time_ms: u64,
    /// Memory ceiling per case, MB.
    pub max_memory_mb: u64,
    /// Budget for the summed submission time across cases.
    pub max_sum_time_ms: Option<u64>,
    /// Keep executing after the first non-accepted case.
    pub run_until_complete: bool,
}

/// One case in session order, with its optional group tag.
#[derive(Debug)]
pub struct SessionCase {
    pub case: Case,
    pub group: Option<String>,
}

impl SessionCase {
    pub fn ungrouped(case: Case) -> Self {
        Self { case, group: None }
    }

    pub fn grouped(case: Case, group: impl Into<String>) -> Self {
        Self {
            case,
            group: Some(group.into()),
        }
    }
}

/// Recorded result of one case, in session order.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(flatten)]
    pub outcome: CaseOutcome,
}

/// Incremental per-case progress. The final report stays authoritative.
#[derive(Debug, Clone)]
pub struct CaseProgress {
    pub index: usize,
    pub outcome: CaseOutcome,
}

/// The one terminal report a session produces.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub verdict: Verdict,
    /// Total submission time across executed cases, milliseconds.
    pub time_ms: u64,
    /// Peak submission memory across executed cases, KB.
    pub max_memory_kb: u64,
    pub cases: Vec<CaseRecord>,
    /// 0-100 when at least one case was scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Bounded diagnostic for compile failures and aborted sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SessionReport {
    /// Wire form handed to the outer request/queueing layer.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("session reports always serialize")
    }
}

/// One judging request from compile to final report.
pub struct JudgeSession {
    config: Arc<JudgeConfig>,
    submission: Artifact,
    checker: Checker,
    interactor: Option<TrustedProgram>,
    cases: Vec<SessionCase>,
    /// Edges `(group, prerequisite)`: the group runs only if the
    /// prerequisite group fully passed.
    dependencies: Vec<(String, String)>,
    limits: SessionLimits,
    progress: Option<UnboundedSender<CaseProgress>>,
}

impl JudgeSession {
    pub fn new(
        config: Arc<JudgeConfig>,
        submission: Artifact,
        checker: Checker,
        cases: Vec<SessionCase>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            config,
            submission,
            checker,
            interactor: None,
            cases,
            dependencies: Vec::new(),
            limits,
            progress: None,
        }
    }

    /// Judge interactively through this interactor.
    pub fn with_interactor(mut self, interactor: TrustedProgram) -> Self {
        self.interactor = Some(interactor);
        self
    }

    /// Add group dependency edges `(group, prerequisite)`.
    pub fn with_group_dependencies(mut self, dependencies: Vec<(String, String)>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Receive per-case progress as cases finish.
    pub fn with_progress(mut self, sender: UnboundedSender<CaseProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Run to the terminal report. Never panics through: internal
    /// failures become an aborted report with a bounded diagnostic.
    pub async fn run(mut self) -> SessionReport {
        let diagnostic_limit = self.config.diagnostic_limit;
        match self.execute().await {
            Ok(report) => report,
            Err(Error::Compile { diagnostic }) => {
                info!("session rejected: compile error");
                aborted_report(Verdict::CompileError, diagnostic, diagnostic_limit)
            }
            Err(err @ Error::Judge(_)) => {
                warn!(error = %err, "session aborted: judge program failure");
                aborted_report(
                    Verdict::JudgeError,
                    err.bounded_message(diagnostic_limit),
                    diagnostic_limit,
                )
            }
            Err(err) => {
                warn!(error = %err, "session aborted");
                aborted_report(
                    Verdict::SystemError,
                    err.bounded_message(diagnostic_limit),
                    diagnostic_limit,
                )
            }
        }
    }

    async fn execute(&mut self) -> Result<SessionReport> {
        let compile_budget = self
            .limits
            .max_time_ms
            .saturating_mul(self.config.compile_time_factor)
            .max(self.config.compile_time_limit_ms);
        self.submission.compile(compile_budget).await?;

        let case_limits = CaseLimits {
            cpu_time_ms: self.limits.max_time_ms,
            memory_mb: self.limits.max_memory_mb,
        };

        let mut runner: Box<dyn CaseJudge + '_> = match &self.interactor {
            Some(interactor) => Box::new(InteractiveRunner::new(
                &self.submission,
                interactor,
                &self.checker,
                case_limits,
            )?),
            None => Box::new(CaseRunner::new(&self.submission, &self.checker, case_limits)?),
        };

        let report = aggregate(
            &self.cases,
            runner.as_mut(),
            &self.limits,
            &self.dependencies,
            self.progress.as_ref(),
        )
        .await?;

        info!(
            verdict = %report.verdict,
            cases = report.cases.len(),
            time_ms = report.time_ms,
            "session finished"
        );
        Ok(report)
    }
}

/// The aggregation state machine proper, generic over the case judge so
/// the ordering/grouping/scoring rules can be exercised with a scripted
/// stand-in.
pub(crate) async fn aggregate(
    cases: &[SessionCase],
    judge: &mut dyn CaseJudge,
    limits: &SessionLimits,
    dependencies: &[(String, String)],
    progress: Option<&UnboundedSender<CaseProgress>>,
) -> Result<SessionReport> {
    let dependents = dependents_by_prerequisite(dependencies);
    let mut skipped_groups: HashSet<String> = HashSet::new();

    let mut records = Vec::with_capacity(cases.len());
    let mut worst = Verdict::Accepted;
    let mut total_time_ms = 0u64;
    let mut max_memory_kb = 0u64;
    let mut accepted = 0usize;
    let mut point_sum = 0.0f64;
    let mut has_points = false;
    let mut halted = false;

    for (index, session_case) in cases.iter().enumerate() {
        let group_skipped = session_case
            .group
            .as_ref()
            .is_some_and(|group| skipped_groups.contains(group));
        if halted || group_skipped {
            records.push(CaseRecord {
                index,
                group: session_case.group.clone(),
                outcome: CaseOutcome::skipped(),
            });
            continue;
        }

        let outcome = judge.judge(&session_case.case).await?;

        total_time_ms += outcome.time_ms;
        max_memory_kb = max_memory_kb.max(outcome.memory_kb);
        match outcome.verdict {
            Verdict::Accepted => accepted += 1,
            Verdict::Point => {
                has_points = true;
                point_sum += outcome.point.unwrap_or(0.0);
            }
            _ => {}
        }
        let verdict = outcome.verdict;
        worst = worst.worst(verdict);
        let failed = !verdict.is_accepted();

        if let Some(sender) = progress {
            let _ = sender.send(CaseProgress {
                index,
                outcome: outcome.clone(),
            });
        }
        records.push(CaseRecord {
            index,
            group: session_case.group.clone(),
            outcome,
        });

        if failed {
            if let Some(group) = &session_case.group {
                mark_dependents_skipped(group, &dependents, &mut skipped_groups);
            }
            if !limits.run_until_complete {
                halted = true;
            }
        }
        if matches!(verdict, Verdict::SystemError | Verdict::JudgeError) {
            // Operator problems stop the session outright; run-until-
            // complete applies to contestant outcomes only.
            halted = true;
        }

        if let Some(budget) = limits.max_sum_time_ms {
            if total_time_ms > budget {
                // The per-case ceiling never fired, but the sum budget
                // did; report it in the closed verdict set.
                worst = worst.worst(Verdict::TimeLimitExceeded);
                halted = true;
            }
        }
    }

    let score = compute_score(cases.len(), accepted, has_points, point_sum);
    Ok(SessionReport {
        verdict: worst,
        time_ms: total_time_ms,
        max_memory_kb,
        cases: records,
        score,
        message: None,
    })
}

/// `accepted/total * 100`, or point-derived once any POINT verdict showed
/// up (accepted cases count as a full score).
fn compute_score(total: usize, accepted: usize, has_points: bool, point_sum: f64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let raw = if has_points {
        (accepted as f64 * 100.0 + point_sum) / total as f64
    } else {
        accepted as f64 / total as f64 * 100.0
    };
    Some(raw.clamp(0.0, 100.0))
}

/// prerequisite -> groups that directly depend on it.
fn dependents_by_prerequisite(
    dependencies: &[(String, String)],
) -> HashMap<&str, Vec<&str>> {
    let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
    for (group, prerequisite) in dependencies {
        map.entry(prerequisite.as_str())
            .or_default()
            .push(group.as_str());
    }
    map
}

/// Reachability closure: every group transitively depending on `failed`
/// joins the skip set.
fn mark_dependents_skipped(
    failed: &str,
    dependents: &HashMap<&str, Vec<&str>>,
    skipped: &mut HashSet<String>,
) {
    let mut frontier = vec![failed];
    while let Some(group) = frontier.pop() {
        for &dependent in dependents.get(group).into_iter().flatten() {
            if skipped.insert(dependent.to_string()) {
                frontier.push(dependent);
            }
        }
    }
}

fn aborted_report(verdict: Verdict, message: String, limit: usize) -> SessionReport {
    let mut message = message;
    if message.len() > limit {
        let mut end = limit;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
        message.push_str("...");
    }
    SessionReport {
        verdict,
        time_ms: 0,
        max_memory_kb: 0,
        cases: Vec::new(),
        score: None,
        message: Some(message),
    }
}
