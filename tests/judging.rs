//! End-to-end judging tests. These compile real contestant programs and
//! drop privileges, so they are ignored unless the host has a C toolchain
//! and the suite runs as root:
//!
//!     sudo -E cargo test --test judging -- --ignored

use std::sync::Arc;

use gavel::artifact::Artifact;
use gavel::case::Case;
use gavel::config::JudgeConfig;
use gavel::fingerprint::Fingerprint;
use gavel::languages::LanguageTable;
use gavel::session::{JudgeSession, SessionCase, SessionLimits};
use gavel::trusted::{Checker, Role, TrustedProgram};
use gavel::Verdict;

const APLUSB_OK: &str = r#"
#include <stdio.h>
int main(void) {
    int a, b;
    scanf("%d %d", &a, &b);
    printf("%d\n", a + b);
    return 0;
}
"#;

const APLUSB_WRONG: &str = r#"
#include <stdio.h>
int main(void) {
    int a, b;
    scanf("%d %d", &a, &b);
    printf("%d\n", a + b + 1);
    return 0;
}
"#;

const BUSY_LOOP: &str = r#"
int main(void) { for (;;) {} }
"#;

const SLEEPER: &str = r#"
#include <unistd.h>
int main(void) { sleep(30); return 0; }
"#;

const MEMORY_HOG: &str = r#"
#include <stdlib.h>
#include <string.h>
int main(void) {
    for (int i = 0; i < 64; i++) {
        char *chunk = malloc(4 << 20);
        if (!chunk) return 0;
        memset(chunk, 1, 4 << 20);
    }
    return 0;
}
"#;

const CRASHER: &str = r#"
int main(void) { int *p = 0; *p = 1; return 0; }
"#;

const SYNTAX_ERROR: &str = "int main( { return 0; }\n";

fn setup() -> (tempfile::TempDir, Arc<JudgeConfig>) {
    let _ = tracing_subscriber::fmt().with_env_filter("gavel=debug").try_init();
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(JudgeConfig {
        data_root: dir.path().join("data"),
        artifact_root: dir.path().join("sub"),
        ..JudgeConfig::default()
    });
    (dir, config)
}

fn aplusb_case(config: &JudgeConfig) -> Case {
    let case = Case::new(config, Fingerprint::of_bytes(b"aplusb-1"));
    case.write_input(b"1 2\n").unwrap();
    case.write_answer(b"3\n").unwrap();
    case
}

fn limits() -> SessionLimits {
    SessionLimits {
        max_time_ms: 1000,
        max_memory_mb: 64,
        max_sum_time_ms: None,
        run_until_complete: false,
    }
}

async fn judge_c_source(source: &str) -> gavel::session::SessionReport {
    let (_dir, config) = setup();
    let table = LanguageTable::embedded();
    let submission = Artifact::new(config.clone(), table, "c", source).unwrap();
    let cases = vec![SessionCase::ungrouped(aplusb_case(&config))];
    JudgeSession::new(config, submission, Checker::Tokens, cases, limits())
        .run()
        .await
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn correct_submission_is_accepted() {
    let report = judge_c_source(APLUSB_OK).await;
    assert_eq!(report.verdict, Verdict::Accepted);
    assert_eq!(report.score, Some(100.0));
    assert!(report.time_ms < 1000);
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn off_by_one_submission_is_wrong_answer() {
    let report = judge_c_source(APLUSB_WRONG).await;
    assert_eq!(report.verdict, Verdict::WrongAnswer);
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn busy_loop_is_time_limit_exceeded() {
    let report = judge_c_source(BUSY_LOOP).await;
    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
    assert!(report.time_ms >= 1000);
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn sleeper_is_idleness_limit_exceeded() {
    let report = judge_c_source(SLEEPER).await;
    assert_eq!(report.verdict, Verdict::IdlenessLimitExceeded);
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn memory_hog_is_memory_limit_exceeded() {
    let report = judge_c_source(MEMORY_HOG).await;
    assert_eq!(report.verdict, Verdict::MemoryLimitExceeded);
    assert!(report.max_memory_kb > 64 * 1024);
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn crash_is_runtime_error_with_signal_name() {
    let report = judge_c_source(CRASHER).await;
    assert_eq!(report.verdict, Verdict::RuntimeError);
    let message = report.cases[0].outcome.message.as_deref().unwrap_or("");
    assert!(message.starts_with("SIG"), "message was {:?}", message);
}

#[tokio::test]
#[ignore = "requires a C toolchain"]
async fn syntax_error_is_compile_error_with_diagnostic() {
    let report = judge_c_source(SYNTAX_ERROR).await;
    assert_eq!(report.verdict, Verdict::CompileError);
    let diagnostic = report.message.unwrap();
    assert!(!diagnostic.is_empty());
    assert!(diagnostic.contains("error"));
}

// --- checker convention ---------------------------------------------------

/// Awards 85 points through exit code 7 and a leading score token.
const POINT_CHECKER: &str = r#"
#include <stdio.h>
int main(int argc, char **argv) {
    if (argc >= 5) {
        FILE *result = fopen(argv[4], "w");
        if (result) { fprintf(result, "85 points\n"); fclose(result); }
    }
    return 7;
}
"#;

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn checker_exit_seven_yields_point_verdict() {
    let (_dir, config) = setup();
    let table = LanguageTable::embedded();
    let submission = Artifact::new(config.clone(), table, "c", APLUSB_OK).unwrap();
    let mut checker = TrustedProgram::new(
        Role::Checker,
        Artifact::new(config.clone(), table, "c", POINT_CHECKER).unwrap(),
    );
    checker.compile(config.compile_time_limit_ms).await.unwrap();

    let cases = vec![SessionCase::ungrouped(aplusb_case(&config))];
    let report = JudgeSession::new(
        config,
        submission,
        Checker::Program(checker),
        cases,
        limits(),
    )
    .run()
    .await;

    assert_eq!(report.verdict, Verdict::Point);
    assert_eq!(report.cases[0].outcome.point, Some(85.0));
    assert_eq!(report.score, Some(85.0));
}

// --- interactive protocol -------------------------------------------------

/// Sends the number from the input file, expects its double back, records
/// the reply as the submission's effective output.
const DOUBLING_INTERACTOR: &str = r#"
#include <stdio.h>
int main(int argc, char **argv) {
    FILE *in = fopen(argv[1], "r");
    FILE *out = fopen(argv[2], "w");
    int n, reply;
    fscanf(in, "%d", &n);
    printf("%d\n", n);
    fflush(stdout);
    if (scanf("%d", &reply) != 1) return 1;
    fprintf(out, "%d\n", reply);
    fclose(out);
    return reply == 2 * n ? 0 : 1;
}
"#;

const DOUBLER: &str = r#"
#include <stdio.h>
int main(void) {
    int n;
    scanf("%d", &n);
    printf("%d\n", 2 * n);
    fflush(stdout);
    return 0;
}
"#;

const EARLY_QUITTER: &str = r#"
int main(void) { return 7; }
"#;

async fn judge_interactive(submission_source: &str) -> gavel::session::SessionReport {
    let (_dir, config) = setup();
    let table = LanguageTable::embedded();
    let submission = Artifact::new(config.clone(), table, "c", submission_source).unwrap();
    let mut interactor = TrustedProgram::new(
        Role::Interactor,
        Artifact::new(config.clone(), table, "c", DOUBLING_INTERACTOR).unwrap(),
    );
    interactor
        .compile(config.compile_time_limit_ms)
        .await
        .unwrap();

    let case = Case::new(&config, Fingerprint::of_bytes(b"interactive-1"));
    case.write_input(b"21\n").unwrap();
    case.write_answer(b"42\n").unwrap();

    JudgeSession::new(
        config,
        submission,
        Checker::Tokens,
        vec![SessionCase::ungrouped(case)],
        limits(),
    )
    .with_interactor(interactor)
    .run()
    .await
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn interactive_doubler_is_accepted() {
    let report = judge_interactive(DOUBLER).await;
    assert_eq!(report.verdict, Verdict::Accepted);
}

#[tokio::test]
#[ignore = "requires root and a C toolchain"]
async fn crashed_submission_beats_the_interactor_verdict() {
    // The submission quits before talking; whatever the interactor says,
    // the failure is the submission's.
    let report = judge_interactive(EARLY_QUITTER).await;
    assert_eq!(report.verdict, Verdict::RuntimeError);
}
