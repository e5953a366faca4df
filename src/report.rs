//! Step results of a suite run
//!
//! Every lifecycle step, hook and test lands in the [`SuiteReport`]. At the end
//! of a run the report prints a summary and folds into a single result.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

use apptest_common::Error;

/// Lifecycle states, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Read the environment and resolve the version under test
    EnvironmentResolution,
    /// Find or describe the target cluster
    ClusterResolution,
    /// Build the app (and bundle) identities
    IdentityResolution,
    /// Create the workload cluster and wait for it
    ClusterReadiness,
    /// `after_cluster_ready` hook
    PreReadinessHook,
    /// Make sure the app is not installed yet
    PreInstallGuard,
    /// Install the latest release ahead of an upgrade
    UpgradePreStage,
    /// Install the version under test
    InstallUnderTest,
    /// User tests
    TestExecution,
    /// Hooks, uninstall and cluster deletion
    Teardown,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::EnvironmentResolution => "environment resolution",
            State::ClusterResolution => "cluster resolution",
            State::IdentityResolution => "identity resolution",
            State::ClusterReadiness => "cluster readiness",
            State::PreReadinessHook => "after cluster ready",
            State::PreInstallGuard => "pre-install guard",
            State::UpgradePreStage => "upgrade pre-stage",
            State::InstallUnderTest => "install",
            State::TestExecution => "tests",
            State::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// How a step ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Completed
    Passed,
    /// Failed with a message
    Failed(String),
    /// Deliberately not run
    Skipped(String),
    /// Completed with a tolerated problem
    Warned(String),
}

impl StepOutcome {
    fn tag(&self) -> &'static str {
        match self {
            StepOutcome::Passed => "PASS",
            StepOutcome::Failed(_) => "FAIL",
            StepOutcome::Skipped(_) => "SKIP",
            StepOutcome::Warned(_) => "WARN",
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            StepOutcome::Passed => None,
            StepOutcome::Failed(m) | StepOutcome::Skipped(m) | StepOutcome::Warned(m) => Some(m),
        }
    }
}

/// One recorded step
#[derive(Clone, Debug)]
pub struct StepRecord {
    /// State the step belongs to
    pub state: State,
    /// Step name
    pub name: String,
    /// How it ended
    pub outcome: StepOutcome,
    /// Time taken
    pub duration: Duration,
}

/// Results of one suite run
#[derive(Debug)]
pub struct SuiteReport {
    suite: String,
    state: State,
    steps: Vec<StepRecord>,
    fatal: Option<(State, Error)>,
    teardown_error: Option<Error>,
}

impl SuiteReport {
    /// Empty report for `suite`
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            state: State::EnvironmentResolution,
            steps: Vec::new(),
            fatal: None,
            teardown_error: None,
        }
    }

    /// Suite name
    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// All recorded steps in order
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Outcome of the first step named `name`
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.outcome)
    }

    /// Error that aborted the run, with the state it happened in
    pub fn fatal_error(&self) -> Option<(State, &Error)> {
        self.fatal.as_ref().map(|(state, e)| (*state, e))
    }

    /// Error of the last failing teardown step
    pub fn teardown_error(&self) -> Option<&Error> {
        self.teardown_error.as_ref()
    }

    /// Names of failed tests
    pub fn failed_tests(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| {
                s.state == State::TestExecution && matches!(s.outcome, StepOutcome::Failed(_))
            })
            .map(|s| s.name.clone())
            .collect()
    }

    /// Whether nothing failed
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.teardown_error.is_none() && self.failed_tests().is_empty()
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn enter(&mut self, state: State) {
        info!(suite = %self.suite, state = %state, "entering state");
        self.state = state;
    }

    pub(crate) fn record(
        &mut self,
        name: impl Into<String>,
        outcome: StepOutcome,
        started: Instant,
    ) {
        self.record_elapsed(name, outcome, started.elapsed());
    }

    /// Record a step that was timed elsewhere
    pub(crate) fn record_elapsed(
        &mut self,
        name: impl Into<String>,
        outcome: StepOutcome,
        duration: Duration,
    ) {
        let name = name.into();
        let state = self.state;
        match &outcome {
            StepOutcome::Passed => info!(state = %state, step = %name, "step passed"),
            StepOutcome::Skipped(reason) => {
                info!(state = %state, step = %name, reason = %reason, "step skipped")
            }
            StepOutcome::Warned(reason) => {
                warn!(state = %state, step = %name, reason = %reason, "step passed with warnings")
            }
            StepOutcome::Failed(message) => {
                error!(state = %state, step = %name, error = %message, "step failed")
            }
        }
        self.steps.push(StepRecord {
            state,
            name,
            outcome,
            duration,
        });
    }

    pub(crate) fn skip(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.record(name, StepOutcome::Skipped(reason.into()), Instant::now());
    }

    /// Run a fallible step and record its outcome
    pub(crate) async fn step<T, Fut>(&mut self, name: &str, fut: Fut) -> Result<T, Error>
    where
        Fut: Future<Output = Result<T, Error>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let outcome = match &result {
            Ok(_) => StepOutcome::Passed,
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        self.record(name, outcome, started);
        result
    }

    /// Run user code, catching panics, and record its outcome
    ///
    /// Returns the failure message when the callback failed or panicked.
    pub(crate) async fn run_callback<Fut>(&mut self, name: &str, fut: Fut) -> Result<(), String>
    where
        Fut: Future<Output = Result<(), String>>,
    {
        let started = Instant::now();
        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(format!("PANIC: {}", panic_message(panic.as_ref()))),
        };
        let outcome = match &result {
            Ok(()) => StepOutcome::Passed,
            Err(e) => StepOutcome::Failed(e.clone()),
        };
        self.record(name, outcome, started);
        result
    }

    pub(crate) fn abort(&mut self, error: Error) {
        error!(suite = %self.suite, state = %self.state, error = %error, "run aborted");
        self.fatal = Some((self.state, error));
    }

    pub(crate) fn teardown_failed(&mut self, error: Error) {
        self.teardown_error = Some(error);
    }

    /// Log the summary table
    pub fn log_summary(&self) {
        let total: Duration = self.steps.iter().map(|s| s.duration).sum();
        let count = |tag: &str| self.steps.iter().filter(|s| s.outcome.tag() == tag).count();

        info!("========================================");
        info!("  {}", self.suite.to_uppercase());
        info!("========================================");
        for s in &self.steps {
            info!("  {}  {:40} {:.1}s", s.outcome.tag(), s.name, s.duration.as_secs_f64());
            if let Some(detail) = s.outcome.detail() {
                info!("        -> {}", truncate(detail, 200));
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed, {} skipped ({:.1}s total)",
            count("PASS") + count("WARN"),
            count("FAIL"),
            count("SKIP"),
            total.as_secs_f64()
        );
        if let Some((state, e)) = &self.fatal {
            info!("  aborted during {state}: {}", truncate(&e.to_string(), 200));
        }
        info!("========================================");
    }

    /// Fold the report into the run's result
    ///
    /// An aborting error wins over failed tests, failed tests over a
    /// teardown failure.
    pub fn into_result(self) -> Result<(), Error> {
        let failed = self.failed_tests();
        if let Some((_, e)) = self.fatal {
            if let Some(teardown) = &self.teardown_error {
                error!(error = %teardown, "teardown also failed");
            }
            return Err(e);
        }
        if !failed.is_empty() {
            return Err(Error::TestsFailed { failed });
        }
        match self.teardown_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_callback_panic_is_captured() {
        let mut report = SuiteReport::new("panics");
        report.enter(State::TestExecution);

        let result = report
            .run_callback("explodes", async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .await;

        assert_eq!(result, Err("PANIC: boom".to_string()));
        assert_eq!(report.failed_tests(), vec!["explodes".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_tests_fold_into_error() {
        let mut report = SuiteReport::new("tests");
        report.enter(State::TestExecution);
        let _ = report.run_callback("ok", async { Ok(()) }).await;
        let _ = report
            .run_callback("bad", async { Err("expected 3 replicas".to_string()) })
            .await;

        assert!(!report.is_success());
        assert_eq!(report.outcome("ok"), Some(&StepOutcome::Passed));
        match report.into_result() {
            Err(Error::TestsFailed { failed }) => assert_eq!(failed, vec!["bad".to_string()]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_wins() {
        let mut report = SuiteReport::new("fatal");
        report.enter(State::PreInstallGuard);
        let _ = report
            .step("ensure app isn't installed", async {
                Err::<(), _>(Error::precondition("already installed"))
            })
            .await
            .map_err(|e| report.abort(e));
        report.teardown_failed(Error::teardown("delete cluster", "timeout"));

        assert_eq!(report.fatal_error().map(|(s, _)| s), Some(State::PreInstallGuard));
        assert!(matches!(report.into_result(), Err(Error::Precondition { .. })));
    }

    #[test]
    fn test_teardown_error_alone_fails_the_run() {
        let mut report = SuiteReport::new("teardown");
        report.teardown_failed(Error::teardown("uninstall app", "forbidden"));
        assert!(matches!(report.into_result(), Err(Error::Teardown { .. })));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("äöü", 2), "äö");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_externally_timed_step_keeps_its_duration() {
        let mut report = SuiteReport::new("timed");
        report.enter(State::ClusterReadiness);
        report.record_elapsed(
            "worker nodes",
            StepOutcome::Warned("timed out".to_string()),
            Duration::from_secs(1200),
        );

        let step = &report.steps()[0];
        assert_eq!(step.duration, Duration::from_secs(1200));
        assert_eq!(step.state, State::ClusterReadiness);
        assert!(report.is_success());
    }

    #[test]
    fn test_skip_is_recorded_in_current_state() {
        let mut report = SuiteReport::new("skip");
        report.enter(State::PreInstallGuard);
        report.skip("ensure app isn't installed", "app is a default app");

        let step = &report.steps()[0];
        assert_eq!(step.state, State::PreInstallGuard);
        assert_eq!(step.outcome, StepOutcome::Skipped("app is a default app".to_string()));
        assert!(report.is_success());
    }
}
