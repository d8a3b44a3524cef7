//! Assertion engine
//!
//! One [`Assert`] instance exists per test execution; it is handed to the
//! test body and its aggregate pass/fail becomes the test's result. Checks
//! are looked up by name in an extensible registry, so new assertion types
//! can be added without touching the engine core.

mod builtins;

pub use builtins::deep_equal;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Registering a check under a name that is already taken.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("'{0}' assertion type already exists")]
pub struct DuplicateCheck(pub String);

/// Label on one half of an assertion's diagnostic info.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoLabel {
    Expected,
    Received,
}

/// One diagnostic pair attached to a failing assertion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoEntry {
    pub label: InfoLabel,
    pub value: Value,
}

/// The outcome of a single check performed during a test body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assertion {
    pub pass: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<InfoEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Assertion {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            pass: true,
            message: message.into(),
            info: Vec::new(),
            stack: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            message: message.into(),
            info: Vec::new(),
            stack: None,
        }
    }

    pub fn with_info(mut self, info: Vec<InfoEntry>) -> Self {
        self.info = info;
        self
    }
}

struct ExpectedCount {
    count: usize,
    stack: Option<String>,
}

struct AssertState {
    assertions: Vec<Assertion>,
    pass: bool,
    steps: Vec<String>,
    expected: Option<ExpectedCount>,
}

impl AssertState {
    fn new() -> Self {
        Self {
            assertions: Vec::new(),
            pass: true,
            steps: Vec::new(),
            expected: None,
        }
    }
}

/// Context handed to a check function.
pub struct CheckCtx<'a> {
    /// Whether the check was reached through a negated view.
    pub negated: bool,
    state: &'a mut AssertState,
}

impl CheckCtx<'_> {
    /// Fold the negation flag into a raw boolean outcome.
    pub fn apply(&self, raw: bool) -> bool {
        if self.negated {
            !raw
        } else {
            raw
        }
    }

    /// "not " when negated, used to phrase messages.
    pub fn not_prefix(&self) -> &'static str {
        if self.negated {
            "not "
        } else {
            ""
        }
    }

    pub fn expected(&self, value: impl Into<Value>) -> InfoEntry {
        InfoEntry {
            label: InfoLabel::Expected,
            value: value.into(),
        }
    }

    pub fn received(&self, value: impl Into<Value>) -> InfoEntry {
        InfoEntry {
            label: InfoLabel::Received,
            value: value.into(),
        }
    }

    /// Record an ordered step tag for later verification.
    pub fn push_step(&mut self, step: String) {
        self.state.steps.push(step);
    }

    /// Take and clear the recorded step tags.
    pub fn take_steps(&mut self) -> Vec<String> {
        std::mem::take(&mut self.state.steps)
    }
}

/// A named check: inspects its arguments and produces one [`Assertion`].
pub type CheckFn = Arc<dyn Fn(&mut CheckCtx<'_>, &[Value]) -> Assertion + Send + Sync>;

/// Registry of named checks: the built-in set plus everything added
/// through [`AssertRegistry::extend`].
pub struct AssertRegistry {
    checks: RwLock<HashMap<String, CheckFn>>,
}

impl AssertRegistry {
    /// A registry pre-populated with the built-in checks.
    pub fn with_builtins() -> Arc<Self> {
        let registry = Self {
            checks: RwLock::new(HashMap::new()),
        };
        builtins::register(&registry);
        Arc::new(registry)
    }

    /// Register a new check. Fails if the name is already taken, built-ins
    /// included.
    pub fn extend<F>(&self, name: impl Into<String>, check: F) -> Result<(), DuplicateCheck>
    where
        F: Fn(&mut CheckCtx<'_>, &[Value]) -> Assertion + Send + Sync + 'static,
    {
        let name = name.into();
        let mut checks = self.checks.write().unwrap();
        if checks.contains_key(&name) {
            return Err(DuplicateCheck(name));
        }
        checks.insert(name, Arc::new(check));
        Ok(())
    }

    fn register<F>(&self, name: &str, check: F)
    where
        F: Fn(&mut CheckCtx<'_>, &[Value]) -> Assertion + Send + Sync + 'static,
    {
        self.checks
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::new(check));
    }

    fn get(&self, name: &str) -> Option<CheckFn> {
        self.checks.read().unwrap().get(name).cloned()
    }
}

impl std::fmt::Debug for AssertRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.checks.read().unwrap().keys().cloned().collect();
        names.sort();
        f.debug_struct("AssertRegistry").field("checks", &names).finish()
    }
}

/// Per-test assertion recorder.
///
/// Cheap to clone: clones share the same backing state, so the negated view
/// returned by [`Assert::not`] records into the same test result.
#[derive(Clone)]
pub struct Assert {
    state: Arc<Mutex<AssertState>>,
    registry: Arc<AssertRegistry>,
    negated: bool,
}

impl Assert {
    pub fn new(registry: Arc<AssertRegistry>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AssertState::new())),
            registry,
            negated: false,
        }
    }

    /// A standalone instance with the built-in checks, for direct use
    /// outside a runner.
    pub fn standalone() -> Self {
        Self::new(AssertRegistry::with_builtins())
    }

    /// A view over the same state with the negation flag flipped.
    pub fn not(&self) -> Assert {
        Assert {
            state: self.state.clone(),
            registry: self.registry.clone(),
            negated: !self.negated,
        }
    }

    /// Run a registered check by name. An unknown name records a failing
    /// assertion rather than aborting the test body.
    pub fn check(&self, name: &str, args: &[Value]) {
        let Some(check) = self.registry.get(name) else {
            self.record(Assertion::fail(format!("unknown assertion '{name}'")));
            return;
        };
        let mut state = self.state.lock().unwrap();
        let mut ctx = CheckCtx {
            negated: self.negated,
            state: &mut state,
        };
        let assertion = check(&mut ctx, args);
        Self::push(&mut state, assertion);
    }

    /// Record a completed assertion. Failing records get a captured
    /// backtrace for diagnostic display.
    pub fn record(&self, assertion: Assertion) {
        let mut state = self.state.lock().unwrap();
        Self::push(&mut state, assertion);
    }

    fn push(state: &mut AssertState, mut assertion: Assertion) {
        if !assertion.pass && assertion.stack.is_none() {
            assertion.stack = capture_stack();
        }
        state.pass = state.pass && assertion.pass;
        state.assertions.push(assertion);
    }

    /// Require exactly `n` assertions by the time the test body settles.
    /// Catches accidentally-skipped asynchronous assertions.
    pub fn expect(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.expected = Some(ExpectedCount {
            count: n,
            stack: capture_stack(),
        });
    }

    pub fn equal(&self, value: impl Into<Value>, expected: impl Into<Value>) {
        self.check("equal", &[value.into(), expected.into()]);
    }

    pub fn deep_equal(&self, value: impl Into<Value>, expected: impl Into<Value>) {
        self.check("deep_equal", &[value.into(), expected.into()]);
    }

    pub fn ok(&self, value: impl Into<Value>) {
        self.check("ok", &[value.into()]);
    }

    pub fn step(&self, step: &str) {
        self.check("step", &[Value::String(step.to_string())]);
    }

    pub fn verify_steps(&self, expected: &[&str]) {
        let list = Value::Array(
            expected
                .iter()
                .map(|s| Value::String(s.to_string()))
                .collect(),
        );
        self.check("verify_steps", &[list]);
    }

    /// Expect `result` to be an error (or, through [`Assert::not`], forbid
    /// one).
    pub fn throws<T, E: Display>(&self, result: Result<T, E>) {
        self.throws_inner(result, None);
    }

    /// Expect an error whose display form contains `pattern`.
    pub fn throws_matching<T, E: Display>(&self, result: Result<T, E>, pattern: &str) {
        self.throws_inner(result, Some(pattern));
    }

    fn throws_inner<T, E: Display>(&self, result: Result<T, E>, pattern: Option<&str>) {
        let should_err = !self.negated;
        let assertion = match result {
            Err(e) => {
                if !should_err {
                    Assertion::fail("expected operation not to fail").with_info(vec![InfoEntry {
                        label: InfoLabel::Received,
                        value: Value::String(e.to_string()),
                    }])
                } else {
                    let message = e.to_string();
                    match pattern {
                        Some(p) if !message.contains(p) => {
                            Assertion::fail("operation failed, but the error did not match")
                                .with_info(vec![
                                    InfoEntry {
                                        label: InfoLabel::Expected,
                                        value: Value::String(p.to_string()),
                                    },
                                    InfoEntry {
                                        label: InfoLabel::Received,
                                        value: Value::String(message),
                                    },
                                ])
                        }
                        _ => Assertion::pass("operation failed as expected"),
                    }
                }
            }
            Ok(_) => {
                if should_err {
                    Assertion::fail("expected operation to fail")
                } else {
                    Assertion::pass("operation did not fail")
                }
            }
        };
        self.record(assertion);
    }

    /// Evaluate the registered count expectation, if any. Called once the
    /// test body has settled.
    pub(crate) fn finalize(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(expected) = state.expected.take() {
            let actual = state.assertions.len();
            if actual != expected.count {
                state.pass = false;
                state.assertions.push(Assertion {
                    pass: false,
                    message: format!(
                        "Expected {} assertions, but {} were run",
                        expected.count, actual
                    ),
                    info: Vec::new(),
                    stack: expected.stack,
                });
            }
        }
    }

    /// Force the aggregate to failing (timeout / body error path).
    pub(crate) fn fail(&self) {
        self.state.lock().unwrap().pass = false;
    }

    /// Snapshot the aggregate outcome and the recorded assertions. Writes
    /// made after this point (e.g. by a timed-out body still running in the
    /// background) are discarded.
    pub(crate) fn snapshot(&self) -> (bool, Vec<Assertion>) {
        let state = self.state.lock().unwrap();
        (state.pass, state.assertions.clone())
    }
}

impl std::fmt::Debug for Assert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Assert")
            .field("pass", &state.pass)
            .field("assertions", &state.assertions.len())
            .field("negated", &self.negated)
            .finish()
    }
}

fn capture_stack() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}
