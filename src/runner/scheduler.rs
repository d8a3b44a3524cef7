//! Test runner
//!
//! Owns the job forest, the active filter sets and the execution loop: an
//! iterative, interruptible walk that interleaves tree construction with
//! execution, races every test against the configured timeout, and keeps
//! cancellation cooperative: checked once per job boundary, never
//! preemptive.

use anyhow::{Context, Result};
use futures::FutureExt;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::assert::{Assert, AssertRegistry, Assertion, CheckCtx, DuplicateCheck};
use crate::bus::{Bus, Event, EventKind};
use crate::config::Config;
use crate::hooks::{hook_fn, run_cleanups, run_hooks, HookFn, Hooks};
use crate::model::{Arena, JobId, TestBody, TestError};

use super::filter::{Filter, FilterSet};
use super::queue::{BodyFn, BodyQueue};

/// Registration-time misuse. Immediate, synchronous, surfaced to the caller
/// of the registration API, never swallowed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("cannot add a suite after starting the test runner")]
    SuiteAfterStart,
    #[error("cannot add a test after starting the test runner")]
    TestAfterStart,
    #[error("cannot change configuration after starting the test runner")]
    ConfigAfterStart,
    #[error("the runner is set up to refuse standalone tests; add a surrounding suite")]
    StandaloneTest,
    #[error("\"before_suite\" can only be called inside a suite definition")]
    BeforeSuiteOutsideSuite,
    #[error("\"after_suite\" can only be called while a suite is running")]
    AfterSuiteOutsideRun,
}

/// Lifecycle of the runner. One-way: ready, running, done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RunStatus {
    Ready = 0,
    Running = 1,
    Done = 2,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunStatus::Ready,
            1 => RunStatus::Running,
            _ => RunStatus::Done,
        }
    }
}

/// Options for suite registration.
#[derive(Clone, Debug, Default)]
pub struct SuiteOptions {
    pub only: bool,
    pub skip: bool,
    pub tags: Vec<String>,
}

impl SuiteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_only(mut self) -> Self {
        self.only = true;
        self
    }

    pub fn with_skip(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Options for test registration.
#[derive(Clone, Debug, Default)]
pub struct TestOptions {
    pub only: bool,
    pub skip: bool,
    pub debug: bool,
    pub tags: Vec<String>,
}

impl TestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_only(mut self) -> Self {
        self.only = true;
        self
    }

    pub fn with_skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Focused debugging: implies `only` and suppresses after-test
    /// reporting for the whole run.
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self.only = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Read-only counters exposed to reporting surfaces.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RunnerStats {
    pub suites: usize,
    pub tests: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Registration and traversal state behind one lock. The lock is only ever
/// held for short synchronous sections, never across an await.
struct RunnerState {
    arena: Arena,
    roots: Vec<JobId>,
    suite_stack: Vec<JobId>,
    queue: BodyQueue,
    filters: FilterSet,
    hooks: Hooks,
    debug: bool,
    tags: BTreeSet<String>,
    stats: RunnerStats,
}

struct RunnerInner {
    state: Mutex<RunnerState>,
    bus: Mutex<Bus>,
    config: Mutex<Config>,
    status: AtomicU8,
    registry: Arc<AssertRegistry>,
}

/// "next child index" for one open suite during the walk.
struct Cursor {
    suite: JobId,
    next_child: usize,
}

/// The scheduler.
///
/// Cheap to clone; clones share state, which is what lets a suite body
/// register jobs into the runner that invoked it and lets bus listeners
/// stop a run from the middle of it.
#[derive(Clone)]
pub struct TestRunner {
    inner: Arc<RunnerInner>,
}

impl TestRunner {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                state: Mutex::new(RunnerState {
                    arena: Arena::new(),
                    roots: Vec::new(),
                    suite_stack: Vec::new(),
                    queue: BodyQueue::default(),
                    filters: FilterSet::default(),
                    hooks: Hooks::default(),
                    debug: false,
                    tags: BTreeSet::new(),
                    stats: RunnerStats::default(),
                }),
                bus: Mutex::new(Bus::new()),
                config: Mutex::new(config),
                status: AtomicU8::new(RunStatus::Ready as u8),
                registry: AssertRegistry::with_builtins(),
            }),
        }
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.inner.status.load(Ordering::SeqCst))
    }

    pub fn config(&self) -> Config {
        self.inner.config.lock().unwrap().clone()
    }

    /// Replace the configuration. Only valid before the run starts.
    pub fn set_config(&self, config: Config) -> Result<(), RunnerError> {
        if self.status() != RunStatus::Ready {
            return Err(RunnerError::ConfigAfterStart);
        }
        *self.inner.config.lock().unwrap() = config;
        Ok(())
    }

    /// Subscribe to one lifecycle event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.lock().unwrap().on(kind, listener);
    }

    fn emit(&self, event: Event) {
        let listeners = self.inner.bus.lock().unwrap().listeners(event.kind());
        for listener in listeners {
            listener(&event);
        }
    }

    /// Feed one host-supplied filter input into the active sets.
    pub fn add_filter(&self, filter: Filter) {
        self.inner.state.lock().unwrap().filters.add(filter);
    }

    pub fn has_filter(&self) -> bool {
        self.inner.state.lock().unwrap().filters.has_filter
    }

    pub fn stats(&self) -> RunnerStats {
        self.inner.state.lock().unwrap().stats
    }

    /// Every tag seen on a registered job, sorted.
    pub fn known_tags(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().tags.iter().cloned().collect()
    }

    /// Hashes of executed tests that failed, for "rerun failed".
    pub fn failed_hashes(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().arena.failed_hashes()
    }

    /// Register a new assertion check, available to every test in this
    /// runner as `assert.check(name, args)`.
    pub fn extend_assert<F>(&self, name: impl Into<String>, check: F) -> Result<(), DuplicateCheck>
    where
        F: Fn(&mut CheckCtx<'_>, &[serde_json::Value]) -> Assertion + Send + Sync + 'static,
    {
        self.inner.registry.extend(name, check)
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    /// Declare a suite. The body is queued and runs under the body queue,
    /// one body at a time, so nested registrations always land on the suite
    /// that is open while the body executes.
    pub fn suite<F, Fut>(&self, description: &str, body: F) -> Result<(), RunnerError>
    where
        F: FnOnce(TestRunner) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.suite_with(description, SuiteOptions::default(), body)
    }

    pub fn suite_with<F, Fut>(
        &self,
        description: &str,
        options: SuiteOptions,
        body: F,
    ) -> Result<(), RunnerError>
    where
        F: FnOnce(TestRunner) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_suite(description, options, Box::new(move |runner| body(runner).boxed()))
    }

    /// Nested shorthand: declare a chain of suites in one call. The options
    /// apply to the innermost suite.
    pub fn suite_path<F, Fut>(
        &self,
        path: &[&str],
        options: SuiteOptions,
        body: F,
    ) -> Result<(), RunnerError>
    where
        F: FnOnce(TestRunner) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let Some((first, rest)) = path.split_first() else {
            return Ok(());
        };
        if rest.is_empty() {
            return self.suite_with(first, options, body);
        }

        let mut wrapped: BodyFn = Box::new(move |runner| body(runner).boxed());
        let mut opts = options;
        for segment in rest.iter().rev() {
            let segment = segment.to_string();
            let inner = wrapped;
            let inner_opts = opts;
            opts = SuiteOptions::default();
            wrapped = Box::new(move |runner: TestRunner| {
                let result = runner.add_suite(&segment, inner_opts, inner);
                async move { result.map_err(Into::into) }.boxed()
            });
        }
        self.add_suite(first, opts, wrapped)
    }

    /// Non-generic registration entry point; the closure sugar above boxes
    /// into this.
    pub fn add_suite(
        &self,
        description: &str,
        options: SuiteOptions,
        body: BodyFn,
    ) -> Result<(), RunnerError> {
        if self.status() != RunStatus::Ready {
            return Err(RunnerError::SuiteAfterStart);
        }

        let mut guard = self.inner.state.lock().unwrap();
        let state = &mut *guard;

        let parent = state.suite_stack.last().copied();
        let id = state.arena.new_suite(parent, description, &options.tags);
        let hash = state.arena.suite(id).hash.clone();
        if options.skip || state.filters.skip_set.contains(&hash) {
            state.arena.suite_mut(id).skip = true;
        }
        if options.only {
            state.filters.only_set.insert(id);
        }
        match parent {
            Some(parent) => state.arena.suite_mut(parent).children.push(id),
            None => state.roots.push(id),
        }
        for tag in &options.tags {
            state.tags.insert(tag.clone());
        }
        state.queue.push(id, body);
        Ok(())
    }

    /// Declare a test in the currently-open suite (or at the root).
    pub fn test<F, Fut>(&self, description: &str, body: F) -> Result<(), RunnerError>
    where
        F: Fn(Assert) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.test_with(description, TestOptions::default(), body)
    }

    pub fn test_with<F, Fut>(
        &self,
        description: &str,
        options: TestOptions,
        body: F,
    ) -> Result<(), RunnerError>
    where
        F: Fn(Assert) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_test(description, options, Arc::new(move |assert| body(assert).boxed()))
    }

    pub fn add_test(
        &self,
        description: &str,
        options: TestOptions,
        body: TestBody,
    ) -> Result<(), RunnerError> {
        if self.status() != RunStatus::Ready {
            return Err(RunnerError::TestAfterStart);
        }
        let no_standalone = self.inner.config.lock().unwrap().no_standalone_test;

        let info = {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;

            if no_standalone && state.suite_stack.is_empty() {
                return Err(RunnerError::StandaloneTest);
            }

            let parent = state.suite_stack.last().copied();
            let id = state.arena.new_test(parent, description, &options.tags, body);
            let hash = state.arena.test(id).hash.clone();
            if options.skip || state.filters.skip_set.contains(&hash) {
                state.arena.test_mut(id).skip = true;
            }
            if options.only {
                state.filters.only_set.insert(id);
            }
            if options.debug {
                state.debug = true;
            }
            match parent {
                Some(parent) => state.arena.suite_mut(parent).children.push(id),
                None => state.roots.push(id),
            }
            for tag in &options.tags {
                state.tags.insert(tag.clone());
            }
            state.stats.tests += 1;
            state.arena.test(id).info()
        };

        self.emit(Event::TestAdded(info));
        Ok(())
    }

    // -----------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------

    /// Run once when the currently-open suite is entered during execution.
    pub fn before_suite<F, Fut>(&self, hook: F) -> Result<(), RunnerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook = hook_fn(hook);
        let mut guard = self.inner.state.lock().unwrap();
        let state = &mut *guard;
        match state.suite_stack.last().copied() {
            Some(current) => {
                state.arena.suite_mut(current).before_fns.push(hook);
                Ok(())
            }
            None => Err(RunnerError::BeforeSuiteOutsideSuite),
        }
    }

    /// Run ahead of every test in the currently-open suite's subtree, or,
    /// outside any suite, ahead of every test in the run.
    pub fn before_each<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook = hook_fn(hook);
        let mut guard = self.inner.state.lock().unwrap();
        let state = &mut *guard;
        match state.suite_stack.last().copied() {
            Some(current) => state.arena.suite_mut(current).before_each_fns.push(hook),
            None => state.hooks.global_before_each.push(hook),
        }
    }

    /// Run when the innermost executing suite is left, in reverse
    /// registration order. Only valid while a suite is executing.
    pub fn after_suite<F, Fut>(&self, hook: F) -> Result<(), RunnerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let added = self
            .inner
            .state
            .lock()
            .unwrap()
            .hooks
            .add_suite_cleanup(hook_fn(hook));
        if added {
            Ok(())
        } else {
            Err(RunnerError::AfterSuiteOutsideRun)
        }
    }

    /// Run once the current test finalizes, in reverse registration order.
    pub fn after_test<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .state
            .lock()
            .unwrap()
            .hooks
            .add_test_cleanup(hook_fn(hook));
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Stop the run cooperatively: the in-flight job finishes, no further
    /// job starts. Interrupted suites never receive their after events.
    pub fn stop(&self) {
        let previous = self
            .inner
            .status
            .swap(RunStatus::Done as u8, Ordering::SeqCst);
        if RunStatus::from_u8(previous) != RunStatus::Done {
            self.emit(Event::Abort);
        }
    }

    /// Wait for every pending suite body to settle, then filter and walk
    /// the forest. Returns early (without error) if the runner already left
    /// the ready state.
    pub async fn start(&self) -> Result<()> {
        self.drain_queue().await?;

        if self
            .inner
            .status
            .compare_exchange(
                RunStatus::Ready as u8,
                RunStatus::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        let stats = self.stats();
        info!("Starting run: {} tests across {} suites", stats.tests, stats.suites);
        let run_start = Instant::now();
        self.emit(Event::BeforeAll);

        loop {
            let batch = {
                let mut guard = self.inner.state.lock().unwrap();
                let state = &mut *guard;
                if state.roots.is_empty() {
                    break;
                }
                let jobs = std::mem::take(&mut state.roots);
                state.filters.prepare(&mut state.arena, jobs)
            };
            if self.status() != RunStatus::Running {
                break;
            }
            self.walk(batch).await?;
            if self.status() != RunStatus::Running {
                break;
            }
        }

        self.emit(Event::AfterAll);
        self.inner.status.store(RunStatus::Done as u8, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            "Run completed in {}ms - Pass: {}/{} | Failed: {} | Skipped: {}",
            run_start.elapsed().as_millis(),
            stats.done - stats.failed,
            stats.done,
            stats.failed,
            stats.skipped
        );
        Ok(())
    }

    /// Run pending suite bodies one at a time, in declaration order. Bodies
    /// may enqueue further bodies; the loop runs until the forest settles.
    async fn drain_queue(&self) -> Result<()> {
        loop {
            let next = { self.inner.state.lock().unwrap().queue.pop() };
            let Some(queued) = next else {
                break;
            };

            self.inner.state.lock().unwrap().suite_stack.push(queued.suite);
            let result = (queued.body)(self.clone()).await;
            let info = {
                let mut state = self.inner.state.lock().unwrap();
                state.suite_stack.pop();
                state.stats.suites += 1;
                state.arena.suite(queued.suite).info()
            };
            let full_description = info.full_description.clone();
            self.emit(Event::SuiteAdded(info));
            result.with_context(|| format!("suite '{full_description}' definition failed"))?;
        }
        Ok(())
    }

    /// The iterative cursor walk over one filtered batch. An explicit
    /// cursor stack records the next child index per open suite; no
    /// traversal state lives on the nodes, and the run status is consulted
    /// once per job boundary so `stop()` interrupts between any two jobs
    /// without unwinding a call stack.
    async fn walk(&self, mut batch: Vec<JobId>) -> Result<()> {
        let config = self.config();
        if config.random_order {
            batch.shuffle(&mut rand::rng());
        }

        let mut pending: VecDeque<JobId> = batch.into();
        let mut before_each: Vec<HookFn> = {
            self.inner.state.lock().unwrap().hooks.global_before_each.clone()
        };
        let mut cursors: Vec<Cursor> = Vec::new();

        let mut current = pending.pop_front();
        while let Some(id) = current {
            if self.status() != RunStatus::Running {
                break;
            }

            let is_suite = { self.inner.state.lock().unwrap().arena.get(id).is_suite() };
            if is_suite {
                let open = cursors.last().map(|c| c.suite == id).unwrap_or(false);
                if !open {
                    // suite entry
                    let (info, before_fns, each_fns) = {
                        let mut guard = self.inner.state.lock().unwrap();
                        let state = &mut *guard;
                        if config.random_order {
                            state.arena.suite_mut(id).children.shuffle(&mut rand::rng());
                        }
                        state.hooks.push_suite_frame();
                        let suite = state.arena.suite(id);
                        (
                            suite.info(),
                            suite.before_fns.clone(),
                            suite.before_each_fns.clone(),
                        )
                    };
                    self.emit(Event::BeforeSuite(info));
                    self.inner.state.lock().unwrap().suite_stack.push(id);
                    run_hooks(&before_fns, "before_suite").await;
                    before_each.extend(each_fns);
                    cursors.push(Cursor {
                        suite: id,
                        next_child: 0,
                    });
                }

                let children_len =
                    { self.inner.state.lock().unwrap().arena.suite(id).children.len() };
                let cursor = cursors.last_mut().expect("open suite has a cursor");
                if cursor.next_child >= children_len {
                    // suite exit
                    let (info, each_count) = {
                        let mut guard = self.inner.state.lock().unwrap();
                        let state = &mut *guard;
                        state.suite_stack.pop();
                        let suite = state.arena.suite(id);
                        (suite.info(), suite.before_each_fns.len())
                    };
                    for _ in 0..each_count {
                        before_each.pop();
                    }
                    self.emit(Event::AfterSuite(info));
                    let cleanups = { self.inner.state.lock().unwrap().hooks.pop_suite_frame() };
                    run_cleanups(cleanups, "after_suite").await;
                    cursors.pop();
                    let parent = { self.inner.state.lock().unwrap().arena.get(id).parent() };
                    current = parent.or_else(|| pending.pop_front());
                } else {
                    let child = {
                        self.inner.state.lock().unwrap().arena.suite(id).children[cursor.next_child]
                    };
                    cursor.next_child += 1;
                    current = Some(child);
                }
            } else {
                self.run_test(id, &before_each, &config).await?;
                let parent = { self.inner.state.lock().unwrap().arena.get(id).parent() };
                current = parent.or_else(|| pending.pop_front());
            }
        }
        Ok(())
    }

    /// Execute one test under the timeout policy and finalize its result.
    async fn run_test(&self, id: JobId, before_each: &[HookFn], config: &Config) -> Result<()> {
        let (info, skip, body) = {
            let state = self.inner.state.lock().unwrap();
            let test = state.arena.test(id);
            (test.info(), test.skip, test.body.clone())
        };

        if skip {
            self.inner.state.lock().unwrap().stats.skipped += 1;
            self.emit(Event::SkippedTest(info));
            return Ok(());
        }

        self.emit(Event::BeforeTest(info.clone()));

        let assert = Assert::new(self.inner.registry.clone());
        run_hooks(before_each, "before_each").await;

        debug!("Running {}", info.full_description);
        let start = Instant::now();
        let mut error: Option<TestError> = None;

        if config.notrycatch {
            body(assert.clone())
                .await
                .with_context(|| format!("test '{}' failed", info.full_description))?;
        } else {
            let handle = tokio::spawn(body(assert.clone()));
            match tokio::time::timeout(Duration::from_millis(config.timeout), handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error = Some(TestError::Failed(format!("{e:#}"))),
                Ok(Err(join_error)) => {
                    let reason = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "test task was cancelled".to_string()
                    };
                    error = Some(TestError::Panicked(reason));
                }
                Err(_) => {
                    // dropping the handle detaches the task: the body keeps
                    // running, and everything it records from here on is
                    // dropped by the snapshot below
                    error = Some(TestError::Timeout(config.timeout));
                }
            }
        }

        if error.is_some() {
            assert.fail();
        }
        assert.finalize();
        let (pass, assertions) = assert.snapshot();
        let duration = start.elapsed().as_millis() as u64;

        let (record, debug_mode) = {
            let mut guard = self.inner.state.lock().unwrap();
            let state = &mut *guard;
            let debug_mode = state.debug;
            let node = state.arena.test_mut(id);
            node.pass = pass;
            node.assertions = assertions;
            node.duration_ms = Some(duration);
            node.error = error;
            (node.record(), debug_mode)
        };

        if !debug_mode {
            {
                let mut state = self.inner.state.lock().unwrap();
                state.stats.done += 1;
                if !pass {
                    state.stats.failed += 1;
                }
            }
            self.emit(Event::AfterTest(record));
            let cleanups = { self.inner.state.lock().unwrap().hooks.take_test_cleanups() };
            run_cleanups(cleanups, "after_test").await;
            if config.fail_fast && !pass {
                self.stop();
            }
        }

        Ok(())
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("status", &self.status())
            .field("stats", &self.stats())
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TestRecord, TestStatus};
    use crate::utils::generate_hash;
    use std::sync::atomic::AtomicBool;

    fn record_events(runner: &TestRunner) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let kinds = [
            EventKind::TestAdded,
            EventKind::SuiteAdded,
            EventKind::BeforeAll,
            EventKind::AfterAll,
            EventKind::BeforeSuite,
            EventKind::AfterSuite,
            EventKind::BeforeTest,
            EventKind::AfterTest,
            EventKind::SkippedTest,
            EventKind::Abort,
        ];
        for kind in kinds {
            let log = events.clone();
            runner.on(kind, move |event| {
                let label = match event {
                    Event::TestAdded(i) => format!("test-added:{}", i.description),
                    Event::SuiteAdded(i) => format!("suite-added:{}", i.description),
                    Event::BeforeAll => "before-all".to_string(),
                    Event::AfterAll => "after-all".to_string(),
                    Event::BeforeSuite(i) => format!("before-suite:{}", i.description),
                    Event::AfterSuite(i) => format!("after-suite:{}", i.description),
                    Event::BeforeTest(i) => format!("before-test:{}", i.description),
                    Event::AfterTest(r) => {
                        format!("after-test:{}:{}", r.info.description, r.status)
                    }
                    Event::SkippedTest(i) => format!("skipped-test:{}", i.description),
                    Event::Abort => "abort".to_string(),
                };
                log.lock().unwrap().push(label);
            });
        }
        events
    }

    fn record_results(runner: &TestRunner) -> Arc<Mutex<Vec<TestRecord>>> {
        let records = Arc::new(Mutex::new(Vec::new()));
        let log = records.clone();
        runner.on(EventKind::AfterTest, move |event| {
            if let Event::AfterTest(record) = event {
                log.lock().unwrap().push(record.clone());
            }
        });
        records
    }

    fn strings(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_single_suite_single_test_sequence() {
        let runner = TestRunner::default();
        let events = record_events(&runner);
        let records = record_results(&runner);

        runner
            .suite("math", |r| async move {
                r.test("add", |assert| async move {
                    assert.equal(1 + 1, 2);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            strings(&[
                "test-added:add",
                "suite-added:math",
                "before-all",
                "before-suite:math",
                "before-test:add",
                "after-test:add:PASS",
                "after-suite:math",
                "after-all",
            ])
        );

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TestStatus::Pass);
        assert_eq!(records[0].assertions.len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_test_never_runs_body() {
        let runner = TestRunner::default();
        let events = record_events(&runner);
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        runner
            .test_with("x", TestOptions::new().with_skip(), move |_assert| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        runner.start().await.unwrap();

        assert!(!ran.load(Ordering::SeqCst));
        let events = events.lock().unwrap();
        assert!(events.contains(&"skipped-test:x".to_string()));
        assert!(!events.iter().any(|e| e.starts_with("before-test")));
        assert!(!events.iter().any(|e| e.starts_with("after-test")));
        assert_eq!(runner.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_stop_from_listener_halts_after_second_test() {
        let runner = TestRunner::default();

        let seen = Arc::new(Mutex::new(0));
        {
            let handle = runner.clone();
            let seen = seen.clone();
            runner.on(EventKind::BeforeTest, move |_| {
                let mut n = seen.lock().unwrap();
                *n += 1;
                if *n == 2 {
                    handle.stop();
                }
            });
        }
        let records = record_results(&runner);

        for name in ["a", "b", "c"] {
            runner
                .test(name, |assert| async move {
                    assert.ok(true);
                    Ok(())
                })
                .unwrap();
        }

        runner.start().await.unwrap();

        // the in-flight second test runs to completion; the third never starts
        assert_eq!(records.lock().unwrap().len(), 2);
        assert_eq!(runner.status(), RunStatus::Done);
    }

    #[tokio::test]
    async fn test_timeout_marks_failure_and_run_continues() {
        let mut config = Config::default();
        config.timeout = 50;
        let runner = TestRunner::new(config);
        let records = record_results(&runner);

        runner
            .test("stuck", |_assert| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap();
        runner
            .test("quick", |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, TestStatus::Fail);
        assert!(matches!(records[0].error, Some(TestError::Timeout(50))));
        assert_eq!(records[1].status, TestStatus::Pass);
    }

    #[tokio::test]
    async fn test_panicking_body_is_contained() {
        let runner = TestRunner::default();
        let records = record_results(&runner);

        runner
            .test("explodes", |_assert| async move { panic!("boom") })
            .unwrap();
        runner
            .test("survivor", |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[0].error,
            Some(TestError::Panicked(msg)) if msg.contains("boom")
        ));
        assert_eq!(records[1].status, TestStatus::Pass);
    }

    #[tokio::test]
    async fn test_only_dominates_tag_filter() {
        let runner = TestRunner::default();
        let records = record_results(&runner);

        runner
            .suite_with("net", SuiteOptions::new().with_tag("net"), |r| async move {
                r.test("n1", |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        runner
            .test_with("focus", TestOptions::new().with_only(), |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();
        runner.add_filter(Filter::tag("net"));

        runner.start().await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].info.description, "focus");
    }

    #[tokio::test]
    async fn test_hash_filter_selects_single_test() {
        let runner = TestRunner::default();
        let records = record_results(&runner);

        for name in ["first", "second"] {
            runner
                .test(name, |assert| async move {
                    assert.ok(true);
                    Ok(())
                })
                .unwrap();
        }
        runner.add_filter(Filter::hash(generate_hash(&["second".to_string()])));

        runner.start().await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].info.description, "second");
    }

    #[tokio::test]
    async fn test_hook_ordering_across_nested_suites() {
        let runner = TestRunner::default();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        fn note(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> impl Fn() -> futures::future::BoxFuture<'static, Result<()>> {
            let log = log.clone();
            move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(label.to_string());
                    Ok(())
                }
                .boxed()
            }
        }

        let outer_log = log.clone();
        runner
            .suite("outer", move |r| {
                let log = outer_log;
                async move {
                    r.before_suite(note(&log, "before-outer"))?;
                    r.before_each(note(&log, "each-outer"));

                    {
                        let log = log.clone();
                        let handle = r.clone();
                        r.test("t1", move |_assert| {
                            let log = log.clone();
                            let handle = handle.clone();
                            async move {
                                log.lock().unwrap().push("t1".to_string());
                                handle.after_test(note(&log, "cleanup-t1"));
                                handle.after_suite(note(&log, "cleanup-outer"))?;
                                Ok(())
                            }
                        })?;
                    }

                    let inner_log = log.clone();
                    r.suite("inner", move |r| {
                        let log = inner_log;
                        async move {
                            r.before_each(note(&log, "each-inner"));
                            let log2 = log.clone();
                            r.test("t2", move |_assert| {
                                let log2 = log2.clone();
                                async move {
                                    log2.lock().unwrap().push("t2".to_string());
                                    Ok(())
                                }
                            })?;
                            Ok(())
                        }
                    })?;
                    Ok(())
                }
            })
            .unwrap();

        runner.start().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            strings(&[
                "before-outer",
                "each-outer",
                "t1",
                "cleanup-t1",
                "each-outer",
                "each-inner",
                "t2",
                "cleanup-outer",
            ])
        );
    }

    #[tokio::test]
    async fn test_registration_rejected_after_start() {
        let runner = TestRunner::default();
        runner.start().await.unwrap();

        let err = runner
            .test("late", |_assert| async move { Ok(()) })
            .unwrap_err();
        assert_eq!(err, RunnerError::TestAfterStart);

        let err = runner
            .suite("late suite", |_r| async move { Ok(()) })
            .unwrap_err();
        assert_eq!(err, RunnerError::SuiteAfterStart);
    }

    #[tokio::test]
    async fn test_hook_and_config_misuse_is_rejected() {
        let runner = TestRunner::default();

        let err = runner.before_suite(|| async { Ok(()) }).unwrap_err();
        assert_eq!(err, RunnerError::BeforeSuiteOutsideSuite);

        let err = runner.after_suite(|| async { Ok(()) }).unwrap_err();
        assert_eq!(err, RunnerError::AfterSuiteOutsideRun);

        runner.start().await.unwrap();
        let err = runner.set_config(Config::default()).unwrap_err();
        assert_eq!(err, RunnerError::ConfigAfterStart);
    }

    #[tokio::test]
    async fn test_standalone_tests_can_be_refused() {
        let mut config = Config::default();
        config.no_standalone_test = true;
        let runner = TestRunner::new(config);

        let err = runner
            .test("orphan", |_assert| async move { Ok(()) })
            .unwrap_err();
        assert_eq!(err, RunnerError::StandaloneTest);

        runner
            .suite("home", |r| async move {
                r.test("housed", |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        runner.start().await.unwrap();
        assert_eq!(runner.stats().done, 1);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_after_first_failure() {
        let mut config = Config::default();
        config.fail_fast = true;
        let runner = TestRunner::new(config);
        let events = record_events(&runner);

        runner
            .test("fails", |assert| async move {
                assert.ok(false);
                Ok(())
            })
            .unwrap();
        runner
            .test("never runs", |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let events = events.lock().unwrap();
        let after_tests: Vec<_> = events.iter().filter(|e| e.starts_with("after-test")).collect();
        assert_eq!(after_tests.len(), 1);
        assert!(events.contains(&"abort".to_string()));
        assert_eq!(runner.status(), RunStatus::Done);
    }

    #[tokio::test]
    async fn test_debug_mode_suppresses_after_test_reporting() {
        let runner = TestRunner::default();
        let events = record_events(&runner);

        runner
            .test_with("focused", TestOptions::new().with_debug(), |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();
        runner
            .test("ignored", |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let events = events.lock().unwrap();
        assert!(events.contains(&"before-test:focused".to_string()));
        assert!(!events.iter().any(|e| e.starts_with("after-test")));
        // debug implies only: the unfocused test never starts
        assert!(!events.contains(&"before-test:ignored".to_string()));
        assert_eq!(runner.stats().done, 0);
    }

    #[tokio::test]
    async fn test_async_suite_bodies_keep_declaration_order() {
        let runner = TestRunner::default();
        let records = record_results(&runner);

        runner
            .suite("first", |r| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                r.test("a", |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        runner
            .suite("second", |r| async move {
                r.test("b", |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let order: Vec<String> = records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.info.description.clone())
            .collect();
        assert_eq!(order, strings(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_suite_path_builds_nested_chain() {
        let runner = TestRunner::default();
        let records = record_results(&runner);

        runner
            .suite_path(&["a", "b"], SuiteOptions::new(), |r| async move {
                r.test("t", |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].info.full_description, "a > b > t");
    }

    #[tokio::test]
    async fn test_empty_suite_enters_and_exits() {
        let runner = TestRunner::default();
        let events = record_events(&runner);

        runner.suite("hollow", |_r| async move { Ok(()) }).unwrap();
        runner.start().await.unwrap();

        let events = events.lock().unwrap();
        assert!(events.contains(&"before-suite:hollow".to_string()));
        assert!(events.contains(&"after-suite:hollow".to_string()));
    }

    #[tokio::test]
    async fn test_suite_body_error_aborts_start() {
        let runner = TestRunner::default();
        runner
            .suite("broken", |_r| async move { anyhow::bail!("fixture failed") })
            .unwrap();

        let err = runner.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }

    #[tokio::test]
    async fn test_notrycatch_propagates_body_error() {
        let mut config = Config::default();
        config.notrycatch = true;
        let runner = TestRunner::new(config);

        runner
            .test("raw", |_assert| async move { anyhow::bail!("no containment") })
            .unwrap();

        let err = runner.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("raw"));
    }

    #[tokio::test]
    async fn test_failed_hashes_after_run() {
        let runner = TestRunner::default();

        runner
            .test("good", |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();
        runner
            .test("bad", |assert| async move {
                assert.ok(false);
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let failed = runner.failed_hashes();
        assert_eq!(failed, vec![generate_hash(&["bad".to_string()])]);
    }

    #[tokio::test]
    async fn test_skip_by_hash_filter() {
        let runner = TestRunner::default();
        let events = record_events(&runner);

        runner.add_filter(Filter::skip(generate_hash(&["flaky".to_string()])));
        runner
            .test("flaky", |assert| async move {
                assert.ok(true);
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        assert!(events.lock().unwrap().contains(&"skipped-test:flaky".to_string()));
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let runner = TestRunner::default();

        runner
            .suite("s", |r| async move {
                r.test("pass", |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                r.test("fail", |assert| async move {
                    assert.ok(false);
                    Ok(())
                })?;
                r.test_with("skipped", TestOptions::new().with_skip(), |assert| async move {
                    assert.ok(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        let stats = runner.stats();
        assert_eq!(stats.suites, 1);
        assert_eq!(stats.tests, 3);
        assert_eq!(stats.done, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_custom_assertion_via_runner() {
        let runner = TestRunner::default();
        let records = record_results(&runner);

        runner
            .extend_assert("starts_with", |ctx, args| {
                let value = args.first().and_then(|v| v.as_str()).unwrap_or_default();
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or_default();
                if ctx.apply(value.starts_with(prefix)) {
                    Assertion::pass("value starts with prefix")
                } else {
                    Assertion::fail("expected value to start with prefix")
                }
            })
            .unwrap();

        runner
            .test("uses extension", |assert| async move {
                assert.check(
                    "starts_with",
                    &[serde_json::json!("abcdef"), serde_json::json!("abc")],
                );
                Ok(())
            })
            .unwrap();

        runner.start().await.unwrap();

        assert_eq!(records.lock().unwrap()[0].status, TestStatus::Pass);
    }
}
