//! Hook registries
//!
//! Zero-argument lifecycle callables consulted by the scheduler during
//! traversal. Suite-scoped before hooks live on the suite nodes themselves;
//! this module holds the registries that are not tied to a single node: the
//! global before-each list and the run-time cleanup stacks behind
//! `after_suite` / `after_test`.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

/// A registered lifecycle hook.
pub type HookFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box a closure returning a future into a [`HookFn`].
pub fn hook_fn<F, Fut>(f: F) -> HookFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Hook state owned by the runner.
#[derive(Default)]
pub struct Hooks {
    /// Before-each callables registered outside any suite; they run ahead of
    /// every test in the run.
    pub global_before_each: Vec<HookFn>,
    /// One cleanup frame per currently-executing suite.
    suite_cleanups: Vec<Vec<HookFn>>,
    /// Cleanups drained once the current test finalizes.
    test_cleanups: Vec<HookFn>,
}

impl Hooks {
    /// Open a cleanup frame when a suite is entered.
    pub fn push_suite_frame(&mut self) {
        self.suite_cleanups.push(Vec::new());
    }

    /// Close the innermost frame when its suite is left.
    pub fn pop_suite_frame(&mut self) -> Vec<HookFn> {
        self.suite_cleanups.pop().unwrap_or_default()
    }

    /// Attach a cleanup to the innermost executing suite. Returns false when
    /// no suite is executing.
    pub fn add_suite_cleanup(&mut self, hook: HookFn) -> bool {
        match self.suite_cleanups.last_mut() {
            Some(frame) => {
                frame.push(hook);
                true
            }
            None => false,
        }
    }

    /// Attach a cleanup to the currently-executing test.
    pub fn add_test_cleanup(&mut self, hook: HookFn) {
        self.test_cleanups.push(hook);
    }

    pub fn take_test_cleanups(&mut self) -> Vec<HookFn> {
        std::mem::take(&mut self.test_cleanups)
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("global_before_each", &self.global_before_each.len())
            .field("suite_cleanups", &self.suite_cleanups.len())
            .field("test_cleanups", &self.test_cleanups.len())
            .finish()
    }
}

/// Await each hook in order. Hook errors are logged and swallowed; they
/// never fail the enclosing suite or test.
pub async fn run_hooks(hooks: &[HookFn], scope: &str) {
    for hook in hooks {
        if let Err(e) = hook().await {
            error!("{scope} hook failed: {e:#}");
        }
    }
}

/// Drain cleanups in reverse registration order, logging and swallowing
/// errors.
pub async fn run_cleanups(mut hooks: Vec<HookFn>, scope: &str) {
    while let Some(hook) = hooks.pop() {
        if let Err(e) = hook().await {
            error!("{scope} cleanup failed: {e:#}");
        }
    }
}
