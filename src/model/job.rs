//! Job model
//!
//! Suites and tests produced by registration calls. Nodes live in an arena
//! and are addressed by id; traversal cursors belong to the scheduler, never
//! to the nodes, so a node carries no mutable walk state.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::assert::{Assert, Assertion};
use crate::hooks::HookFn;
use crate::utils::generate_hash;

/// Identifier of a job in the arena. Monotonic and process-unique.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A test body: receives the per-run assertion recorder and settles
/// asynchronously.
pub type TestBody =
    Arc<dyn Fn(Assert) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Why a test was marked failed outside of its recorded assertions.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TestError {
    #[error("test took longer than {0}ms")]
    Timeout(u64),
    #[error("test panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

/// Execution status of a finalized test record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Identity snapshot of a test, carried on the bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestInfo {
    pub description: String,
    pub full_description: String,
    pub path: Vec<String>,
    pub hash: String,
    pub tags: Vec<String>,
}

/// Identity snapshot of a suite, carried on the bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuiteInfo {
    pub description: String,
    pub full_description: String,
    pub path: Vec<String>,
    pub hash: String,
    pub tags: Vec<String>,
    /// Direct children at the time the snapshot was taken.
    pub job_count: usize,
}

/// A finalized (or skipped) test together with its outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRecord {
    pub info: TestInfo,
    pub status: TestStatus,
    pub assertions: Vec<Assertion>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
}

impl TestRecord {
    pub fn skip(info: TestInfo) -> Self {
        Self {
            info,
            status: TestStatus::Skip,
            assertions: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }
}

impl fmt::Display for TestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.info.full_description,
            self.duration_ms
        )?;
        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}

/// A named grouping of jobs with its own hook lists.
pub struct SuiteNode {
    pub id: JobId,
    pub parent: Option<JobId>,
    pub description: String,
    /// Ancestor descriptions plus this suite's own. Immutable.
    pub path: Vec<String>,
    pub full_description: String,
    pub hash: String,
    /// Parent tags unioned with this suite's own, in declaration order.
    pub tags: Vec<String>,
    pub skip: bool,
    /// Child jobs in declaration order.
    pub children: Vec<JobId>,
    /// Run once when the suite is entered.
    pub before_fns: Vec<HookFn>,
    /// Run ahead of every test in this suite's subtree.
    pub before_each_fns: Vec<HookFn>,
}

impl SuiteNode {
    pub fn info(&self) -> SuiteInfo {
        SuiteInfo {
            description: self.description.clone(),
            full_description: self.full_description.clone(),
            path: self.path.clone(),
            hash: self.hash.clone(),
            tags: self.tags.clone(),
            job_count: self.children.len(),
        }
    }
}

/// A leaf job carrying a body and, after execution, a result.
pub struct TestNode {
    pub id: JobId,
    pub parent: Option<JobId>,
    pub description: String,
    pub path: Vec<String>,
    pub full_description: String,
    pub hash: String,
    pub tags: Vec<String>,
    pub skip: bool,
    pub body: TestBody,
    // result fields, unset until the scheduler runs the test exactly once
    pub pass: bool,
    pub assertions: Vec<Assertion>,
    pub duration_ms: Option<u64>,
    pub error: Option<TestError>,
}

impl TestNode {
    pub fn info(&self) -> TestInfo {
        TestInfo {
            description: self.description.clone(),
            full_description: self.full_description.clone(),
            path: self.path.clone(),
            hash: self.hash.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Snapshot the executed outcome.
    pub fn record(&self) -> TestRecord {
        TestRecord {
            info: self.info(),
            status: if self.pass {
                TestStatus::Pass
            } else {
                TestStatus::Fail
            },
            assertions: self.assertions.clone(),
            duration_ms: self.duration_ms.unwrap_or(0),
            error: self.error.clone(),
        }
    }
}

/// A node in the registration tree.
pub enum JobNode {
    Suite(SuiteNode),
    Test(TestNode),
}

impl JobNode {
    pub fn id(&self) -> JobId {
        match self {
            JobNode::Suite(s) => s.id,
            JobNode::Test(t) => t.id,
        }
    }

    pub fn parent(&self) -> Option<JobId> {
        match self {
            JobNode::Suite(s) => s.parent,
            JobNode::Test(t) => t.parent,
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            JobNode::Suite(s) => &s.hash,
            JobNode::Test(t) => &t.hash,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            JobNode::Suite(s) => &s.tags,
            JobNode::Test(t) => &t.tags,
        }
    }

    pub fn full_description(&self) -> &str {
        match self {
            JobNode::Suite(s) => &s.full_description,
            JobNode::Test(t) => &t.full_description,
        }
    }

    pub fn is_suite(&self) -> bool {
        matches!(self, JobNode::Suite(_))
    }
}

/// Owner of every job node; ids are indexes into it.
#[derive(Default)]
pub struct Arena {
    nodes: Vec<JobNode>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a suite node under `parent`, deriving path, tags and skip
    /// state. The parent's child list is not touched; attachment is the
    /// caller's decision (root jobs have no owning suite).
    pub fn new_suite(
        &mut self,
        parent: Option<JobId>,
        description: &str,
        own_tags: &[String],
    ) -> JobId {
        let (path, tags, skip) = self.derive(parent, description, own_tags);
        let id = JobId(self.nodes.len());
        let full_description = path.join(" > ");
        let hash = generate_hash(&path);
        self.nodes.push(JobNode::Suite(SuiteNode {
            id,
            parent,
            description: description.to_string(),
            path,
            full_description,
            hash,
            tags,
            skip,
            children: Vec::new(),
            before_fns: Vec::new(),
            before_each_fns: Vec::new(),
        }));
        id
    }

    /// Create a test node under `parent`.
    pub fn new_test(
        &mut self,
        parent: Option<JobId>,
        description: &str,
        own_tags: &[String],
        body: TestBody,
    ) -> JobId {
        let (path, tags, skip) = self.derive(parent, description, own_tags);
        let id = JobId(self.nodes.len());
        let full_description = path.join(" > ");
        let hash = generate_hash(&path);
        self.nodes.push(JobNode::Test(TestNode {
            id,
            parent,
            description: description.to_string(),
            path,
            full_description,
            hash,
            tags,
            skip,
            body,
            pass: false,
            assertions: Vec::new(),
            duration_ms: None,
            error: None,
        }));
        id
    }

    fn derive(
        &self,
        parent: Option<JobId>,
        description: &str,
        own_tags: &[String],
    ) -> (Vec<String>, Vec<String>, bool) {
        match parent {
            Some(parent) => {
                let parent = self.suite(parent);
                let mut path = parent.path.clone();
                path.push(description.to_string());
                let mut tags = parent.tags.clone();
                tags.extend(own_tags.iter().cloned());
                (path, tags, parent.skip)
            }
            None => (
                vec![description.to_string()],
                own_tags.to_vec(),
                false,
            ),
        }
    }

    pub fn get(&self, id: JobId) -> &JobNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: JobId) -> &mut JobNode {
        &mut self.nodes[id.0]
    }

    pub fn suite(&self, id: JobId) -> &SuiteNode {
        match &self.nodes[id.0] {
            JobNode::Suite(s) => s,
            JobNode::Test(_) => panic!("job {id} is not a suite"),
        }
    }

    pub fn suite_mut(&mut self, id: JobId) -> &mut SuiteNode {
        match &mut self.nodes[id.0] {
            JobNode::Suite(s) => s,
            JobNode::Test(_) => panic!("job {id} is not a suite"),
        }
    }

    pub fn test(&self, id: JobId) -> &TestNode {
        match &self.nodes[id.0] {
            JobNode::Test(t) => t,
            JobNode::Suite(_) => panic!("job {id} is not a test"),
        }
    }

    pub fn test_mut(&mut self, id: JobId) -> &mut TestNode {
        match &mut self.nodes[id.0] {
            JobNode::Test(t) => t,
            JobNode::Suite(_) => panic!("job {id} is not a test"),
        }
    }

    /// Ids of every executed test that failed, in creation order. Feeds the
    /// "rerun failed" selector list.
    pub fn failed_hashes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                JobNode::Test(t) if t.duration_ms.is_some() && !t.pass => {
                    Some(t.hash.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("nodes", &self.nodes.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop_body() -> TestBody {
        Arc::new(|_| async { Ok(()) }.boxed())
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_paths_accumulate_descriptions() {
        let mut arena = Arena::new();
        let root = arena.new_suite(None, "math", &[]);
        let inner = arena.new_suite(Some(root), "integers", &[]);
        let test = arena.new_test(Some(inner), "addition", &[], noop_body());

        assert_eq!(arena.suite(inner).path, vec!["math", "integers"]);
        assert_eq!(
            arena.test(test).full_description,
            "math > integers > addition"
        );
    }

    #[test]
    fn test_tags_are_inherited_and_extended() {
        let mut arena = Arena::new();
        let root = arena.new_suite(None, "net", &tags(&["slow"]));
        let test = arena.new_test(Some(root), "connect", &tags(&["flaky"]), noop_body());

        assert_eq!(arena.test(test).tags, vec!["slow", "flaky"]);
    }

    #[test]
    fn test_skip_is_inherited_from_parent() {
        let mut arena = Arena::new();
        let root = arena.new_suite(None, "legacy", &[]);
        arena.suite_mut(root).skip = true;
        let test = arena.new_test(Some(root), "old behavior", &[], noop_body());

        assert!(arena.test(test).skip);
    }

    #[test]
    fn test_hashes_differ_between_siblings() {
        let mut arena = Arena::new();
        let a = arena.new_test(None, "first", &[], noop_body());
        let b = arena.new_test(None, "second", &[], noop_body());
        assert_ne!(arena.test(a).hash, arena.test(b).hash);
    }

    #[test]
    fn test_result_fields_start_unset() {
        let mut arena = Arena::new();
        let test = arena.new_test(None, "t", &[], noop_body());
        let node = arena.test(test);
        assert!(!node.pass);
        assert!(node.assertions.is_empty());
        assert!(node.duration_ms.is_none());
        assert!(node.error.is_none());
    }

    #[test]
    fn test_failed_hashes_only_covers_executed_tests() {
        let mut arena = Arena::new();
        let ran_failed = arena.new_test(None, "a", &[], noop_body());
        let _never_ran = arena.new_test(None, "b", &[], noop_body());
        let ran_passed = arena.new_test(None, "c", &[], noop_body());

        arena.test_mut(ran_failed).duration_ms = Some(1);
        let passed = arena.test_mut(ran_passed);
        passed.duration_ms = Some(1);
        passed.pass = true;

        let failed = arena.failed_hashes();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0], arena.test(ran_failed).hash);
    }
}
