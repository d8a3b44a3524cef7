//! Selection filters
//!
//! Narrow the job forest before execution. Each active predicate is applied
//! as a successive pass over the surviving roots, so later filters narrow
//! earlier ones and never widen them.

use std::collections::HashSet;

use crate::model::{Arena, JobId, JobNode};

/// One filter input, as supplied by the host environment (query parameters,
/// a saved failed-test list, ...).
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub hash: Option<String>,
    pub tag: Option<String>,
    pub text: Option<String>,
    pub skip: Option<String>,
}

impl Filter {
    /// Select a suite or test by its stable hash.
    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Default::default()
        }
    }

    /// Select jobs carrying a tag.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    /// Select jobs whose full description contains a substring.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Mark the job with this hash as skipped at registration time.
    pub fn skip(hash: impl Into<String>) -> Self {
        Self {
            skip: Some(hash.into()),
            ..Default::default()
        }
    }
}

/// The active filter sets owned by the scheduler.
#[derive(Debug, Default)]
pub struct FilterSet {
    pub has_filter: bool,
    pub only_set: HashSet<JobId>,
    pub hash_set: HashSet<String>,
    pub tag_set: HashSet<String>,
    pub skip_set: HashSet<String>,
    pub text_filter: String,
}

impl FilterSet {
    pub fn add(&mut self, filter: Filter) {
        self.has_filter = true;
        if let Some(hash) = filter.hash {
            self.hash_set.insert(hash);
        }
        if let Some(tag) = filter.tag {
            self.tag_set.insert(tag);
        }
        if let Some(text) = filter.text {
            self.text_filter = text;
        }
        if let Some(skip) = filter.skip {
            self.skip_set.insert(skip);
        }
    }

    /// Apply the active predicates in precedence order: explicit only marks,
    /// then hash selection, then tags, then the text filter. Each pass
    /// narrows the previous result and never widens it; an only-marked job
    /// is explicitly selected and therefore exempt from the lower-precedence
    /// passes. With no active filter, `jobs` passes through unchanged.
    pub fn prepare(&self, arena: &mut Arena, mut jobs: Vec<JobId>) -> Vec<JobId> {
        if !self.only_set.is_empty() {
            jobs = prune(arena, jobs, &|job| self.only_set.contains(&job.id()));
        }
        if !self.hash_set.is_empty() {
            jobs = prune(arena, jobs, &|job| {
                self.hash_set.contains(job.hash()) || self.only_set.contains(&job.id())
            });
        }
        if !self.tag_set.is_empty() {
            jobs = prune(arena, jobs, &|job| {
                job.tags().iter().any(|tag| self.tag_set.contains(tag))
                    || self.only_set.contains(&job.id())
            });
        }
        if !self.text_filter.is_empty() {
            jobs = prune(arena, jobs, &|job| {
                job.full_description().contains(&self.text_filter)
                    || self.only_set.contains(&job.id())
            });
        }
        jobs
    }
}

/// Keep a job if it matches, or (for a suite) if pruning its children
/// recursively leaves a non-empty subset, in which case the children list is
/// replaced by that subset and the suite survives as a pass-through
/// container.
fn prune(arena: &mut Arena, jobs: Vec<JobId>, pred: &dyn Fn(&JobNode) -> bool) -> Vec<JobId> {
    jobs.into_iter()
        .filter(|&id| should_run(arena, id, pred))
        .collect()
}

fn should_run(arena: &mut Arena, id: JobId, pred: &dyn Fn(&JobNode) -> bool) -> bool {
    if pred(arena.get(id)) {
        return true;
    }
    if arena.get(id).is_suite() {
        let children = arena.suite(id).children.clone();
        let kept = prune(arena, children, pred);
        if !kept.is_empty() {
            arena.suite_mut(id).children = kept;
            return true;
        }
    }
    false
}
