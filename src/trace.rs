//! Dependency Tracer
//!
//! Works on live job graphs, not source text: the loader evaluates each
//! matched file and the `deps` arrays carry real object references. The
//! tracer validates global name uniqueness, walks every workflow's main job
//! to compute the minimal set of jobs to bundle, and rejects any job that is
//! reachable via `deps` but not independently loadable.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::warn;

use crate::diagnostics::{BuildError, BuildResult, ERR_DUPLICATE_JOB, ERR_UNEXPORTED_JOB};
use crate::resources::{JobObject, Workflow};

/// One `(name, exportName, sourceFile)` triple from a matched file.
#[derive(Debug, Clone)]
pub struct JobSource {
    pub name: String,
    pub export_name: String,
    pub file: String,
}

#[derive(Debug)]
pub struct TraceOutcome {
    /// Minimal reachable job-name set to bundle, deduplicated by name.
    pub bundle_set: BTreeSet<String>,
    /// Exported jobs no workflow reaches. Warned about, never fatal.
    pub unreachable: Vec<String>,
}

pub fn trace_jobs(declared: &[JobSource], workflows: &[Workflow]) -> BuildResult<TraceOutcome> {
    check_unique_names(declared)?;

    let declared_names: HashSet<&str> = declared.iter().map(|d| d.name.as_str()).collect();
    let main_names: HashSet<&str> = workflows.iter().map(|w| w.main_job.name.as_str()).collect();

    // Visited-by-name traversal: diamond-shared jobs appear exactly once no
    // matter which workflow or deps order discovers them first.
    let mut bundle_set = BTreeSet::new();
    let mut stack: Vec<Arc<JobObject>> = workflows.iter().map(|w| w.main_job.clone()).collect();
    while let Some(job) = stack.pop() {
        if !bundle_set.insert(job.name.clone()) {
            continue;
        }
        for dep in &job.deps {
            stack.push(dep.clone());
        }
    }

    let not_loadable: Vec<&str> = bundle_set
        .iter()
        .map(String::as_str)
        .filter(|name| !declared_names.contains(name) && !main_names.contains(name))
        .collect();
    if !not_loadable.is_empty() {
        return Err(BuildError::new(
            ERR_UNEXPORTED_JOB,
            format!(
                "Jobs used via deps but never exported from a top level: {}. Each must be independently loadable by the bundler.",
                not_loadable.join(", ")
            ),
        ));
    }

    let unreachable: Vec<String> = declared
        .iter()
        .filter(|d| !bundle_set.contains(&d.name))
        .map(|d| d.name.clone())
        .collect();
    if !unreachable.is_empty() {
        warn!(
            jobs = %unreachable.join(", "),
            "exported jobs are unreachable from every workflow and will not be bundled"
        );
    }

    Ok(TraceOutcome {
        bundle_set,
        unreachable,
    })
}

/// Job names are unique across the deployment. Files load concurrently, so
/// collision reporting never depends on which file finished first: the
/// colliding pairs are sorted before being named.
fn check_unique_names(declared: &[JobSource]) -> BuildResult<()> {
    let mut by_name: BTreeMap<&str, Vec<&JobSource>> = BTreeMap::new();
    for source in declared {
        by_name.entry(source.name.as_str()).or_default().push(source);
    }

    let mut collisions = Vec::new();
    for (name, sources) in by_name {
        if sources.len() > 1 {
            let mut pairs: Vec<String> = sources
                .iter()
                .map(|s| format!("({}, {})", s.file, s.export_name))
                .collect();
            pairs.sort();
            collisions.push(format!("'{}' declared in {}", name, pairs.join(" and ")));
        }
    }

    if collisions.is_empty() {
        Ok(())
    } else {
        Err(BuildError::new(
            ERR_DUPLICATE_JOB,
            format!("Duplicate job names: {}", collisions.join("; ")),
        ))
    }
}
