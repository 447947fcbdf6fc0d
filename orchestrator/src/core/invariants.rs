//! Dependency diagnostics for the checklist.
//!
//! None of these checks change scheduling: a cyclic or dangling dependency
//! still leaves the task unrunnable and the run ends with `no_viable_tasks`.
//! They exist so the cause can be reported.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::core::types::{Task, TaskStatus};

/// Why a pending task can never become runnable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// The task sits on a dependency cycle (`path` starts and ends with the task).
    Cycle { path: Vec<String> },
    /// A dependency names a task that does not exist.
    UnknownDependency { dependency: String },
    /// A dependency finished as `failed`.
    FailedDependency { dependency: String },
    /// A dependency is itself blocked.
    BlockedDependency { dependency: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub task_id: String,
    #[serde(flatten)]
    pub reason: BlockReason,
}

/// Check dependency references across all tasks:
/// - every dependency names an existing task
/// - no task depends on itself
/// - no dependency cycles
pub fn validate_dependencies(tasks: &[Task]) -> Vec<String> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut errors = Vec::new();
    let mut reported_cycles: HashSet<Vec<String>> = HashSet::new();

    for task in tasks {
        for dep in &task.dependencies {
            if dep == &task.id {
                errors.push(format!("task '{}' depends on itself", task.id));
            } else if !by_id.contains_key(dep.as_str()) {
                errors.push(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                ));
            }
        }
        if let Some(path) = cycle_through(&by_id, &task.id)
            && path.len() > 2
        {
            let mut key = path[..path.len() - 1].to_vec();
            key.sort();
            if reported_cycles.insert(key) {
                errors.push(format!("dependency cycle: {}", path.join(" -> ")));
            }
        }
    }
    errors
}

/// Explain every pending task that is not runnable and cannot become runnable.
///
/// A pending task whose dependencies are all still pending and unblocked is
/// not reported: it is merely waiting.
pub fn diagnose_blocked(tasks: &[Task]) -> Vec<BlockedTask> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut memo: HashMap<String, Option<BlockReason>> = HashMap::new();

    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .filter_map(|task| {
            let mut visiting = HashSet::new();
            block_reason(&by_id, &task.id, &mut visiting, &mut memo).map(|reason| BlockedTask {
                task_id: task.id.clone(),
                reason,
            })
        })
        .collect()
}

fn block_reason(
    by_id: &HashMap<&str, &Task>,
    id: &str,
    visiting: &mut HashSet<String>,
    memo: &mut HashMap<String, Option<BlockReason>>,
) -> Option<BlockReason> {
    if let Some(known) = memo.get(id) {
        return known.clone();
    }
    let task = by_id.get(id)?;

    if let Some(path) = cycle_through(by_id, id) {
        let reason = Some(BlockReason::Cycle { path });
        memo.insert(id.to_string(), reason.clone());
        return reason;
    }
    if !visiting.insert(id.to_string()) {
        return None;
    }

    let mut reason = None;
    for dep in &task.dependencies {
        let found = match by_id.get(dep.as_str()) {
            None => Some(BlockReason::UnknownDependency {
                dependency: dep.clone(),
            }),
            Some(dep_task) if dep_task.status == TaskStatus::Failed => {
                Some(BlockReason::FailedDependency {
                    dependency: dep.clone(),
                })
            }
            Some(dep_task) if dep_task.status == TaskStatus::Completed => None,
            Some(_) => block_reason(by_id, dep, visiting, memo).map(|_| {
                BlockReason::BlockedDependency {
                    dependency: dep.clone(),
                }
            }),
        };
        if found.is_some() {
            reason = found;
            break;
        }
    }

    visiting.remove(id);
    memo.insert(id.to_string(), reason.clone());
    reason
}

/// Find a dependency path that leaves `start` and returns to it.
///
/// Only follows edges into non-terminal tasks: a completed or failed
/// dependency cannot hold a cycle open.
fn cycle_through(by_id: &HashMap<&str, &Task>, start: &str) -> Option<Vec<String>> {
    let mut path = vec![start.to_string()];
    let mut seen = HashSet::new();
    if walk(by_id, start, start, &mut path, &mut seen) {
        return Some(path);
    }
    None
}

fn walk(
    by_id: &HashMap<&str, &Task>,
    current: &str,
    target: &str,
    path: &mut Vec<String>,
    seen: &mut HashSet<String>,
) -> bool {
    let Some(task) = by_id.get(current) else {
        return false;
    };
    for dep in &task.dependencies {
        let Some(dep_task) = by_id.get(dep.as_str()) else {
            continue;
        };
        if dep_task.status.is_terminal() {
            continue;
        }
        if dep == target {
            path.push(dep.clone());
            return true;
        }
        if !seen.insert(dep.clone()) {
            continue;
        }
        path.push(dep.clone());
        if walk(by_id, dep, target, path, seen) {
            return true;
        }
        path.pop();
    }
    false
}
