//! Dependency-aware task checklist for a single run.
//!
//! The checklist is the only owner of task state. Tasks keep their insertion
//! order for the lifetime of the run and are never removed; adjustments can
//! only append tasks or patch fields other than status.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::core::types::{
    Adjustment, GoalDefinition, ProgressSummary, Task, TaskResult, TaskSpec, TaskStatus,
};

#[derive(Debug, Clone)]
pub struct Checklist {
    goal: GoalDefinition,
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl Checklist {
    pub fn new(goal: GoalDefinition) -> Self {
        Self {
            goal,
            tasks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a checklist from an oracle-produced task list, in list order.
    pub fn from_specs(goal: GoalDefinition, specs: Vec<TaskSpec>) -> Self {
        let mut checklist = Self::new(goal);
        for spec in specs {
            checklist.add(spec);
        }
        checklist
    }

    /// Append a task, assigning a fresh id when the spec has none or reuses one.
    ///
    /// Returns the id the task was stored under.
    pub fn add(&mut self, spec: TaskSpec) -> String {
        let id = match spec.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() && !self.index.contains_key(id) => id.to_string(),
            Some(id) if !id.is_empty() => {
                let fresh = self.fresh_id();
                warn!(duplicate = id, assigned = %fresh, "duplicate task id, assigning fresh id");
                fresh
            }
            _ => self.fresh_id(),
        };
        let task = spec.into_task(id.clone());
        self.index.insert(id.clone(), self.tasks.len());
        self.tasks.push(task);
        id
    }

    fn fresh_id(&self) -> String {
        let mut n = self.tasks.len() + 1;
        loop {
            let candidate = format!("task-{n}");
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn goal(&self) -> &GoalDefinition {
        &self.goal
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&idx| &self.tasks[idx])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        match self.index.get(id) {
            Some(&idx) => Some(&mut self.tasks[idx]),
            None => None,
        }
    }

    fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).map(|task| task.status)
    }

    /// Pending tasks whose every dependency is `completed`, in insertion order.
    ///
    /// Priority is not consulted.
    pub fn available_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.dependencies
                    .iter()
                    .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
            })
            .collect()
    }

    pub fn completed_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .collect()
    }

    /// Move a pending task to `in_progress`. Unknown or non-pending ids are ignored.
    pub fn mark_in_progress(&mut self, id: &str) {
        let Some(task) = self.get_mut(id) else {
            debug!(task_id = id, "mark_in_progress: unknown task");
            return;
        };
        if task.status != TaskStatus::Pending {
            debug!(task_id = id, status = task.status.as_str(), "mark_in_progress: not pending");
            return;
        }
        task.status = TaskStatus::InProgress;
    }

    /// Store a result and move the task to `completed` or `failed`.
    ///
    /// Unknown ids are ignored. A task that already reached a terminal status
    /// keeps it.
    pub fn record_result(&mut self, id: &str, result: TaskResult) {
        let Some(task) = self.get_mut(id) else {
            debug!(task_id = id, "record_result: unknown task");
            return;
        };
        if task.status.is_terminal() {
            debug!(task_id = id, status = task.status.as_str(), "record_result: already terminal");
            return;
        }
        task.status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.completed_at = Some(Utc::now());
        task.result = Some(result);
    }

    /// Apply adjustments in order. Returns how many took effect.
    pub fn apply_adjustments(&mut self, adjustments: Vec<Adjustment>) -> usize {
        let mut applied = 0;
        for adjustment in adjustments {
            match adjustment {
                Adjustment::Reorder { task_id, priority } => match self.get_mut(&task_id) {
                    Some(task) => {
                        task.priority = priority;
                        applied += 1;
                    }
                    None => debug!(task_id = %task_id, "reorder: unknown task"),
                },
                Adjustment::Modify { task_id, patch } => match self.get_mut(&task_id) {
                    Some(task) => {
                        patch.apply(task);
                        applied += 1;
                    }
                    None => debug!(task_id = %task_id, "modify: unknown task"),
                },
                Adjustment::Add { task } => {
                    let id = self.add(task);
                    debug!(task_id = %id, "added task");
                    applied += 1;
                }
            }
        }
        applied
    }

    pub fn progress_summary(&self) -> ProgressSummary {
        let count = |status: TaskStatus| self.tasks.iter().filter(|t| t.status == status).count();
        let total = self.tasks.len();
        let completed = count(TaskStatus::Completed);
        ProgressSummary {
            total,
            pending: count(TaskStatus::Pending),
            in_progress: count(TaskStatus::InProgress),
            completed,
            failed: count(TaskStatus::Failed),
            completion_rate: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64
            },
        }
    }
}
