//! Run-owned log of tool invocations.
//!
//! The history is observability only: nothing in the controller reads it to
//! make decisions. It keeps at most `limit` records and evicts the oldest.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub task_id: String,
    pub input: Value,
    pub output: Value,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<ToolInvocation>,
    limit: usize,
    evicted: usize,
}

impl ExecutionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
            evicted: 0,
        }
    }

    pub fn record(&mut self, invocation: ToolInvocation) {
        if self.limit == 0 {
            self.evicted += 1;
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(invocation);
    }

    pub fn extend(&mut self, invocations: impl IntoIterator<Item = ToolInvocation>) {
        for invocation in invocations {
            self.record(invocation);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records dropped by the retention limit.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn entries(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.entries.iter()
    }

    pub fn for_task<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a ToolInvocation> {
        self.entries.iter().filter(move |e| e.task_id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(task_id: &str) -> ToolInvocation {
        ToolInvocation {
            tool_name: "shell".to_string(),
            task_id: task_id.to_string(),
            input: Value::Null,
            output: Value::Null,
            success: true,
            error: None,
            duration_ms: 1,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn evicts_oldest_beyond_limit() {
        let mut history = ExecutionHistory::new(2);
        history.extend(["a", "b", "c"].map(invocation));

        let ids: Vec<&str> = history.entries().map(|e| e.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(history.evicted(), 1);
    }

    #[test]
    fn filters_by_task() {
        let mut history = ExecutionHistory::new(10);
        history.extend(["a", "b", "a"].map(invocation));
        assert_eq!(history.for_task("a").count(), 2);
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut history = ExecutionHistory::new(0);
        history.record(invocation("a"));
        assert!(history.is_empty());
        assert_eq!(history.evicted(), 1);
    }
}
