//! Batch selection for one controller iteration.

use crate::core::types::Task;

/// Take the first `cap` runnable tasks in the order the checklist yielded them.
///
/// Priority is informational only and does not reorder the batch.
pub fn select_batch(available: Vec<&Task>, cap: usize) -> Vec<Task> {
    available.into_iter().take(cap).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn batch_is_capped_and_keeps_insertion_order() {
        let tasks: Vec<Task> = ["a", "b", "c", "d"].iter().map(|id| task(id)).collect();
        let mut refs: Vec<&Task> = tasks.iter().collect();
        let batch = select_batch(refs.clone(), 3);
        let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        refs.truncate(2);
        assert_eq!(select_batch(refs, 3).len(), 2);
    }

    #[test]
    fn higher_priority_does_not_jump_the_queue() {
        let mut urgent = task("urgent");
        urgent.priority = 100;
        let tasks = [task("first"), task("second"), urgent];
        let batch = select_batch(tasks.iter().collect(), 2);
        let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
