//! Failure-window trigger for adaptive reflection.

use crate::core::types::LedgerEntry;

/// When to ask the oracle for strategy adjustments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionPolicy {
    /// Number of most recent ledger entries inspected.
    pub window: usize,
    /// Reflection runs when the failure fraction is strictly above this value.
    pub failure_threshold: f64,
}

impl Default for ReflectionPolicy {
    fn default() -> Self {
        Self {
            window: 5,
            failure_threshold: 0.6,
        }
    }
}

/// Fraction of failed results among `entries` (0 for an empty slice).
pub fn failure_rate(entries: &[LedgerEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let failures = entries.iter().filter(|e| !e.result.success).count();
    failures as f64 / entries.len() as f64
}

/// True if the tail of `ledger` fails often enough to warrant reflection.
pub fn should_reflect(ledger: &[LedgerEntry], policy: &ReflectionPolicy) -> bool {
    if policy.window == 0 {
        return false;
    }
    let start = ledger.len().saturating_sub(policy.window);
    failure_rate(&ledger[start..]) > policy.failure_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failed_result, ledger_entry, success_result};

    fn ledger(outcomes: &[bool]) -> Vec<LedgerEntry> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, ok)| {
                let result = if *ok {
                    success_result(1.0)
                } else {
                    failed_result("failed")
                };
                ledger_entry(&format!("t{i}"), result)
            })
            .collect()
    }

    #[test]
    fn four_failures_in_last_five_trigger_reflection() {
        let entries = ledger(&[false, false, true, false, false]);
        assert_eq!(failure_rate(&entries), 0.8);
        assert!(should_reflect(&entries, &ReflectionPolicy::default()));
    }

    #[test]
    fn two_failures_in_last_five_do_not_trigger() {
        let entries = ledger(&[true, false, true, false, true]);
        assert!(!should_reflect(&entries, &ReflectionPolicy::default()));
    }

    #[test]
    fn only_the_window_is_inspected() {
        // Old failures fall outside the window of five.
        let entries = ledger(&[false, false, false, false, true, true, true, true, false]);
        assert!(!should_reflect(&entries, &ReflectionPolicy::default()));
    }

    #[test]
    fn exactly_at_threshold_does_not_trigger() {
        let entries = ledger(&[false, false, false, true, true]);
        assert!(!should_reflect(&entries, &ReflectionPolicy::default()));
    }

    #[test]
    fn short_ledger_uses_what_it_has() {
        assert!(should_reflect(&ledger(&[false]), &ReflectionPolicy::default()));
        assert!(!should_reflect(&[], &ReflectionPolicy::default()));
    }
}
