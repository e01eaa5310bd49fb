//! Cost Tracker: in-memory per-chat running totals, never persisted to disk (spec §6
//! ambient note). Grounded on the original_source's `cost_tracker.py` budget fields
//! (`max_per_run`, `max_per_day`, `warn_at_pct`, `auto_cancel`).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

use crate::config::CostBudgetConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetCheck {
    Ok,
    Warn { pct_used: f64 },
    Exceeded,
}

#[derive(Debug, Default)]
struct ChatCost {
    day: Option<NaiveDate>,
    spent_today: f64,
}

pub struct CostTracker {
    per_chat: Mutex<HashMap<String, ChatCost>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self { per_chat: Mutex::new(HashMap::new()) }
    }

    /// Record spend for one run and evaluate against the budget. `run_cost` resets no
    /// daily state; daily totals roll over automatically at UTC midnight.
    pub fn record(&self, chat_id: &str, run_cost: f64, budget: &CostBudgetConfig) -> BudgetCheck {
        let today = Utc::now().date_naive();
        let mut guard = self.per_chat.lock().unwrap();
        let entry = guard.entry(chat_id.to_string()).or_default();
        if entry.day != Some(today) {
            entry.day = Some(today);
            entry.spent_today = 0.0;
        }
        entry.spent_today += run_cost;

        if let Some(max_run) = budget.max_per_run {
            if run_cost >= max_run {
                return if budget.auto_cancel { BudgetCheck::Exceeded } else { BudgetCheck::Warn { pct_used: 1.0 } };
            }
        }
        if let Some(max_day) = budget.max_per_day {
            let pct = entry.spent_today / max_day;
            if pct >= 1.0 {
                return if budget.auto_cancel { BudgetCheck::Exceeded } else { BudgetCheck::Warn { pct_used: pct } };
            }
            if pct >= budget.warn_at_pct {
                return BudgetCheck::Warn { pct_used: pct };
            }
        }
        BudgetCheck::Ok
    }

    pub fn spent_today(&self, chat_id: &str) -> f64 {
        self.per_chat.lock().unwrap().get(chat_id).map(|c| c.spent_today).unwrap_or(0.0)
    }

    /// Pre-flight check before starting a new run: has this chat already exceeded its
    /// daily budget with `auto_cancel` set? Doesn't record any spend itself.
    pub fn is_blocked(&self, chat_id: &str, budget: &CostBudgetConfig) -> bool {
        if !budget.auto_cancel {
            return false;
        }
        let Some(max_day) = budget.max_per_day else { return false };
        let today = Utc::now().date_naive();
        let guard = self.per_chat.lock().unwrap();
        match guard.get(chat_id) {
            Some(entry) if entry.day == Some(today) => entry.spent_today >= max_day,
            _ => false,
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> CostBudgetConfig {
        CostBudgetConfig { max_per_run: None, max_per_day: Some(10.0), warn_at_pct: 0.8, auto_cancel: false }
    }

    #[test]
    fn under_threshold_is_ok() {
        let tracker = CostTracker::new();
        assert_eq!(tracker.record("c1", 1.0, &budget()), BudgetCheck::Ok);
    }

    #[test]
    fn crossing_warn_threshold_warns() {
        let tracker = CostTracker::new();
        tracker.record("c1", 7.0, &budget());
        let check = tracker.record("c1", 1.5, &budget());
        assert!(matches!(check, BudgetCheck::Warn { .. }));
    }

    #[test]
    fn exceeding_with_auto_cancel_reports_exceeded() {
        let tracker = CostTracker::new();
        let budget = CostBudgetConfig { max_per_run: None, max_per_day: Some(5.0), warn_at_pct: 0.8, auto_cancel: true };
        tracker.record("c1", 4.0, &budget);
        let check = tracker.record("c1", 2.0, &budget);
        assert_eq!(check, BudgetCheck::Exceeded);
    }

    #[test]
    fn is_blocked_after_exceeding_with_auto_cancel() {
        let tracker = CostTracker::new();
        let budget = CostBudgetConfig { max_per_run: None, max_per_day: Some(5.0), warn_at_pct: 0.8, auto_cancel: true };
        assert!(!tracker.is_blocked("c1", &budget));
        tracker.record("c1", 6.0, &budget);
        assert!(tracker.is_blocked("c1", &budget));
    }

    #[test]
    fn is_blocked_false_without_auto_cancel() {
        let tracker = CostTracker::new();
        let budget = budget();
        tracker.record("c1", 20.0, &budget);
        assert!(!tracker.is_blocked("c1", &budget));
    }
}
