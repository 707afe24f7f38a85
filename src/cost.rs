//! Per-call cost recording with task/model aggregation and budget signalling
//!
//! The tracker never refuses a call itself: it records what happened and
//! signals budget crossings through `is_budget_exceeded` and the optional
//! callback, which fires exactly once per crossing.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq)]
pub struct CostRecord {
    pub model: String,
    pub task_id: String,
    pub step_id: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated view over all records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub call_count: usize,
    pub by_model: HashMap<String, f64>,
    pub by_task: HashMap<String, f64>,
}

type BudgetCallback = Box<dyn Fn(f64, f64) + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    records: Vec<CostRecord>,
    total_cost: f64,
}

/// Append-only cost tracker, typically scoped to one task
pub struct CostTracker {
    budget_usd: Option<f64>,
    on_budget_exceeded: Option<BudgetCallback>,
    state: Mutex<TrackerState>,
}

impl CostTracker {
    pub fn new(budget_usd: Option<f64>) -> Self {
        Self {
            budget_usd,
            on_budget_exceeded: None,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Tracker whose callback fires once each time the running total crosses
    /// the budget
    pub fn with_callback(
        budget_usd: Option<f64>,
        on_budget_exceeded: impl Fn(f64, f64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            budget_usd,
            on_budget_exceeded: Some(Box::new(on_budget_exceeded)),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn record(
        &self,
        model: impl Into<String>,
        task_id: impl Into<String>,
        prompt_tokens: u32,
        completion_tokens: u32,
        cost_usd: f64,
        step_id: Option<String>,
    ) {
        let record = CostRecord {
            model: model.into(),
            task_id: task_id.into(),
            step_id,
            prompt_tokens,
            completion_tokens,
            cost_usd,
            timestamp: Utc::now(),
        };
        debug!(model = %record.model, task_id = %record.task_id, cost_usd, "cost recorded");

        let crossed = {
            let mut state = self.state.lock().expect("cost tracker lock poisoned");
            let before = state.total_cost;
            state.records.push(record);
            state.total_cost += cost_usd;
            let after = state.total_cost;

            // Detect the crossing inside the lock, fire the callback outside it
            match self.budget_usd {
                Some(budget) if before <= budget && after > budget => Some((after, budget)),
                _ => None,
            }
        };

        if let Some((total, budget)) = crossed {
            if let Some(callback) = &self.on_budget_exceeded {
                callback(total, budget);
            }
        }
    }

    pub fn get_summary(&self) -> CostSummary {
        let state = self.state.lock().expect("cost tracker lock poisoned");
        let mut summary = CostSummary {
            call_count: state.records.len(),
            ..Default::default()
        };

        for record in &state.records {
            summary.total_cost_usd += record.cost_usd;
            summary.total_tokens +=
                (record.prompt_tokens + record.completion_tokens) as u64;
            *summary.by_model.entry(record.model.clone()).or_insert(0.0) += record.cost_usd;
            *summary.by_task.entry(record.task_id.clone()).or_insert(0.0) += record.cost_usd;
        }
        summary
    }

    pub fn get_task_cost(&self, task_id: &str) -> f64 {
        let state = self.state.lock().expect("cost tracker lock poisoned");
        state
            .records
            .iter()
            .filter(|r| r.task_id == task_id)
            .map(|r| r.cost_usd)
            .sum()
    }

    pub fn get_remaining_budget(&self) -> Option<f64> {
        let budget = self.budget_usd?;
        let state = self.state.lock().expect("cost tracker lock poisoned");
        Some((budget - state.total_cost).max(0.0))
    }

    pub fn is_budget_exceeded(&self) -> bool {
        match self.budget_usd {
            Some(budget) => {
                let state = self.state.lock().expect("cost tracker lock poisoned");
                state.total_cost > budget
            }
            None => false,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.state
            .lock()
            .expect("cost tracker lock poisoned")
            .total_cost
    }

    pub fn record_count(&self) -> usize {
        self.state
            .lock()
            .expect("cost tracker lock poisoned")
            .records
            .len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("cost tracker lock poisoned");
        state.records.clear();
        state.total_cost = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_summary_aggregates_by_model_and_task() {
        let tracker = CostTracker::new(None);
        tracker.record("gpt-4", "task-1", 100, 50, 0.01, None);
        tracker.record("gpt-4", "task-2", 200, 100, 0.02, None);
        tracker.record("claude-3-haiku", "task-1", 50, 25, 0.001, Some("step-1".into()));

        let summary = tracker.get_summary();
        assert_eq!(summary.call_count, 3);
        assert_eq!(summary.total_tokens, 525);
        assert!((summary.total_cost_usd - 0.031).abs() < 1e-9);
        assert!((summary.by_model["gpt-4"] - 0.03).abs() < 1e-9);
        assert!((summary.by_task["task-1"] - 0.011).abs() < 1e-9);
    }

    #[test]
    fn test_total_is_monotonically_non_decreasing() {
        let tracker = CostTracker::new(None);
        let mut last = 0.0;
        for i in 0..20 {
            tracker.record("gpt-4", "task", 10, 10, (i % 3) as f64 * 0.001, None);
            let total = tracker.get_summary().total_cost_usd;
            assert!(total >= last);
            last = total;
        }
    }

    #[test]
    fn test_task_cost_matches_record_sum() {
        let tracker = CostTracker::new(None);
        tracker.record("gpt-4", "task-a", 10, 10, 0.004, None);
        tracker.record("gpt-4", "task-b", 10, 10, 0.002, None);
        tracker.record("gpt-4", "task-a", 10, 10, 0.003, None);
        assert!((tracker.get_task_cost("task-a") - 0.007).abs() < 1e-9);
        assert_eq!(tracker.get_task_cost("missing"), 0.0);
    }

    #[test]
    fn test_budget_callback_fires_once_per_crossing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let tracker = CostTracker::with_callback(Some(0.01), move |_total, _budget| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.record("gpt-4", "task", 10, 10, 0.005, None);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tracker.record("gpt-4", "task", 10, 10, 0.006, None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Already over budget, no further crossing
        tracker.record("gpt-4", "task", 10, 10, 0.002, None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remaining_budget_floors_at_zero() {
        let tracker = CostTracker::new(Some(0.01));
        assert_eq!(tracker.get_remaining_budget(), Some(0.01));
        tracker.record("gpt-4", "task", 10, 10, 0.02, None);
        assert_eq!(tracker.get_remaining_budget(), Some(0.0));
        assert!(tracker.is_budget_exceeded());
    }

    #[test]
    fn test_clear_resets_aggregates() {
        let tracker = CostTracker::new(Some(1.0));
        tracker.record("gpt-4", "task", 10, 10, 0.5, None);
        tracker.clear();
        assert_eq!(tracker.record_count(), 0);
        assert_eq!(tracker.total_cost(), 0.0);
        assert_eq!(tracker.get_summary().call_count, 0);
    }

    #[test]
    fn test_no_budget_means_never_exceeded() {
        let tracker = CostTracker::new(None);
        tracker.record("gpt-4", "task", 10, 10, 1000.0, None);
        assert!(!tracker.is_budget_exceeded());
        assert_eq!(tracker.get_remaining_budget(), None);
    }
}
