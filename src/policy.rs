//! Model selection policies
//!
//! Maps (task type, complexity) to a preferred model and fallback through a
//! pluggable policy. The result is advisory; the router stays authoritative
//! about deployment selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    Low,
    Medium,
    High,
    Critical,
}

/// Advisory selection result
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: String,
    pub reason: String,
    pub fallback: Option<String>,
}

/// A model selection strategy
pub trait SelectionPolicy: Send + Sync {
    fn select(
        &self,
        task_type: &str,
        complexity: TaskComplexity,
        context: &HashMap<String, Value>,
    ) -> ModelSelection;
}

/// Cheapest model that still matches the complexity tier
pub struct CostOptimizedPolicy;

impl CostOptimizedPolicy {
    fn model_for(complexity: TaskComplexity) -> &'static str {
        match complexity {
            TaskComplexity::Low => "deepseek-chat",
            TaskComplexity::Medium => "gpt-3.5-turbo",
            TaskComplexity::High => "gpt-4-turbo",
            TaskComplexity::Critical => "claude-3-opus",
        }
    }
}

impl SelectionPolicy for CostOptimizedPolicy {
    fn select(
        &self,
        _task_type: &str,
        complexity: TaskComplexity,
        _context: &HashMap<String, Value>,
    ) -> ModelSelection {
        ModelSelection {
            model: Self::model_for(complexity).to_string(),
            reason: format!("cost-optimized for {:?} complexity", complexity),
            fallback: Some("gpt-3.5-turbo".to_string()),
        }
    }
}

/// Always the strongest model, cost be damned
pub struct QualityOptimizedPolicy;

impl SelectionPolicy for QualityOptimizedPolicy {
    fn select(
        &self,
        _task_type: &str,
        _complexity: TaskComplexity,
        _context: &HashMap<String, Value>,
    ) -> ModelSelection {
        ModelSelection {
            model: "claude-3-opus".to_string(),
            reason: "quality-optimized: strongest available model".to_string(),
            fallback: Some("gpt-4".to_string()),
        }
    }
}

/// Dispatches task types to policies, inferring complexity when omitted
pub struct PolicyEngine {
    default_policy: Box<dyn SelectionPolicy>,
    task_policies: HashMap<String, Box<dyn SelectionPolicy>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            default_policy: Box::new(CostOptimizedPolicy),
            task_policies: HashMap::new(),
        }
    }

    pub fn with_default_policy(policy: Box<dyn SelectionPolicy>) -> Self {
        Self {
            default_policy: policy,
            task_policies: HashMap::new(),
        }
    }

    /// Built-in complexity table for known task types
    pub fn infer_complexity(task_type: &str) -> TaskComplexity {
        match task_type {
            "planning" => TaskComplexity::High,
            "execution" => TaskComplexity::Medium,
            "verification" => TaskComplexity::Medium,
            "extraction" => TaskComplexity::Low,
            "summarization" => TaskComplexity::Low,
            _ => TaskComplexity::Medium,
        }
    }

    /// Register a policy for one task type, overriding the default
    pub fn register_policy(&mut self, task_type: impl Into<String>, policy: Box<dyn SelectionPolicy>) {
        self.task_policies.insert(task_type.into(), policy);
    }

    pub fn set_default_policy(&mut self, policy: Box<dyn SelectionPolicy>) {
        self.default_policy = policy;
    }

    pub fn select_model(
        &self,
        task_type: &str,
        complexity: Option<TaskComplexity>,
        context: Option<&HashMap<String, Value>>,
    ) -> ModelSelection {
        let complexity = complexity.unwrap_or_else(|| Self::infer_complexity(task_type));
        let empty = HashMap::new();
        let context = context.unwrap_or(&empty);

        self.task_policies
            .get(task_type)
            .unwrap_or(&self.default_policy)
            .select(task_type, complexity, context)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_inference_table() {
        assert_eq!(PolicyEngine::infer_complexity("planning"), TaskComplexity::High);
        assert_eq!(PolicyEngine::infer_complexity("execution"), TaskComplexity::Medium);
        assert_eq!(PolicyEngine::infer_complexity("verification"), TaskComplexity::Medium);
        assert_eq!(PolicyEngine::infer_complexity("extraction"), TaskComplexity::Low);
        assert_eq!(PolicyEngine::infer_complexity("summarization"), TaskComplexity::Low);
        assert_eq!(PolicyEngine::infer_complexity("something-else"), TaskComplexity::Medium);
    }

    #[test]
    fn test_cost_optimized_ladder() {
        let engine = PolicyEngine::new();
        let cases = [
            (TaskComplexity::Low, "deepseek-chat"),
            (TaskComplexity::Medium, "gpt-3.5-turbo"),
            (TaskComplexity::High, "gpt-4-turbo"),
            (TaskComplexity::Critical, "claude-3-opus"),
        ];
        for (complexity, expected) in cases {
            let selection = engine.select_model("execution", Some(complexity), None);
            assert_eq!(selection.model, expected);
            assert!(selection.fallback.is_some());
        }
    }

    #[test]
    fn test_inferred_complexity_drives_selection() {
        let engine = PolicyEngine::new();
        let selection = engine.select_model("planning", None, None);
        assert_eq!(selection.model, "gpt-4-turbo");
        let selection = engine.select_model("summarization", None, None);
        assert_eq!(selection.model, "deepseek-chat");
    }

    #[test]
    fn test_quality_policy_always_picks_strongest() {
        let engine = PolicyEngine::with_default_policy(Box::new(QualityOptimizedPolicy));
        let selection = engine.select_model("extraction", Some(TaskComplexity::Low), None);
        assert_eq!(selection.model, "claude-3-opus");
        assert_eq!(selection.fallback.as_deref(), Some("gpt-4"));
    }

    #[test]
    fn test_task_policy_overrides_default() {
        let mut engine = PolicyEngine::new();
        engine.register_policy("verification", Box::new(QualityOptimizedPolicy));

        let verification = engine.select_model("verification", None, None);
        assert_eq!(verification.model, "claude-3-opus");

        // Other task types keep the default policy
        let execution = engine.select_model("execution", None, None);
        assert_eq!(execution.model, "gpt-3.5-turbo");
    }
}
