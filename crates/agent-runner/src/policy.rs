//! Declarative hook evaluation
//!
//! Rules are evaluated in configured list order. `priority` is carried for
//! display only and never reorders evaluation.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, RunnerError};

/// Hook phase a rule set applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookPhase {
    PreToolUse,
    PostToolUse,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
        }
    }
}

/// A hook action as written in the rule file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HookAction {
    Deny {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Allow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Scripts need a sandbox the hub does not have; always skipped
    Script {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
}

/// A rule as written in the rule file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookRuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub hooks: Vec<HookAction>,
}

/// Hook rule file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(rename = "PreToolUse", default)]
    pub pre_tool_use: Vec<HookRuleConfig>,
    #[serde(rename = "PostToolUse", default)]
    pub post_tool_use: Vec<HookRuleConfig>,
}

impl HookConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RunnerError::policy_config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::policy_config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

/// A compiled rule
#[derive(Debug, Clone)]
pub struct HookRule {
    matcher: Option<Regex>,
    input: Vec<(String, Regex)>,
    priority: Option<i32>,
    actions: Vec<HookAction>,
}

impl HookRule {
    fn compile(config: &HookRuleConfig) -> Result<Self> {
        let matcher = config.matcher.as_deref().map(compile_regex).transpose()?;

        let mut input = config
            .input
            .iter()
            .map(|(field, pattern)| Ok((field.clone(), compile_regex(pattern)?)))
            .collect::<Result<Vec<_>>>()?;
        input.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            matcher,
            input,
            priority: config.priority,
            actions: config.hooks.clone(),
        })
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn actions(&self) -> &[HookAction] {
        &self.actions
    }

    /// Tool-name matcher plus every input matcher must hit. A non-string
    /// input field never matches.
    pub fn matches(&self, tool_name: &str, input: &serde_json::Value) -> bool {
        if let Some(matcher) = &self.matcher {
            if !matcher.is_match(tool_name) {
                return false;
            }
        }
        self.input.iter().all(|(field, pattern)| {
            input
                .get(field)
                .and_then(|value| value.as_str())
                .is_some_and(|value| pattern.is_match(value))
        })
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| RunnerError::policy_config(format!("Invalid pattern {:?}: {}", pattern, e)))
}

/// Outcome of a pre-tool-use evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    /// No rule decided; fall back to static gating
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn default_decision() -> Self {
        Self {
            decision: Decision::Default,
            reason: None,
        }
    }

    pub fn is_deny(&self) -> bool {
        self.decision == Decision::Deny
    }
}

/// Compiled rule sets for both phases
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    pre_tool_use: Vec<HookRule>,
    post_tool_use: Vec<HookRule>,
}

impl PolicyEvaluator {
    /// Evaluator with no rules: every call yields `default`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile every pattern up front; one bad pattern rejects the set
    pub fn compile(config: &HookConfig) -> Result<Self> {
        Ok(Self {
            pre_tool_use: config
                .pre_tool_use
                .iter()
                .map(HookRule::compile)
                .collect::<Result<_>>()?,
            post_tool_use: config
                .post_tool_use
                .iter()
                .map(HookRule::compile)
                .collect::<Result<_>>()?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::compile(&HookConfig::from_file(path)?)
    }

    pub fn rules(&self, phase: HookPhase) -> &[HookRule] {
        match phase {
            HookPhase::PreToolUse => &self.pre_tool_use,
            HookPhase::PostToolUse => &self.post_tool_use,
        }
    }

    pub fn evaluate_pre_tool_use(
        &self,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> PolicyDecision {
        for (index, rule) in self.pre_tool_use.iter().enumerate() {
            if !rule.matches(tool_name, input) {
                continue;
            }
            for action in &rule.actions {
                match action {
                    HookAction::Deny { reason } => {
                        return PolicyDecision {
                            decision: Decision::Deny,
                            reason: reason.clone(),
                        };
                    }
                    HookAction::Allow { reason } => {
                        return PolicyDecision {
                            decision: Decision::Allow,
                            reason: reason.clone(),
                        };
                    }
                    HookAction::Log { message } => {
                        log_action(HookPhase::PreToolUse, tool_name, index, message.as_deref())
                    }
                    HookAction::Script { .. } => warn_script(HookPhase::PreToolUse, index),
                }
            }
        }
        PolicyDecision::default_decision()
    }

    /// Run log actions after a tool finished. Never decides anything.
    pub fn run_post_tool_use(&self, tool_name: &str, input: &serde_json::Value, is_error: bool) {
        for (index, rule) in self.post_tool_use.iter().enumerate() {
            if !rule.matches(tool_name, input) {
                continue;
            }
            for action in &rule.actions {
                match action {
                    HookAction::Log { message } => {
                        info!(
                            target: "hub::policy",
                            phase = HookPhase::PostToolUse.as_str(),
                            tool = tool_name,
                            rule = index,
                            is_error,
                            "{}",
                            message.as_deref().unwrap_or("tool executed")
                        );
                    }
                    HookAction::Script { .. } => warn_script(HookPhase::PostToolUse, index),
                    HookAction::Allow { .. } | HookAction::Deny { .. } => {}
                }
            }
        }
    }
}

fn log_action(phase: HookPhase, tool_name: &str, rule: usize, message: Option<&str>) {
    info!(
        target: "hub::policy",
        phase = phase.as_str(),
        tool = tool_name,
        rule,
        "{}",
        message.unwrap_or("hook matched")
    );
}

fn warn_script(phase: HookPhase, rule: usize) {
    warn!(
        phase = phase.as_str(),
        rule, "Script hook actions are not supported on the hub; skipping"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator(config: serde_json::Value) -> PolicyEvaluator {
        let config: HookConfig = serde_json::from_value(config).unwrap();
        PolicyEvaluator::compile(&config).unwrap()
    }

    #[test]
    fn test_deny_bash_default_echo() {
        let policy = evaluator(json!({
            "PreToolUse": [{"matcher": "^bash$", "hooks": [{"action": "deny", "reason": "No bash"}]}]
        }));

        assert_eq!(
            policy.evaluate_pre_tool_use("bash", &json!({})),
            PolicyDecision {
                decision: Decision::Deny,
                reason: Some("No bash".to_string()),
            }
        );
        assert_eq!(
            policy.evaluate_pre_tool_use("echo", &json!({})),
            PolicyDecision::default_decision()
        );
    }

    #[test]
    fn test_rules_run_in_list_order_not_priority() {
        let policy = evaluator(json!({
            "PreToolUse": [
                {"priority": 1, "hooks": [{"action": "allow", "reason": "first"}]},
                {"priority": 100, "hooks": [{"action": "deny", "reason": "second"}]}
            ]
        }));
        let decision = policy.evaluate_pre_tool_use("anything", &json!({}));
        assert_eq!(decision.decision, Decision::Allow);
        assert_eq!(decision.reason.as_deref(), Some("first"));
    }

    #[test]
    fn test_log_and_script_continue() {
        let policy = evaluator(json!({
            "PreToolUse": [
                {"hooks": [{"action": "log", "message": "seen"}, {"action": "script", "command": "x"}]},
                {"matcher": "^navigate$", "hooks": [{"action": "deny"}]}
            ]
        }));
        assert!(policy.evaluate_pre_tool_use("navigate", &json!({})).is_deny());
        assert_eq!(
            policy.evaluate_pre_tool_use("click", &json!({})).decision,
            Decision::Default
        );
    }

    #[test]
    fn test_input_matchers() {
        let policy = evaluator(json!({
            "PreToolUse": [
                {"matcher": "^navigate$", "input": {"url": "^https://"}, "hooks": [{"action": "allow"}]},
                {"matcher": "^navigate$", "hooks": [{"action": "deny", "reason": "insecure"}]}
            ]
        }));

        let secure = policy.evaluate_pre_tool_use("navigate", &json!({"url": "https://a.dev"}));
        assert_eq!(secure.decision, Decision::Allow);

        let plain = policy.evaluate_pre_tool_use("navigate", &json!({"url": "http://a.dev"}));
        assert!(plain.is_deny());

        // non-string field skips the first rule
        let numeric = policy.evaluate_pre_tool_use("navigate", &json!({"url": 42}));
        assert!(numeric.is_deny());

        let missing = policy.evaluate_pre_tool_use("navigate", &json!({}));
        assert!(missing.is_deny());
    }

    #[test]
    fn test_invalid_pattern_rejects_config() {
        let config: HookConfig = serde_json::from_value(json!({
            "PreToolUse": [{"matcher": "(", "hooks": []}]
        }))
        .unwrap();
        assert!(matches!(
            PolicyEvaluator::compile(&config),
            Err(RunnerError::PolicyConfig { .. })
        ));
    }

    #[test]
    fn test_unknown_action_rejects_file() {
        assert!(HookConfig::from_json(r#"{"PreToolUse":[{"hooks":[{"action":"explode"}]}]}"#).is_err());
    }

    #[test]
    fn test_post_tool_use_never_decides() {
        let policy = evaluator(json!({
            "PostToolUse": [{"hooks": [{"action": "deny"}, {"action": "log"}]}]
        }));
        policy.run_post_tool_use("bash", &json!({}), false);
        assert_eq!(
            policy.evaluate_pre_tool_use("bash", &json!({})).decision,
            Decision::Default
        );
        assert_eq!(policy.rules(HookPhase::PostToolUse).len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hooks.json");
        std::fs::write(
            &path,
            r#"{"PreToolUse":[{"matcher":"^bash$","hooks":[{"action":"deny","reason":"No bash"}]}]}"#,
        )
        .unwrap();

        let policy = PolicyEvaluator::from_file(&path).unwrap();
        assert!(policy.evaluate_pre_tool_use("bash", &json!({})).is_deny());
        assert!(PolicyEvaluator::from_file(&dir.path().join("missing.json")).is_err());
    }
}
