//! Structured-response decoders.
//!
//! Each LLM response shape has exactly one decoder here. All of them share the
//! same path: extract the JSON body (fenced or raw), parse it, validate it
//! against the embedded JSON Schema (Draft 2020-12), deserialize it. Any
//! failure along that path yields the shape's fallback value; a malformed
//! response is never an error for the caller.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::core::merge::infer_agent;
use crate::core::text::{extract_json_block, strip_code_fences, truncate_chars};
use crate::core::types::{
    AgentRole, CandidateStep, Complexity, DebugAnalysis, Plan, ReasoningPlan, ReviewIssue,
    ReviewVerdict, Severity, Step,
};

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
pub const REASONING_PLAN_SCHEMA: &str = include_str!("../../schemas/reasoning_plan.schema.json");
pub const DEBUG_ANALYSIS_SCHEMA: &str = include_str!("../../schemas/debug_analysis.schema.json");
pub const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");

pub const PLAN_FALLBACK_RISK: &str = "Unable to parse plan, proceeding with basic execution";
pub const REASONING_FALLBACK_RISK: &str = "Response parsing failed";
pub const DEBUG_FALLBACK_ROOT_CAUSE: &str = "Unable to parse debugging response";
pub const REVIEW_FALLBACK_ISSUE: &str = "Unable to parse review response";
const FALLBACK_CONFIDENCE: f64 = 0.3;
const REASONING_EXCERPT_LIMIT: usize = 500;

/// Decode a planner response; falls back to a single coder step carrying the request.
pub fn decode_plan(raw: &str, request: &str) -> Plan {
    match decode_json::<PlanResponse>(raw, PLAN_SCHEMA) {
        Ok(response) => response.into_plan(request),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "plan response malformed; using fallback");
            fallback_plan(request)
        }
    }
}

pub fn fallback_plan(request: &str) -> Plan {
    Plan {
        understanding: request.to_string(),
        steps: vec![Step::new(AgentRole::Coder, request)],
        estimated_complexity: Complexity::Medium,
        risks: vec![PLAN_FALLBACK_RISK.to_string()],
        reasoning: None,
    }
}

pub fn decode_reasoning_plan(raw: &str) -> ReasoningPlan {
    match decode_json::<ReasoningResponse>(raw, REASONING_PLAN_SCHEMA) {
        Ok(response) => response.into_reasoning_plan(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "reasoning response malformed; using fallback");
            fallback_reasoning_plan(raw)
        }
    }
}

pub fn fallback_reasoning_plan(raw: &str) -> ReasoningPlan {
    ReasoningPlan {
        understanding: String::new(),
        steps: vec![CandidateStep {
            conclusion: truncate_chars(raw.trim(), REASONING_EXCERPT_LIMIT).to_string(),
            agent: Some(AgentRole::Coder),
            ..CandidateStep::default()
        }],
        confidence: FALLBACK_CONFIDENCE,
        estimated_complexity: None,
        risks: vec![REASONING_FALLBACK_RISK.to_string()],
        recommended_approach: String::new(),
    }
}

pub fn decode_debug_analysis(raw: &str) -> DebugAnalysis {
    match decode_json::<DebugAnalysis>(raw, DEBUG_ANALYSIS_SCHEMA) {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "debug response malformed; using fallback");
            DebugAnalysis {
                root_cause: DEBUG_FALLBACK_ROOT_CAUSE.to_string(),
                recommended_fix: String::new(),
                confidence: FALLBACK_CONFIDENCE,
            }
        }
    }
}

pub fn decode_review(raw: &str) -> ReviewVerdict {
    match decode_json::<ReviewResponse>(raw, REVIEW_SCHEMA) {
        Ok(response) => response.into_verdict(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "review response malformed; using fallback");
            fallback_review()
        }
    }
}

pub fn fallback_review() -> ReviewVerdict {
    ReviewVerdict {
        approved: false,
        issues: vec![ReviewIssue {
            severity: Severity::Medium,
            category: "review_error".to_string(),
            description: REVIEW_FALLBACK_ISSUE.to_string(),
            suggestion: String::new(),
        }],
        overall_quality: "needs_improvement".to_string(),
    }
}

/// Generated code is plain text: only fence lines are removed.
pub fn decode_code(raw: &str) -> String {
    strip_code_fences(raw)
}

fn decode_json<T: DeserializeOwned>(raw: &str, schema_raw: &str) -> Result<T> {
    let body = extract_json_block(raw);
    let instance: Value = serde_json::from_str(body).context("parse response json")?;
    let schema: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    serde_json::from_value(instance).context("deserialize response")
}

/// Dependencies arrive as step numbers or names; keep them as text.
fn dependency_labels(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    understanding: String,
    steps: Vec<PlanStepResponse>,
    #[serde(default)]
    estimated_complexity: Complexity,
    #[serde(default)]
    risks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanStepResponse {
    agent: AgentRole,
    action: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    dependencies: Vec<Value>,
}

impl PlanResponse {
    fn into_plan(self, request: &str) -> Plan {
        let understanding = if self.understanding.trim().is_empty() {
            request.to_string()
        } else {
            self.understanding
        };
        let mut plan = Plan {
            understanding,
            steps: self
                .steps
                .into_iter()
                .map(|step| Step {
                    agent: step.agent,
                    action: step.action,
                    files: step.files,
                    dependencies: dependency_labels(step.dependencies),
                    analysis: None,
                })
                .collect(),
            estimated_complexity: self.estimated_complexity,
            risks: Vec::new(),
            reasoning: None,
        };
        plan.add_risks(self.risks);
        plan
    }
}

#[derive(Debug, Deserialize)]
struct ReasoningResponse {
    #[serde(default)]
    understanding: String,
    steps: Vec<ReasoningStepResponse>,
    confidence: f64,
    #[serde(default, alias = "overall_conclusion")]
    recommended_approach: String,
    #[serde(default)]
    estimated_complexity: Option<Complexity>,
    #[serde(default)]
    risks: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReasoningStepResponse {
    description: String,
    analysis: String,
    conclusion: String,
    agent: Option<String>,
    files: Option<Vec<String>>,
    dependencies: Option<Vec<Value>>,
}

impl ReasoningResponse {
    fn into_reasoning_plan(self) -> ReasoningPlan {
        ReasoningPlan {
            understanding: self.understanding,
            steps: self
                .steps
                .into_iter()
                .map(|step| CandidateStep {
                    agent: step.agent.as_deref().and_then(parse_agent),
                    description: step.description,
                    analysis: step.analysis,
                    conclusion: step.conclusion,
                    files: step.files,
                    dependencies: step.dependencies.map(dependency_labels),
                })
                .collect(),
            confidence: self.confidence.clamp(0.0, 1.0),
            estimated_complexity: self.estimated_complexity,
            risks: self.risks,
            recommended_approach: self.recommended_approach,
        }
    }
}

/// Role names map directly; other labels go through keyword inference.
fn parse_agent(label: &str) -> Option<AgentRole> {
    match label.trim().to_lowercase().as_str() {
        "coder" => Some(AgentRole::Coder),
        "tester" => Some(AgentRole::Tester),
        "reviewer" => Some(AgentRole::Reviewer),
        other if !other.is_empty() => Some(infer_agent(other)),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    approved: bool,
    #[serde(default)]
    issues: Vec<ReviewIssueResponse>,
    #[serde(default)]
    overall_quality: String,
}

#[derive(Debug, Deserialize)]
struct ReviewIssueResponse {
    severity: String,
    #[serde(default, alias = "type")]
    category: String,
    description: String,
    #[serde(default)]
    suggestion: String,
}

impl ReviewResponse {
    fn into_verdict(self) -> ReviewVerdict {
        ReviewVerdict {
            approved: self.approved,
            issues: self
                .issues
                .into_iter()
                .map(|issue| ReviewIssue {
                    severity: parse_severity(&issue.severity),
                    category: issue.category,
                    description: issue.description,
                    suggestion: issue.suggestion,
                })
                .collect(),
            overall_quality: self.overall_quality,
        }
    }
}

/// Unknown labels count as medium.
fn parse_severity(label: &str) -> Severity {
    match label.trim().to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "low" => Severity::Low,
        _ => Severity::Medium,
    }
}
