//! Prompt rendering for the LLM-backed collaborators and the PR body.

use anyhow::Result;
use minijinja::{Environment, context};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const REASONER_PLAN_TEMPLATE: &str = include_str!("prompts/reasoner_plan.md");
const DEBUGGER_TEMPLATE: &str = include_str!("prompts/debugger.md");
const CODER_GENERATE_TEMPLATE: &str = include_str!("prompts/coder_generate.md");
const CODER_FIX_TEMPLATE: &str = include_str!("prompts/coder_fix.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const PULL_REQUEST_TEMPLATE: &str = include_str!("prompts/pull_request.md");

/// Inputs for the pull request body.
#[derive(Debug, Clone)]
pub struct PullRequestInputs<'a> {
    pub request: &'a str,
    pub understanding: Option<&'a str>,
    pub files: &'a [String],
    pub test_command: Option<String>,
    pub tests_passed: bool,
    pub iterations: u32,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("planner", PLANNER_TEMPLATE),
            ("reasoner_plan", REASONER_PLAN_TEMPLATE),
            ("debugger", DEBUGGER_TEMPLATE),
            ("coder_generate", CODER_GENERATE_TEMPLATE),
            ("coder_fix", CODER_FIX_TEMPLATE),
            ("reviewer", REVIEWER_TEMPLATE),
            ("pull_request", PULL_REQUEST_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    pub fn render_planner(&self, request: &str, repo_context: &str, memory: &str) -> Result<String> {
        let template = self.env.get_template("planner")?;
        Ok(template.render(context! {
            request => request.trim(),
            repo_context => non_empty(repo_context),
            memory => non_empty(memory),
        })?)
    }

    pub fn render_reasoner_plan(
        &self,
        request: &str,
        repo_context: &str,
        memory: &str,
    ) -> Result<String> {
        let template = self.env.get_template("reasoner_plan")?;
        Ok(template.render(context! {
            request => request.trim(),
            repo_context => non_empty(repo_context),
            memory => non_empty(memory),
        })?)
    }

    pub fn render_debugger(
        &self,
        description: &str,
        logs: &str,
        code_context: &str,
    ) -> Result<String> {
        let template = self.env.get_template("debugger")?;
        Ok(template.render(context! {
            description => description.trim(),
            logs => non_empty(logs),
            code_context => non_empty(code_context),
        })?)
    }

    pub fn render_coder_generate(
        &self,
        task: &str,
        file_path: &str,
        existing_code: Option<&str>,
        context: &str,
        memory: &str,
    ) -> Result<String> {
        let template = self.env.get_template("coder_generate")?;
        Ok(template.render(context! {
            task => task.trim(),
            file_path => file_path,
            existing_code => existing_code.and_then(non_empty),
            context => non_empty(context),
            memory => non_empty(memory),
        })?)
    }

    pub fn render_coder_fix(
        &self,
        error: &str,
        file_path: &str,
        existing_code: &str,
        memory: &str,
    ) -> Result<String> {
        let template = self.env.get_template("coder_fix")?;
        Ok(template.render(context! {
            error => error.trim(),
            file_path => file_path,
            existing_code => existing_code,
            memory => non_empty(memory),
        })?)
    }

    pub fn render_reviewer(&self, code: &str, file_path: &str, context: &str) -> Result<String> {
        let template = self.env.get_template("reviewer")?;
        Ok(template.render(context! {
            code => code,
            file_path => file_path,
            context => non_empty(context),
        })?)
    }

    pub fn render_pull_request(&self, input: &PullRequestInputs<'_>) -> Result<String> {
        let template = self.env.get_template("pull_request")?;
        Ok(template.render(context! {
            request => input.request.trim(),
            understanding => input.understanding.and_then(non_empty),
            files => input.files,
            test_command => input.test_command.as_deref(),
            tests_passed => input.tests_passed,
            iterations => input.iterations,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_embedded_templates_load() {
        let engine = PromptEngine::new();
        for name in [
            "planner",
            "reasoner_plan",
            "debugger",
            "coder_generate",
            "coder_fix",
            "reviewer",
            "pull_request",
        ] {
            assert!(engine.env.get_template(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn planner_omits_empty_memory_section() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_planner("add a health check", "api/app.py:\nimport flask", "  ")
            .expect("render");
        assert!(prompt.contains("add a health check"));
        assert!(prompt.contains("import flask"));
        assert!(!prompt.contains("Related past work"));
    }

    #[test]
    fn coder_generate_marks_new_files() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_coder_generate("write handler", "api/health.py", None, "", "")
            .expect("render");
        assert!(prompt.contains("does not exist yet"));
        assert!(prompt.contains("`api/health.py`"));
    }

    #[test]
    fn pull_request_body_lists_files_and_understanding() {
        let engine = PromptEngine::new();
        let files = vec!["api/health.py".to_string(), "tests/test_health.py".to_string()];
        let body = engine
            .render_pull_request(&PullRequestInputs {
                request: "add a health check endpoint",
                understanding: Some("expose GET /health"),
                files: &files,
                test_command: Some("pytest".to_string()),
                tests_passed: true,
                iterations: 1,
            })
            .expect("render");
        assert!(body.contains("add a health check endpoint"));
        assert!(body.contains("expose GET /health"));
        assert!(body.contains("- `tests/test_health.py`"));
        assert!(body.contains("`pytest` passed"));
    }
}
