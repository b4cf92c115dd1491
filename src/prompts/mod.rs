//! Prompt library
//!
//! Registers the embedded handlebars templates once and renders them with
//! per-run context. Strict mode is off so optional fields (previous review,
//! previous output) can simply be omitted.

mod embedded;

use eyre::{Context, Result};
use handlebars::Handlebars;
use serde_json::json;

pub use embedded::{ADVERSARIAL_IMPLEMENTER, ADVERSARIAL_REVIEWER, PLANNER, RALPH_ITERATION};

pub struct PromptLibrary {
    handlebars: Handlebars<'static>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string("adversarial_implementer", ADVERSARIAL_IMPLEMENTER)
            .expect("embedded implementer template is valid");
        handlebars
            .register_template_string("adversarial_reviewer", ADVERSARIAL_REVIEWER)
            .expect("embedded reviewer template is valid");
        handlebars
            .register_template_string("ralph_iteration", RALPH_ITERATION)
            .expect("embedded ralph template is valid");
        handlebars
            .register_template_string("planner", PLANNER)
            .expect("embedded planner template is valid");
        Self { handlebars }
    }

    pub fn implementer(&self, task: &str, round: u32, increment_file: &str, previous_review: Option<&str>) -> Result<String> {
        self.handlebars
            .render(
                "adversarial_implementer",
                &json!({
                    "task": task,
                    "round": round,
                    "increment_file": increment_file,
                    "previous_review": previous_review,
                }),
            )
            .context("failed to render implementer prompt")
    }

    pub fn reviewer(&self, task: &str, round: u32, increment: &str, review_file: &str) -> Result<String> {
        self.handlebars
            .render(
                "adversarial_reviewer",
                &json!({
                    "task": task,
                    "round": round,
                    "increment": increment,
                    "review_file": review_file,
                }),
            )
            .context("failed to render reviewer prompt")
    }

    pub fn ralph_iteration(
        &self,
        task: &str,
        iteration: u32,
        max_iterations: u32,
        promise: &str,
        previous_output: Option<&str>,
    ) -> Result<String> {
        self.handlebars
            .render(
                "ralph_iteration",
                &json!({
                    "task": task,
                    "iteration": iteration,
                    "max_iterations": max_iterations,
                    "promise": promise,
                    "previous_output": previous_output,
                }),
            )
            .context("failed to render ralph prompt")
    }

    pub fn planner(&self, task: &str) -> Result<String> {
        self.handlebars
            .render("planner", &json!({ "task": task }))
            .context("failed to render planner prompt")
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementer_first_round_has_no_feedback_section() {
        let prompts = PromptLibrary::new();
        let rendered = prompts.implementer("build a parser", 1, "increment_1.md", None).unwrap();
        assert!(rendered.contains("build a parser"));
        assert!(rendered.contains("increment_1.md"));
        assert!(!rendered.contains("Reviewer feedback"));
    }

    #[test]
    fn test_implementer_later_round_embeds_feedback() {
        let prompts = PromptLibrary::new();
        let rendered = prompts
            .implementer("build a parser", 2, "increment_2.md", Some("score: 6/10\nmissing tests"))
            .unwrap();
        assert!(rendered.contains("Reviewer feedback"));
        assert!(rendered.contains("missing tests"));
    }

    #[test]
    fn test_reviewer_mentions_artifact() {
        let prompts = PromptLibrary::new();
        let rendered = prompts
            .reviewer("build a parser", 1, "added lexer", "review_1.md")
            .unwrap();
        assert!(rendered.contains("review_1.md"));
        assert!(rendered.contains("added lexer"));
        assert!(rendered.contains("score:"));
    }

    #[test]
    fn test_ralph_prompt_embeds_promise_and_context() {
        let prompts = PromptLibrary::new();
        let first = prompts.ralph_iteration("write greeter", 1, 3, "DONE-GREETER", None).unwrap();
        assert!(first.contains("DONE-GREETER"));
        assert!(!first.contains("previous iteration"));

        let second = prompts
            .ralph_iteration("write greeter", 2, 3, "DONE-GREETER", Some("tail of run 1"))
            .unwrap();
        assert!(second.contains("tail of run 1"));
    }

    #[test]
    fn test_planner_prompt_shape() {
        let prompts = PromptLibrary::new();
        let rendered = prompts.planner("ship the feature").unwrap();
        assert!(rendered.contains("ship the feature"));
        assert!(rendered.contains("depends_on"));
    }
}
