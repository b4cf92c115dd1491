//! Embedded prompt templates
//!
//! Compiled into the binary; rendered through handlebars with per-run
//! context (task, round/iteration numbers, artifact paths, prior output).

/// Implementer round of an adversarial session
pub const ADVERSARIAL_IMPLEMENTER: &str = r#"You are the implementer in round {{round}} of an implement/review loop.

# Task

{{task}}

{{#if previous_review}}
# Reviewer feedback from the previous round

{{previous_review}}

Address every point above before anything else.
{{/if}}

# Deliverable

Implement the next increment of the task in this working copy. When you are
done, write a summary of what you changed and why to `{{increment_file}}` at
the repository root. The file must exist before you finish; the reviewer
reads it to scope their review.
"#;

/// Reviewer round of an adversarial session
pub const ADVERSARIAL_REVIEWER: &str = r#"You are the reviewer in round {{round}} of an implement/review loop.

# Task under review

{{task}}

# Implementer's increment summary

{{increment}}

# Instructions

Review the working copy against the task. Be adversarial: look for missing
requirements, broken edge cases, and tests that do not prove what they claim.

Write your review to `{{review_file}}` at the repository root. The file MUST
begin with these two lines, exactly in this format:

score: <0-10>/10
approved: <yes|no>

followed by your findings. Approve only if the increment genuinely completes
the task.
"#;

/// One ralph-loop iteration
pub const RALPH_ITERATION: &str = r#"You are iteration {{iteration}} of {{max_iterations}} of an autonomous work loop.

# Task

{{task}}

{{#if previous_output}}
# Trailing output of the previous iteration

{{previous_output}}

Continue from where the previous iteration left off; state lives in the
working copy, not in this conversation.
{{/if}}

# Completion

When the task is fully complete, print the exact string `{{promise}}` on its
own line. Do not print it before the task is done.
"#;

/// Planner phase of an ultra-plan session
pub const PLANNER: &str = r#"You are a planning agent. Break the task below into an executable plan.

# Task

{{task}}

# Output format

Print a single JSON object (inside a ```json fenced block) of this shape:

{
  "summary": "one-paragraph plan summary",
  "tasks": [
    {
      "id": "t1",
      "title": "short title",
      "description": "what to do and how to verify it",
      "depends_on": [],
      "files": ["paths/likely/touched.rs"],
      "est_complexity": "low|medium|high",
      "priority": 0
    }
  ]
}

Rules: task ids must be unique; depends_on may only reference ids in this
plan; the dependency graph must be acyclic; higher priority runs earlier
within a parallel group.
"#;
