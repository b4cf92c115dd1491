//! Adversarial coordinator: implementer/reviewer rounds over file artifacts
//!
//! Each round spawns an implementer that writes `increment_<k>.md`, then a
//! reviewer that writes `review_<k>.md` carrying a 0-10 score and an
//! approved marker. Approval completes the session; a round cap or an
//! unparseable review fails it. Exactly one sub-instance is live at a time,
//! and all rounds share one working copy so the artifacts carry the
//! conversation.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use eyre::Result;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{GroupKind, GroupPhase, InstanceGroup};
use crate::events::EventEmitter;
use crate::instance::InstanceSupervisor;

use super::{Coordinator, CoordinatorContext};

/// Phase of an adversarial session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdversarialPhase {
    Idle,
    Implementing,
    Reviewing,
    Complete,
    Failed,
}

impl AdversarialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Implementing => "implementing",
            Self::Reviewing => "reviewing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Parsed outcome of a review artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub score: u8,
    pub approved: bool,
}

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^score:\s*(\d+)/10\s*$").unwrap());
static APPROVED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^approved:\s*(yes|no)\s*$").unwrap());

/// Parse a review artifact
///
/// Markers are line-anchored and case-insensitive; whitespace around the
/// value is tolerated, anything else on the line is not. The first matching
/// line wins for each marker. Scores above 10 are a parse error.
pub fn parse_review(content: &str) -> Result<ReviewVerdict, String> {
    let mut score = None;
    let mut approved = None;

    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if score.is_none()
            && let Some(caps) = SCORE_RE.captures(line)
        {
            let value: u8 = caps[1].parse().map_err(|_| format!("score out of range: {}", &caps[1]))?;
            if value > 10 {
                return Err(format!("score out of range: {value}"));
            }
            score = Some(value);
        }
        if approved.is_none()
            && let Some(caps) = APPROVED_RE.captures(line)
        {
            approved = Some(caps[1].eq_ignore_ascii_case("yes"));
        }
    }

    match (score, approved) {
        (Some(score), Some(approved)) => Ok(ReviewVerdict { score, approved }),
        (None, _) => Err("no score line found".to_string()),
        (_, None) => Err("no approved line found".to_string()),
    }
}

struct AdversarialState {
    round: u32,
    phase: AdversarialPhase,
    workdir: Option<PathBuf>,
    implementer: Option<Arc<InstanceSupervisor>>,
    reviewer: Option<Arc<InstanceSupervisor>>,
    last_score: Option<u8>,
    last_review: Option<String>,
    last_error: Option<String>,
}

/// Drives the implementer/reviewer loop for one session
pub struct AdversarialCoordinator {
    group_id: String,
    task: String,
    max_rounds: u32,
    ctx: CoordinatorContext,
    emitter: EventEmitter,
    state: Mutex<AdversarialState>,
}

impl AdversarialCoordinator {
    /// Create the session group and the coordinator; call `launch` to begin
    pub fn create(ctx: CoordinatorContext, task: impl Into<String>, max_rounds: u32) -> Result<Arc<Self>> {
        let task = task.into();
        let group = InstanceGroup::new(format!("adversarial: {task}"), GroupKind::Adversarial);
        let group_id = ctx.session.add_group(group)?;
        let emitter = ctx.bus.emitter_for(group_id.clone());

        Ok(Arc::new(Self {
            group_id,
            task,
            max_rounds: max_rounds.max(1),
            ctx,
            emitter,
            state: Mutex::new(AdversarialState {
                round: 1,
                phase: AdversarialPhase::Idle,
                workdir: None,
                implementer: None,
                reviewer: None,
                last_score: None,
                last_review: None,
                last_error: None,
            }),
        }))
    }

    /// Provision the shared working copy and start round 1
    pub async fn launch(self: &Arc<Self>) -> Result<()> {
        let workdir = match self.ctx.worktrees.create(&self.group_id).await {
            Ok(path) => path,
            Err(e) => {
                let mut state = self.state.lock().await;
                self.fail(&mut state, &format!("worktree: {e}")).await;
                return Err(e.into());
            }
        };

        let mut state = self.state.lock().await;
        state.workdir = Some(workdir);
        self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Executing);
        if let Err(e) = self.start_implementer(&mut state).await {
            self.fail(&mut state, &format!("implementer spawn: {e}")).await;
            return Err(e);
        }
        Ok(())
    }

    pub fn phase_blocking(&self) -> AdversarialPhase {
        // Probe-friendly accessor for UI and tests
        self.state.try_lock().map(|s| s.phase).unwrap_or(AdversarialPhase::Idle)
    }

    pub async fn phase(&self) -> AdversarialPhase {
        self.state.lock().await.phase
    }

    pub async fn last_score(&self) -> Option<u8> {
        self.state.lock().await.last_score
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn round(&self) -> u32 {
        self.state.lock().await.round
    }

    fn increment_file(round: u32) -> String {
        format!("increment_{round}.md")
    }

    fn review_file(round: u32) -> String {
        format!("review_{round}.md")
    }

    async fn start_implementer(&self, state: &mut AdversarialState) -> Result<()> {
        let workdir = state.workdir.clone().expect("workdir set before rounds start");
        let prompt = self.ctx.prompts.implementer(
            &self.task,
            state.round,
            &Self::increment_file(state.round),
            state.last_review.as_deref(),
        )?;

        let supervisor = self
            .ctx
            .spawn_in_group(
                &format!("implementer round {} of {}", state.round, self.task),
                &self.group_id,
                &workdir,
                &prompt,
            )
            .await?;

        info!(group_id = %self.group_id, round = state.round, "implementer started");
        state.implementer = Some(supervisor);
        state.reviewer = None;
        state.phase = AdversarialPhase::Implementing;
        Ok(())
    }

    async fn start_reviewer(&self, state: &mut AdversarialState, increment: &str) -> Result<()> {
        let workdir = state.workdir.clone().expect("workdir set before rounds start");
        let prompt = self
            .ctx
            .prompts
            .reviewer(&self.task, state.round, increment, &Self::review_file(state.round))?;

        let supervisor = self
            .ctx
            .spawn_in_group(
                &format!("reviewer round {} of {}", state.round, self.task),
                &self.group_id,
                &workdir,
                &prompt,
            )
            .await?;

        info!(group_id = %self.group_id, round = state.round, "reviewer started");
        state.implementer = None;
        state.reviewer = Some(supervisor);
        state.phase = AdversarialPhase::Reviewing;
        Ok(())
    }

    /// Poll for the increment artifact while implementing
    async fn check_increment(&self, state: &mut AdversarialState) {
        let Some(workdir) = state.workdir.clone() else {
            return;
        };
        let path = workdir.join(Self::increment_file(state.round));
        let ready = tokio::fs::try_exists(&path).await.unwrap_or(false);
        self.emitter
            .adversarial_check(state.phase.as_str(), ready, false, None);

        if !ready {
            // No artifact yet; a dead implementer means it never will come
            let failed = state
                .implementer
                .as_ref()
                .map(|s| {
                    let status = s.status();
                    status.is_failed() || status == crate::domain::InstanceStatus::Completed
                })
                .unwrap_or(false);
            if failed {
                self.emitter.increment_processed(Some("implementer ended without increment".to_string()));
                self.fail(state, "implementer-failed").await;
            }
            return;
        }

        let increment = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                self.emitter.increment_processed(Some(e.to_string()));
                self.fail(state, &format!("increment unreadable: {e}")).await;
                return;
            }
        };

        // The implementer delivered; retire it before the reviewer starts so
        // at most one sub-instance is ever live.
        if let Some(implementer) = state.implementer.take() {
            implementer.mark_completed().await;
        }
        self.emitter.increment_processed(None);

        if let Err(e) = self.start_reviewer(state, &increment).await {
            self.fail(state, &format!("reviewer spawn: {e}")).await;
        }
    }

    /// Poll for the review artifact while reviewing
    async fn check_review(&self, state: &mut AdversarialState) {
        let Some(workdir) = state.workdir.clone() else {
            return;
        };
        let path = workdir.join(Self::review_file(state.round));
        let ready = tokio::fs::try_exists(&path).await.unwrap_or(false);
        self.emitter
            .adversarial_check(state.phase.as_str(), true, ready, None);

        if !ready {
            let failed = state
                .reviewer
                .as_ref()
                .map(|s| {
                    let status = s.status();
                    status.is_failed() || status == crate::domain::InstanceStatus::Completed
                })
                .unwrap_or(false);
            if failed {
                self.emitter.review_processed(false, 0, Some("reviewer ended without review".to_string()));
                self.fail(state, "reviewer-failed").await;
            }
            return;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                self.emitter.review_processed(false, 0, Some(e.to_string()));
                self.fail(state, &format!("review unreadable: {e}")).await;
                return;
            }
        };

        match parse_review(&content) {
            Err(e) => {
                // No retry on malformed reviews; kill the reviewer and stop
                self.emitter.review_processed(false, 0, Some(e.clone()));
                self.fail(state, "parse-error").await;
            }
            Ok(ReviewVerdict { score, approved }) => {
                state.last_score = Some(score);
                state.last_review = Some(content);
                if let Some(reviewer) = state.reviewer.take() {
                    reviewer.mark_completed().await;
                }
                self.emitter.review_processed(approved, score, None);

                if approved {
                    info!(group_id = %self.group_id, round = state.round, score, "review approved");
                    state.phase = AdversarialPhase::Complete;
                    self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Completed);
                } else if state.round >= self.max_rounds {
                    self.fail(state, "round-cap").await;
                } else {
                    state.round += 1;
                    info!(group_id = %self.group_id, round = state.round, "starting next round");
                    if let Err(e) = self.start_implementer(state).await {
                        self.fail(state, &format!("implementer spawn: {e}")).await;
                    }
                }
            }
        }
    }

    async fn fail(&self, state: &mut AdversarialState, reason: &str) {
        if state.phase.is_terminal() {
            return;
        }
        warn!(group_id = %self.group_id, reason, "adversarial session failed");
        for supervisor in state.implementer.take().into_iter().chain(state.reviewer.take()) {
            let _ = supervisor.kill().await;
        }
        state.phase = AdversarialPhase::Failed;
        state.last_error = Some(reason.to_string());
        self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
    }
}

#[async_trait]
impl Coordinator for AdversarialCoordinator {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn kind(&self) -> GroupKind {
        GroupKind::Adversarial
    }

    fn is_active(&self) -> bool {
        !self.phase_blocking().is_terminal()
    }

    async fn check_completion(&self) {
        // Skip the probe if the previous one is still running
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        match state.phase {
            AdversarialPhase::Implementing => self.check_increment(&mut state).await,
            AdversarialPhase::Reviewing => self.check_review(&mut state).await,
            AdversarialPhase::Idle | AdversarialPhase::Complete | AdversarialPhase::Failed => {}
        }
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.fail(&mut state, "stopped").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_review_approved() {
        let verdict = parse_review("score: 9/10\napproved: yes\n\nLooks solid.").unwrap();
        assert_eq!(verdict, ReviewVerdict { score: 9, approved: true });
    }

    #[test]
    fn test_parse_review_rejected() {
        let verdict = parse_review("score: 6/10\napproved: no\nneeds tests").unwrap();
        assert_eq!(verdict, ReviewVerdict { score: 6, approved: false });
    }

    #[test]
    fn test_parse_review_case_insensitive_and_whitespace() {
        let verdict = parse_review("SCORE:  8/10  \r\nApproved:   YES  ").unwrap();
        assert_eq!(verdict, ReviewVerdict { score: 8, approved: true });
    }

    #[test]
    fn test_parse_review_missing_score() {
        let err = parse_review("approved: yes\nall good").unwrap_err();
        assert!(err.contains("score"));
    }

    #[test]
    fn test_parse_review_missing_approved() {
        let err = parse_review("score: 7/10").unwrap_err();
        assert!(err.contains("approved"));
    }

    #[test]
    fn test_parse_review_score_out_of_range() {
        assert!(parse_review("score: 11/10\napproved: yes").is_err());
    }

    #[test]
    fn test_parse_review_rejects_trailing_garbage() {
        // Anything other than whitespace after the value is a parse error
        assert!(parse_review("score: 7/10 great work\napproved: yes").is_err());
    }

    #[test]
    fn test_parse_review_first_match_wins() {
        let verdict = parse_review("score: 3/10\nscore: 9/10\napproved: no\napproved: yes").unwrap();
        assert_eq!(verdict, ReviewVerdict { score: 3, approved: false });
    }

    #[test]
    fn test_parse_review_marker_mid_file() {
        let verdict = parse_review("# Review\n\nsome prose\nscore: 10/10\napproved: yes\n").unwrap();
        assert_eq!(verdict.score, 10);
    }

    #[test]
    fn test_artifact_names() {
        assert_eq!(AdversarialCoordinator::increment_file(1), "increment_1.md");
        assert_eq!(AdversarialCoordinator::review_file(3), "review_3.md");
    }
}
