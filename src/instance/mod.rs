//! Agent instances: the per-task record and its supervisor

mod supervisor;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{InstanceStatus, generate_id, transition_allowed};
use crate::output::OutputBuffer;

pub use supervisor::InstanceSupervisor;

/// Supervisor timeout thresholds
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// No new output bytes for this long -> Stuck
    pub activity: Duration,

    /// Output grows but the tail fingerprint is frozen this long -> Stuck
    pub stale: Duration,

    /// Total wall-clock bound -> Timeout
    pub completion: Duration,

    /// How many trailing bytes the stale fingerprint covers
    pub stale_window_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            activity: Duration::from_secs(120),
            stale: Duration::from_secs(300),
            completion: Duration::from_secs(1800),
            stale_window_bytes: 4096,
        }
    }
}

struct MutableState {
    status: InstanceStatus,
    group: Option<String>,
    workdir: Option<PathBuf>,
    /// Parent instance that must complete before this one auto-starts
    waits_for: Option<String>,
    started_at: Option<Instant>,
    last_activity: Option<Instant>,
    // Stale detection: fingerprint of the buffer tail, when it last changed,
    // and the buffer length at that moment
    tail_fingerprint: u64,
    fingerprint_since: Option<Instant>,
    len_at_fingerprint: usize,
}

/// One supervised agent task
///
/// The Session holds the strong reference; the supervisor and coordinators
/// share it. All mutable state sits behind a short-critical-section mutex.
pub struct Instance {
    pub id: String,
    pub task: String,
    pub created_at: DateTime<Utc>,
    pub buffer: Arc<OutputBuffer>,
    pub timeouts: TimeoutConfig,
    state: Mutex<MutableState>,
}

impl Instance {
    pub fn new(task: impl Into<String>, max_output_bytes: usize, timeouts: TimeoutConfig) -> Self {
        let task = task.into();
        Self {
            id: generate_id("inst", &task),
            task,
            created_at: Utc::now(),
            buffer: Arc::new(OutputBuffer::new(max_output_bytes)),
            timeouts,
            state: Mutex::new(MutableState {
                status: InstanceStatus::Pending,
                group: None,
                workdir: None,
                waits_for: None,
                started_at: None,
                last_activity: None,
                tail_fingerprint: 0,
                fingerprint_since: None,
                len_at_fingerprint: 0,
            }),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.lock().expect("instance state poisoned").status
    }

    pub fn group(&self) -> Option<String> {
        self.state.lock().expect("instance state poisoned").group.clone()
    }

    pub fn set_group(&self, group_id: Option<String>) {
        self.state.lock().expect("instance state poisoned").group = group_id;
    }

    pub fn workdir(&self) -> Option<PathBuf> {
        self.state.lock().expect("instance state poisoned").workdir.clone()
    }

    pub fn set_workdir(&self, workdir: PathBuf) {
        self.state.lock().expect("instance state poisoned").workdir = Some(workdir);
    }

    pub fn waits_for(&self) -> Option<String> {
        self.state.lock().expect("instance state poisoned").waits_for.clone()
    }

    pub fn set_waits_for(&self, parent_id: Option<String>) {
        self.state.lock().expect("instance state poisoned").waits_for = parent_id;
    }

    /// Apply a status transition if it is an edge of the state machine
    ///
    /// Rejected transitions warn and leave the status untouched (contract
    /// violations never panic). Returns the `from` status on success.
    pub(crate) fn try_transition(&self, to: InstanceStatus) -> Option<InstanceStatus> {
        let mut state = self.state.lock().expect("instance state poisoned");
        let from = state.status;
        if !transition_allowed(from, to) {
            warn!(id = %self.id, %from, %to, "rejected status transition");
            return None;
        }
        state.status = to;
        Some(from)
    }

    /// Record new output activity
    pub(crate) fn touch_activity(&self) {
        self.state.lock().expect("instance state poisoned").last_activity = Some(Instant::now());
    }

    /// Reset run timers at (re)launch
    pub(crate) fn note_started(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("instance state poisoned");
        state.started_at = Some(now);
        state.last_activity = Some(now);
        state.tail_fingerprint = 0;
        state.fingerprint_since = Some(now);
        state.len_at_fingerprint = self.buffer.len();
    }

    /// Evaluate timeout conditions; at most one fires, in declaration order
    pub(crate) fn due_timeout(&self) -> Option<crate::domain::TimeoutKind> {
        use crate::domain::TimeoutKind;

        let now = Instant::now();
        let tail_fp = fingerprint(&self.buffer.tail_bytes(self.timeouts.stale_window_bytes));
        let buf_len = self.buffer.len();

        let mut state = self.state.lock().expect("instance state poisoned");
        if state.status != InstanceStatus::Working {
            return None;
        }

        if let Some(last) = state.last_activity
            && now.duration_since(last) > self.timeouts.activity
        {
            return Some(TimeoutKind::Activity);
        }

        if tail_fp != state.tail_fingerprint {
            state.tail_fingerprint = tail_fp;
            state.fingerprint_since = Some(now);
            state.len_at_fingerprint = buf_len;
        } else if let Some(since) = state.fingerprint_since
            && buf_len > state.len_at_fingerprint
            && now.duration_since(since) > self.timeouts.stale
        {
            return Some(TimeoutKind::Stale);
        }

        if let Some(started) = state.started_at
            && now.duration_since(started) > self.timeouts.completion
        {
            return Some(TimeoutKind::Completion);
        }

        None
    }
}

/// 64-bit fingerprint of the buffer tail for stale detection
fn fingerprint(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new("test task", 4096, TimeoutConfig::default())
    }

    #[test]
    fn test_new_instance_is_pending() {
        let inst = instance();
        assert_eq!(inst.status(), InstanceStatus::Pending);
        assert!(inst.workdir().is_none());
        assert!(inst.id.contains("-inst-"));
    }

    #[test]
    fn test_try_transition_valid() {
        let inst = instance();
        assert_eq!(inst.try_transition(InstanceStatus::Working), Some(InstanceStatus::Pending));
        assert_eq!(inst.status(), InstanceStatus::Working);
    }

    #[test]
    fn test_try_transition_rejected() {
        let inst = instance();
        assert!(inst.try_transition(InstanceStatus::Paused).is_none());
        assert_eq!(inst.status(), InstanceStatus::Pending);
    }

    #[test]
    fn test_activity_timeout_fires() {
        let inst = Instance::new(
            "t",
            4096,
            TimeoutConfig {
                activity: Duration::from_millis(0),
                ..Default::default()
            },
        );
        inst.try_transition(InstanceStatus::Working);
        inst.note_started();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(inst.due_timeout(), Some(crate::domain::TimeoutKind::Activity));
    }

    #[test]
    fn test_no_timeout_when_not_working() {
        let inst = Instance::new(
            "t",
            4096,
            TimeoutConfig {
                activity: Duration::from_millis(0),
                ..Default::default()
            },
        );
        assert_eq!(inst.due_timeout(), None);
    }

    #[test]
    fn test_completion_timeout_fires() {
        let inst = Instance::new(
            "t",
            4096,
            TimeoutConfig {
                activity: Duration::from_secs(3600),
                stale: Duration::from_secs(3600),
                completion: Duration::from_millis(0),
                ..Default::default()
            },
        );
        inst.try_transition(InstanceStatus::Working);
        inst.note_started();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(inst.due_timeout(), Some(crate::domain::TimeoutKind::Completion));
    }

    #[test]
    fn test_stale_timeout_requires_growth() {
        let inst = Instance::new(
            "t",
            1 << 20,
            TimeoutConfig {
                activity: Duration::from_secs(3600),
                stale: Duration::from_millis(10),
                completion: Duration::from_secs(3600),
                stale_window_bytes: 4,
            },
        );
        inst.try_transition(InstanceStatus::Working);
        inst.note_started();

        // Establish a fingerprint over the tail window
        inst.buffer.append("spinner-tail");
        assert_eq!(inst.due_timeout(), None);

        // Grow the buffer while keeping the trailing 4 bytes identical
        std::thread::sleep(Duration::from_millis(20));
        inst.buffer.append("xxxx-tail");
        inst.touch_activity();
        assert_eq!(inst.due_timeout(), Some(crate::domain::TimeoutKind::Stale));
    }

    #[test]
    fn test_activity_wins_tiebreak() {
        let inst = Instance::new(
            "t",
            4096,
            TimeoutConfig {
                activity: Duration::from_millis(0),
                stale: Duration::from_millis(0),
                completion: Duration::from_millis(0),
                ..Default::default()
            },
        );
        inst.try_transition(InstanceStatus::Working);
        inst.note_started();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(inst.due_timeout(), Some(crate::domain::TimeoutKind::Activity));
    }
}
