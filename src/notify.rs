//! User notifications for plan completion
//!
//! Logs the outcome and, when configured, spawns a system sound player.
//! Failures to play are logged and swallowed; notifications are best-effort.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::NotificationsConfig;

/// Best-effort completion alerts
pub struct Notifier {
    config: NotificationsConfig,
}

impl Notifier {
    pub fn new(config: NotificationsConfig) -> Self {
        Self { config }
    }

    /// Announce the end of a plan run
    pub fn plan_finished(&self, success: bool, detail: &str) {
        if !self.config.enabled {
            return;
        }
        if success {
            info!(detail, "plan completed");
        } else {
            warn!(detail, "plan failed");
        }
        if self.config.use_sound
            && let Some(path) = self.config.sound_path.clone()
        {
            play_sound(path);
        }
    }
}

fn play_sound(path: PathBuf) {
    let player = if cfg!(target_os = "macos") { "afplay" } else { "paplay" };
    match tokio::process::Command::new(player).arg(&path).spawn() {
        Ok(_) => {}
        Err(e) => warn!(player, path = %path.display(), error = %e, "failed to play notification sound"),
    }
}
