use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Audible alert raised once per successful run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self) -> Result<(), AlertError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("failed to run alert player {player}: {source}")]
    Spawn {
        player: String,
        source: std::io::Error,
    },
    #[error("alert player exited with {status}: {stderr}")]
    PlayerFailed { status: String, stderr: String },
}

/// Plays a sound file through an external player (`aplay alert.wav`).
pub struct CommandNotifier {
    player: String,
    sound_path: PathBuf,
}

impl CommandNotifier {
    pub fn new(player: impl Into<String>, sound_path: impl Into<PathBuf>) -> Self {
        Self {
            player: player.into(),
            sound_path: sound_path.into(),
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(&self) -> Result<(), AlertError> {
        let output = Command::new(&self.player)
            .arg(&self.sound_path)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AlertError::Spawn {
                player: self.player.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(AlertError::PlayerFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(sound = self.sound_path.display().to_string(), "alert played");
        Ok(())
    }
}

/// Used when alerts are disabled in the configuration.
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self) -> Result<(), AlertError> {
        debug!("alerts disabled, skipping");
        Ok(())
    }
}
