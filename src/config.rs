//! Configuration types for the dialogue engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for a dialogue session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Conversation traversal and retry settings.
    pub conversation: ConversationConfig,
    /// Listening window and acoustic classification settings.
    pub listen: ListenConfig,
    /// Phase watchdog settings.
    pub guard: GuardConfig,
}

/// Conversation-level behavior flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Whether the low-sound escalation message is spoken on a low-sound
    /// mismatch. Opt-in: when disabled, low-sound mismatches skip straight
    /// past the low-sound guidance in the retry cascade.
    pub enable_low_sound_message: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            enable_low_sound_message: false,
        }
    }
}

/// Listening window and sound-level classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Minimum listening window in ms. A session that ends before this
    /// window has elapsed is classified as stopped-too-early.
    pub min_listen_window_ms: u64,
    /// RMS below this value is classified as effectively no sound.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.002: default, only near-silence counts as quiet
    ///   - 0.005: stricter, soft background noise still counts as quiet
    pub quiet_threshold: f32,
    /// RMS below this value (but above `quiet_threshold`) is classified
    /// as low sound.
    pub low_threshold: f32,
    /// Consecutive samples at the same level before the classifier commits.
    pub commit_samples: u32,
    /// Silent retries allowed for transport errors (network, audio
    /// hardware) before the mismatch policy takes over.
    pub max_transport_retries: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            min_listen_window_ms: 2_000,
            quiet_threshold: 0.002,
            low_threshold: 0.01,
            commit_samples: 5,
            max_transport_retries: 3,
        }
    }
}

/// Phase watchdog configuration.
///
/// Every speaking and listening phase is accompanied by a cancellable
/// delayed task; if no completion signal arrives within the ceiling, the
/// phase is force-stopped and treated as an engine error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Hard ceiling in seconds for continuous speech output.
    pub speak_ceiling_secs: u64,
    /// Hard ceiling in seconds for a single listening turn.
    pub listen_ceiling_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            speak_ceiling_secs: 60,
            listen_ceiling_secs: 30,
        }
    }
}

impl DialogueConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::DialogueError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::DialogueError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/colloquy/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("colloquy").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("colloquy")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/colloquy-config/config.toml")
        }
    }
}
