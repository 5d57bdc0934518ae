//! Application settings and configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Application settings
///
/// Persistent configuration for the Huddle messaging core. Settings are
/// stored in JSON format and can be loaded/saved from disk.
///
/// # Example
/// ```rust,no_run
/// use huddle::config::Settings;
///
/// // Load settings (returns default if file doesn't exist)
/// let mut settings = Settings::load("settings.json").expect("Failed to load");
///
/// // Flip notifications off and auto-save
/// settings.update_notifications(false, "settings.json").expect("Failed to update");
///
/// println!("Storage path: {}", settings.storage_path);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Storage path for the conversation database
    pub storage_path: String,
    /// Enable desktop notifications
    pub enable_notifications: bool,
    /// Subscribe sessions to their per-user inbox topic instead of the
    /// global insert feed
    pub per_user_topics: bool,
}

impl Settings {
    /// Load settings from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the settings file
    ///
    /// # Returns
    /// The loaded settings, or default settings if file doesn't exist
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            // Return default settings if file doesn't exist
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read settings: {}", e)))?;

        // Handle empty file (return defaults)
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse settings: {}", e)))?;

        Ok(settings)
    }

    /// Save settings to a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to save the settings file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create settings directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Update the notification switch and auto-save
    ///
    /// # Arguments
    /// * `enabled` - Whether desktop notifications are shown
    /// * `save_path` - Path to save the updated settings
    pub fn update_notifications<P: AsRef<std::path::Path>>(
        &mut self,
        enabled: bool,
        save_path: P,
    ) -> Result<()> {
        self.enable_notifications = enabled;
        self.save(save_path)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_path: "./data".to_string(),
            enable_notifications: true,
            per_user_topics: false,
        }
    }
}
