// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every table and field is optional; a missing file means defaults.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::backend::ContextFeatures;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    /// Optional device features, passed straight to device creation
    pub features: ContextFeatures,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk-toolkit".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Anisotropy passed to texture samplers
    pub max_anisotropy: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.1, 0.12, 1.0],
            max_frames_in_flight: 2,
            max_anisotropy: 1.0,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// env_logger filter used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Preferred present mode; the swapchain falls back if it is unavailable
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn context_features(&self) -> ContextFeatures {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.context_features(), ContextFeatures::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            title = "demo"

            [graphics]
            present_mode = "FIFO"

            [features]
            support_screenshots = true
            geometry_shader = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.height, 720);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);

        let features = config.context_features();
        assert!(features.support_screenshots);
        assert!(!features.geometry_shader);
        assert!(!features.tessellation_shader);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let config = Config::from_toml_str("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn bad_types_are_errors() {
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.debug.log_level, "info");
    }
}
