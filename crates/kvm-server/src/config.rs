//! TOML configuration model.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use shared::protocol::SliceCount;

pub const DEFAULT_CONFIG_PATH: &str = "kvm.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vnc: VncConfig,
    pub video: VideoConfig,
    pub keyboard: InputConfig,
    pub mouse: MouseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VncConfig {
    pub addr: String,
    /// Empty disables authentication.
    pub password: String,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5900".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoDriverType {
    #[default]
    Dummy,
    Shell,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    #[serde(rename = "type")]
    pub driver: VideoDriverType,
    /// For the shell driver: the capture command line.
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// JPEG quality, 0 selects the codec default.
    pub quality: u8,
    pub slice_count: SliceCount,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            driver: VideoDriverType::Dummy,
            src: String::new(),
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            quality: 0,
            slice_count: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputDriverType {
    #[default]
    None,
    Shell,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    #[serde(rename = "type")]
    pub driver: InputDriverType,
    /// For the shell driver: the bridge command line.
    pub src: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MouseConfig {
    #[serde(rename = "type")]
    pub driver: InputDriverType,
    pub src: String,
    pub cursor_x_scale: f64,
    pub cursor_y_scale: f64,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            driver: InputDriverType::None,
            src: String::new(),
            cursor_x_scale: 1.0,
            cursor_y_scale: 1.0,
        }
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
}
