//! Configuration for batch runs.

use std::path::PathBuf;

use crate::collaborators::comfyui::DEFAULT_COMFYUI_URL;
use crate::pipeline::config::{parse_env_value, ConfigError};

use super::store::DEFAULT_LOCK_SHARDS;
use super::worker_pool::DEFAULT_NUM_WORKERS;

/// Where batches live and how their collaborators are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Directory holding one `<batch_id>/batch.json` per batch.
    pub batch_root: PathBuf,
    pub num_workers: usize,
    pub lock_shards: usize,
    /// Style preset table (`{default, presets}`).
    pub style_presets: PathBuf,
    pub motion_interpreter: String,
    pub motion_script: PathBuf,
    pub motion_output_root: PathBuf,
    pub comfyui_url: String,
    /// Workflow graph posted to the image service.
    pub sprite_workflow: PathBuf,
    pub sprite_output_root: PathBuf,
    pub sheet_output_root: PathBuf,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_root: PathBuf::from("./batches"),
            num_workers: DEFAULT_NUM_WORKERS,
            lock_shards: DEFAULT_LOCK_SHARDS,
            style_presets: PathBuf::from("./workflows/style_presets.json"),
            motion_interpreter: "python".to_string(),
            motion_script: PathBuf::from("./hy-motion/inference.py"),
            motion_output_root: PathBuf::from("./output/animations"),
            comfyui_url: DEFAULT_COMFYUI_URL.to_string(),
            sprite_workflow: PathBuf::from("./workflows/sprite_workflow.json"),
            sprite_output_root: PathBuf::from("./output/sprites"),
            sheet_output_root: PathBuf::from("./output/sheets"),
        }
    }
}

impl BatchSettings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ASSET_FORGE_BATCH_ROOT`: batch directory (default: ./batches)
    /// - `ASSET_FORGE_WORKERS`: worker count (default: 3)
    /// - `ASSET_FORGE_LOCK_SHARDS`: batch lock shards (default: 64)
    /// - `ASSET_FORGE_STYLE_PRESETS`: style preset file
    /// - `ASSET_FORGE_MOTION_INTERPRETER`: interpreter for the motion script (default: python)
    /// - `ASSET_FORGE_MOTION_SCRIPT`: motion inference script
    /// - `ASSET_FORGE_COMFYUI_URL`: image service URL (default: http://127.0.0.1:8188)
    /// - `ASSET_FORGE_SPRITE_WORKFLOW`: workflow graph file
    /// - `ASSET_FORGE_OUTPUT_ROOT`: parent of the animations, sprites and sheets outputs
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(val) = std::env::var("ASSET_FORGE_BATCH_ROOT") {
            settings.batch_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_WORKERS") {
            settings.num_workers = parse_env_value(&val, "ASSET_FORGE_WORKERS")?;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_LOCK_SHARDS") {
            settings.lock_shards = parse_env_value(&val, "ASSET_FORGE_LOCK_SHARDS")?;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_STYLE_PRESETS") {
            settings.style_presets = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_MOTION_INTERPRETER") {
            settings.motion_interpreter = val;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_MOTION_SCRIPT") {
            settings.motion_script = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_COMFYUI_URL") {
            settings.comfyui_url = val;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_SPRITE_WORKFLOW") {
            settings.sprite_workflow = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_OUTPUT_ROOT") {
            settings = settings.with_output_root(val);
        }

        Ok(settings)
    }

    /// Sets the batch root.
    pub fn with_batch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.batch_root = root.into();
        self
    }

    /// Sets the worker count.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Places the animation, sprite and sheet outputs under one root.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.motion_output_root = root.join("animations");
        self.sprite_output_root = root.join("sprites");
        self.sheet_output_root = root.join("sheets");
        self
    }
}
