//! Contracts for the external generation collaborators a batch job calls.
//!
//! The job executor drives four collaborators in sequence:
//!
//! - **MotionSynthesizer**: turns a motion descriptor into a frames directory
//! - **StyleResolver**: looks a style id up in the preset table
//! - **SpriteSynthesizer**: renders sprite frames for a character in a style
//! - **SheetAssembler**: packs the sprite frames into one sheet
//!
//! Each call returns a status record rather than failing outright when the
//! collaborator ran and reported failure; `Err` is kept for calls that could
//! not be made at all. Production implementations live in the submodules.

pub mod comfyui;
pub mod motion;
pub mod spritesheet;
pub mod styles;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::scheduler::BatchSettings;

pub use comfyui::ComfyUiClient;
pub use motion::HyMotionCli;
pub use spritesheet::SpriteSheetAssembler;
pub use styles::StylePresetTable;

/// Status reported by a collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CallStatus::Success)
    }
}

/// Input of a motion synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionRequest {
    pub descriptor: String,
    pub seed: Option<u64>,
}

impl MotionRequest {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Result of a motion synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionOutput {
    pub status: CallStatus,
    pub run_id: String,
    pub output_dir: PathBuf,
    /// Directory of rendered frames, when the run produced one.
    pub frames_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Normalized style preset. Every field is present; missing ones take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    pub checkpoint: Option<String>,
    pub lora: Option<String>,
    pub vae: Option<String>,
    pub controlnet: Option<String>,
    pub ipadapter: Option<String>,
    pub sampler: String,
    pub cfg_scale: f64,
    pub prompt_template: Option<String>,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            checkpoint: None,
            lora: None,
            vae: None,
            controlnet: None,
            ipadapter: None,
            sampler: "euler".to_string(),
            cfg_scale: 1.0,
            prompt_template: None,
        }
    }
}

/// Input of a sprite synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpriteRequest {
    pub frames_dir: PathBuf,
    pub character: String,
    pub style: StyleSettings,
}

/// Result of a sprite synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteOutput {
    pub status: CallStatus,
    pub run_id: String,
    /// Directory the sprite frames were written to.
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a sheet assembly call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetOutput {
    pub status: CallStatus,
    pub sheet: Option<PathBuf>,
    #[serde(default)]
    pub frame_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SheetOutput {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CallStatus::Error,
            sheet: None,
            frame_count: 0,
            message: Some(message.into()),
        }
    }
}

/// Produces motion frames from a descriptor.
#[async_trait]
pub trait MotionSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &MotionRequest) -> Result<MotionOutput, CollaboratorError>;
}

/// Looks up style presets. `None` means the id is unknown.
pub trait StyleResolver: Send + Sync {
    fn resolve(&self, style_id: &str) -> Option<StyleSettings>;
}

/// Renders sprite frames for a character from motion frames.
#[async_trait]
pub trait SpriteSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpriteRequest) -> Result<SpriteOutput, CollaboratorError>;
}

/// Combines sprite frames into one sheet.
#[async_trait]
pub trait SheetAssembler: Send + Sync {
    async fn assemble(&self, sprite_dir: &Path, character: &str) -> Result<SheetOutput, CollaboratorError>;
}

/// The four collaborators a job executor calls.
#[derive(Clone)]
pub struct Collaborators {
    pub motion: Arc<dyn MotionSynthesizer>,
    pub styles: Arc<dyn StyleResolver>,
    pub sprites: Arc<dyn SpriteSynthesizer>,
    pub sheets: Arc<dyn SheetAssembler>,
}

impl Collaborators {
    pub fn new(
        motion: Arc<dyn MotionSynthesizer>,
        styles: Arc<dyn StyleResolver>,
        sprites: Arc<dyn SpriteSynthesizer>,
        sheets: Arc<dyn SheetAssembler>,
    ) -> Self {
        Self {
            motion,
            styles,
            sprites,
            sheets,
        }
    }

    /// Builds the production collaborators from batch settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the sprite workflow cannot be read or the HTTP
    /// client cannot be built.
    pub fn from_settings(settings: &BatchSettings) -> Result<Self, CollaboratorError> {
        let motion = HyMotionCli::new(&settings.motion_script, &settings.motion_output_root)
            .with_interpreter(&settings.motion_interpreter);
        let styles = StylePresetTable::load(&settings.style_presets);
        let sprites = ComfyUiClient::new(&settings.comfyui_url, &settings.sprite_output_root)?
            .with_workflow_file(&settings.sprite_workflow)?;
        let sheets = SpriteSheetAssembler::new(&settings.sheet_output_root);

        Ok(Self::new(
            Arc::new(motion),
            Arc::new(styles),
            Arc::new(sprites),
            Arc::new(sheets),
        ))
    }
}

/// First eight hex characters of a fresh v4 UUID.
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
