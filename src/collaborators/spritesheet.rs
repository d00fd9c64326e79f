//! Sprite sheet assembly: frames pasted left to right into one RGBA strip.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use image::RgbaImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::CollaboratorError;

use super::{short_id, CallStatus, SheetAssembler, SheetOutput};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Written next to the sheet as `metadata.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SheetMetadata {
    pub character: String,
    pub run_id: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub num_frames: usize,
    pub frames: Vec<PathBuf>,
    pub sheet_path: PathBuf,
    pub timestamp: String,
}

/// Builds sheets under `<output_root>/<character>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct SpriteSheetAssembler {
    output_root: PathBuf,
    /// 1 keeps every frame, 2 every second frame, and so on.
    stride: usize,
}

impl SpriteSheetAssembler {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            stride: 1,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// Frame images directly inside `dir`, sorted by name, thinned by the
    /// stride.
    pub fn collect_frames(&self, dir: &Path) -> Result<Vec<PathBuf>, CollaboratorError> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| FRAME_EXTENSIONS.iter().any(|f| f.eq_ignore_ascii_case(e)))
                        .unwrap_or(false)
            })
            .collect();
        frames.sort();

        Ok(frames.into_iter().step_by(self.stride).collect())
    }
}

fn sheet_width(frame_width: u32, count: usize) -> Result<u32, CollaboratorError> {
    u32::try_from(count)
        .ok()
        .and_then(|n| frame_width.checked_mul(n))
        .ok_or_else(|| {
            CollaboratorError::InvalidInput(format!(
                "sprite sheet too wide: {} frames of width {}",
                count, frame_width
            ))
        })
}

/// Pastes `frames` side by side. Every cell takes the first frame's size.
fn build_sheet(frames: &[PathBuf]) -> Result<(RgbaImage, u32, u32), CollaboratorError> {
    let images = frames
        .iter()
        .map(|path| image::open(path).map(|img| img.to_rgba8()))
        .collect::<Result<Vec<_>, _>>()?;

    let (width, height) = images
        .first()
        .map(|img| img.dimensions())
        .ok_or_else(|| CollaboratorError::InvalidInput("no frames to assemble".to_string()))?;

    let mut sheet = RgbaImage::new(sheet_width(width, images.len())?, height);
    for (i, img) in images.iter().enumerate() {
        image::imageops::replace(&mut sheet, img, (i as u32 * width) as i64, 0);
    }

    Ok((sheet, width, height))
}

fn write_sheet(
    frames: Vec<PathBuf>,
    output_dir: PathBuf,
    character: String,
    run_id: String,
) -> Result<SheetMetadata, CollaboratorError> {
    let (sheet, frame_width, frame_height) = build_sheet(&frames)?;

    std::fs::create_dir_all(&output_dir)?;
    let sheet_path = output_dir.join("sheet.png");
    sheet.save(&sheet_path)?;

    let metadata = SheetMetadata {
        character,
        run_id,
        frame_width,
        frame_height,
        num_frames: frames.len(),
        frames,
        sheet_path,
        timestamp: Utc::now().to_rfc3339(),
    };
    std::fs::write(
        output_dir.join("metadata.json"),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    Ok(metadata)
}

#[async_trait]
impl SheetAssembler for SpriteSheetAssembler {
    async fn assemble(&self, sprite_dir: &Path, character: &str) -> Result<SheetOutput, CollaboratorError> {
        let frames = self.collect_frames(sprite_dir)?;
        if frames.is_empty() {
            warn!(dir = %sprite_dir.display(), "No frames after stride filtering");
            return Ok(SheetOutput::error("no frames after stride filtering"));
        }

        let run_id = short_id();
        let output_dir = self.output_root.join(character).join(&run_id);
        info!(
            character = %character,
            frames = frames.len(),
            stride = self.stride,
            "Assembling sprite sheet"
        );

        let character = character.to_string();
        let metadata =
            tokio::task::spawn_blocking(move || write_sheet(frames, output_dir, character, run_id))
                .await??;

        Ok(SheetOutput {
            status: CallStatus::Success,
            sheet: Some(metadata.sheet_path),
            frame_count: metadata.num_frames,
            message: None,
        })
    }
}
