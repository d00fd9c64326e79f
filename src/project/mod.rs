//! Project scaffolding.
//!
//! A project is a directory holding the numbered stage folders and a
//! `pipeline/config.json` that selects the profile:
//!
//! ```text
//! <workspace>/<name>/
//! ├── 0_input/{meshes,uv_layouts,references}
//! ├── 1_textures/
//! ├── 2_rig/
//! ├── 3_animation/
//! ├── 4_export/
//! └── pipeline/config.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::error::ProjectError;
use crate::pipeline::config::ProjectConfig;
use crate::pipeline::stages::{StageRegistry, INPUT_DIR};

const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 64;

const INPUT_SUBDIRS: &[&str] = &["meshes", "uv_layouts", "references"];
const STAGE_DIRS: &[&str] = &["1_textures", "2_rig", "3_animation", "4_export"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("Invalid regex for project names")
    })
}

/// Checks that a project name is usable as a directory name.
pub fn validate_project_name(name: &str) -> Result<(), ProjectError> {
    let invalid = |reason: &str| ProjectError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(invalid(&format!(
            "must be between {} and {} characters",
            MIN_NAME_LEN, MAX_NAME_LEN
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(invalid(
            "must start with a letter or digit and contain only letters, digits, '_' or '-'",
        ));
    }
    Ok(())
}

/// Creates a new project under `workspace` and returns its root.
///
/// # Errors
///
/// Fails on an invalid name, a profile the registry does not know, or an
/// existing project directory.
pub fn init_project(
    workspace: &Path,
    name: &str,
    profile: &str,
    registry: &StageRegistry,
) -> Result<PathBuf, ProjectError> {
    validate_project_name(name)?;
    if registry.order_for(profile).is_err() {
        return Err(ProjectError::UnknownProfile(profile.to_string()));
    }

    let root = workspace.join(name);
    if root.exists() {
        return Err(ProjectError::AlreadyExists(root));
    }

    for sub in INPUT_SUBDIRS {
        fs::create_dir_all(root.join(INPUT_DIR).join(sub))?;
    }
    for dir in STAGE_DIRS {
        fs::create_dir_all(root.join(dir))?;
    }

    let mut config = ProjectConfig::new(profile).with_section_enabled("sprite_generation", false);
    config
        .sections
        .insert("project_name".to_string(), Value::String(name.to_string()));
    write_config(&ProjectConfig::path_for(&root), &config)?;

    info!(project = %root.display(), profile = %profile, "Initialized project");
    Ok(root)
}

fn write_config(path: &Path, config: &ProjectConfig) -> Result<(), ProjectError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(config)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
