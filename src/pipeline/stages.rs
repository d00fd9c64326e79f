//! Stage registry: the static table of pipeline stages and profile orderings.
//!
//! A stage is described purely as data: which profiles need it, which script
//! implements it, which host runs the script, where it reads from and writes
//! to, and how to tell that its work is already done. Profile orderings are
//! data too, so a new profile is a registry entry (or a JSON file loaded with
//! [`StageRegistry::from_json_file`]) rather than new code.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::config::ConfigError;

/// Directory every project keeps its source meshes in.
pub const INPUT_DIR: &str = "0_input";

/// File extensions accepted as a source mesh.
pub const MESH_EXTENSIONS: &[&str] = &["obj", "fbx"];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "exr"];

/// Which collaborator hosts a stage script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageHost {
    /// Runs inside the authoring engine in background mode.
    Engine,
    /// Runs as a plain interpreter script.
    Interpreter,
}

/// Decides whether a stage's output directory already holds finished work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionCheck {
    /// Any entry at all.
    NonEmpty,
    /// At least one file with one of these extensions, searched recursively.
    AnyWithExtension { extensions: Vec<String> },
    /// A specific file relative to the output directory.
    ContainsFile { path: String },
}

impl CompletionCheck {
    /// Convenience constructor for [`CompletionCheck::AnyWithExtension`].
    pub fn any_with_extension(extensions: &[&str]) -> Self {
        Self::AnyWithExtension {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Returns true when `output_dir` satisfies this check.
    pub fn is_complete(&self, output_dir: &Path) -> bool {
        match self {
            CompletionCheck::NonEmpty => dir_has_entries(output_dir),
            CompletionCheck::AnyWithExtension { extensions } => {
                let exts: Vec<&str> = extensions.iter().map(String::as_str).collect();
                find_with_extension(output_dir, &exts).is_some()
            }
            CompletionCheck::ContainsFile { path } => output_dir.join(path).is_file(),
        }
    }
}

/// Returns true when `dir` exists and has at least one entry.
pub fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Finds the first file under `dir` whose extension is in `extensions`
/// (case-insensitive), in sorted walk order.
pub fn find_with_extension(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
}

/// Immutable description of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Short identifier used in orderings and logs (e.g. `rigging`).
    pub key: String,
    /// Human-readable name.
    pub name: String,
    /// Profiles this stage is required for.
    pub required_profiles: BTreeSet<String>,
    /// Script reference, relative to the tools directory.
    pub script: String,
    pub host: StageHost,
    /// Input directory, relative to the project root.
    pub input_dir: String,
    /// Per-profile overrides of `input_dir`.
    #[serde(default)]
    pub profile_inputs: BTreeMap<String, String>,
    /// Output directory, relative to the project root.
    pub output_dir: String,
    #[serde(default)]
    pub optional: bool,
    /// Config section whose `enabled` flag gates an optional stage.
    #[serde(default)]
    pub enable_section: Option<String>,
    pub completion: CompletionCheck,
}

impl StageDefinition {
    /// Creates a required stage with a non-empty completion check.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        host: StageHost,
        script: impl Into<String>,
        input_dir: impl Into<String>,
        output_dir: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            required_profiles: BTreeSet::new(),
            script: script.into(),
            host,
            input_dir: input_dir.into(),
            profile_inputs: BTreeMap::new(),
            output_dir: output_dir.into(),
            optional: false,
            enable_section: None,
            completion: CompletionCheck::NonEmpty,
        }
    }

    /// Sets the profiles this stage is required for.
    pub fn for_profiles(mut self, profiles: &[&str]) -> Self {
        self.required_profiles = profiles.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Overrides the input directory for one profile.
    pub fn with_profile_input(mut self, profile: &str, input_dir: &str) -> Self {
        self.profile_inputs
            .insert(profile.to_string(), input_dir.to_string());
        self
    }

    /// Marks the stage optional, gated by `<section>.enabled`.
    pub fn optional_behind(mut self, section: &str) -> Self {
        self.optional = true;
        self.enable_section = Some(section.to_string());
        self
    }

    /// Sets the completion check.
    pub fn with_completion(mut self, completion: CompletionCheck) -> Self {
        self.completion = completion;
        self
    }

    /// Whether this stage is required for `profile`.
    pub fn required_for(&self, profile: &str) -> bool {
        self.required_profiles.contains(profile)
    }

    /// Input directory under `profile`.
    pub fn input_dir_for(&self, profile: &str) -> &str {
        self.profile_inputs
            .get(profile)
            .map(String::as_str)
            .unwrap_or(&self.input_dir)
    }
}

/// The stage table plus the stage ordering of each profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
    profiles: BTreeMap<String, Vec<String>>,
}

impl StageRegistry {
    /// Builds a registry, checking that keys are unique and that every
    /// ordering only names registered stages.
    pub fn new(
        stages: Vec<StageDefinition>,
        profiles: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.key.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.key.clone()));
            }
        }

        let registry = Self {
            stages,
            profiles: BTreeMap::new(),
        };

        profiles
            .into_iter()
            .try_fold(registry, |registry, (name, order)| {
                registry.with_profile(name, order)
            })
    }

    /// The built-in table for the `skeletal` and `static` profiles.
    pub fn builtin() -> Self {
        let stages = vec![
            StageDefinition::new(
                "prep",
                "Mesh Preparation",
                StageHost::Engine,
                "prepare_mesh.py",
                INPUT_DIR,
                "0_input/prepared",
            )
            .for_profiles(&["skeletal", "static"])
            .with_completion(CompletionCheck::any_with_extension(&["fbx"])),
            StageDefinition::new(
                "textures",
                "Texture Generation",
                StageHost::Interpreter,
                "generate_textures.py",
                INPUT_DIR,
                "1_textures",
            )
            .for_profiles(&["skeletal", "static"])
            .with_completion(CompletionCheck::any_with_extension(IMAGE_EXTENSIONS)),
            StageDefinition::new(
                "rigging",
                "Rigging",
                StageHost::Engine,
                "auto_rig.py",
                INPUT_DIR,
                "2_rig",
            )
            .for_profiles(&["skeletal"])
            .with_completion(CompletionCheck::any_with_extension(&["fbx", "blend"])),
            StageDefinition::new(
                "animation",
                "Animation",
                StageHost::Engine,
                "hy_motion.py",
                "2_rig",
                "3_animation",
            )
            .for_profiles(&["skeletal"])
            .with_completion(CompletionCheck::any_with_extension(&["fbx", "glb", "bvh"])),
            StageDefinition::new(
                "export",
                "Export",
                StageHost::Interpreter,
                "export_package.py",
                "3_animation",
                "4_export",
            )
            .for_profiles(&["skeletal", "static"])
            .with_profile_input("static", "1_textures")
            .with_completion(CompletionCheck::ContainsFile {
                path: "package/project.json".to_string(),
            }),
            StageDefinition::new(
                "sprites",
                "Sprite Generation",
                StageHost::Engine,
                "generate_sprites.py",
                "3_animation",
                "4_export/sprites",
            )
            .for_profiles(&["skeletal", "static"])
            .with_profile_input("static", "1_textures")
            .optional_behind("sprite_generation")
            .with_completion(CompletionCheck::any_with_extension(IMAGE_EXTENSIONS)),
        ];

        let profiles = BTreeMap::from([
            (
                "skeletal".to_string(),
                ["prep", "textures", "rigging", "animation", "export", "sprites"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            (
                "static".to_string(),
                ["prep", "textures", "export", "sprites"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        ]);

        Self { stages, profiles }
    }

    /// Loads a registry from a JSON document with the same shape as the
    /// serialized form of [`StageRegistry`].
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let raw: StageRegistry =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(raw.stages, raw.profiles)
    }

    /// Adds or replaces the ordering of one profile.
    pub fn with_profile(
        mut self,
        name: impl Into<String>,
        order: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if let Some(missing) = order.iter().find(|key| self.stage(key).is_none()) {
            return Err(ConfigError::UnknownStage {
                profile: name,
                stage: missing.clone(),
            });
        }
        self.profiles.insert(name, order);
        Ok(self)
    }

    /// Looks up a stage by key.
    pub fn stage(&self, key: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// All stages in registration order.
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Names of all known profiles.
    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// The ordered stages of `profile`.
    pub fn order_for(&self, profile: &str) -> Result<Vec<&StageDefinition>, ConfigError> {
        let order = self
            .profiles
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;

        Ok(order.iter().filter_map(|key| self.stage(key)).collect())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
