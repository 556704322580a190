use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::propfile::PropertyFile;

/// Extensions preloaded alongside composite resources (scenes, prefabs)
pub const DEFAULT_PRELOAD_EXTENSIONS: &[&str] = &[
    ".mat", ".png", ".jpg", ".jpeg", ".tga", ".psd", ".exr", ".hdr", ".tif", ".tiff", ".bmp",
    ".dds", ".ktx",
];

pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(8);
pub const DEFAULT_SCENE_DEPENDENCY_WEIGHT: f32 = 0.3;
pub const DEFAULT_ASSET_DEPENDENCY_WEIGHT: f32 = 0.5;

/// Where resources come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Addresses resolve through the manifest to content packages
    #[default]
    Packaged,
    /// Addresses map straight to files under the source directory
    Direct,
}

/// Engine settings that can be set via config file or CLI
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub load_mode: LoadMode,
    /// Directory holding packages, the manifest and version files
    pub build_dir: PathBuf,
    /// Mirror directory packages are uploaded to
    pub upload_dir: PathBuf,
    /// Loose source files used in direct mode
    pub source_dir: PathBuf,
    /// Manifest (and version record) name
    pub manifest_name: String,

    // Frame budget
    pub time_slice: Duration,
    pub max_items_per_frame: Option<usize>,

    // Progress weighting of the dependency phase
    pub scene_dependency_weight: f32,
    pub asset_dependency_weight: f32,

    pub preload_extensions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            load_mode: LoadMode::Packaged,
            build_dir: PathBuf::from("build"),
            upload_dir: PathBuf::from("upload"),
            source_dir: PathBuf::from("content"),
            manifest_name: "main".to_string(),
            time_slice: DEFAULT_TIME_SLICE,
            max_items_per_frame: None,
            scene_dependency_weight: DEFAULT_SCENE_DEPENDENCY_WEIGHT,
            asset_dependency_weight: DEFAULT_ASSET_DEPENDENCY_WEIGHT,
            preload_extensions: DEFAULT_PRELOAD_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Path of the manifest file inside the build directory
    pub fn manifest_path(&self) -> PathBuf {
        self.build_dir
            .join(crate::resource::manifest::manifest_file_name(&self.manifest_name))
    }

    /// Whether an address names a file worth preloading
    pub fn is_preload_candidate(&self, address: &str) -> bool {
        let lower = address.to_ascii_lowercase();
        self.preload_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }

    /// Apply the settings found in a property file on top of `self`
    pub fn apply_properties(mut self, props: &PropertyFile) -> Result<Self> {
        if let Some(mode) = props.get("LOAD_MODE") {
            self.load_mode = parse_load_mode(mode)?;
        }
        if let Some(dir) = props.get("BUILD_DIR") {
            self.build_dir = PathBuf::from(dir);
        }
        if let Some(dir) = props.get("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = props.get("SOURCE_DIR") {
            self.source_dir = PathBuf::from(dir);
        }
        if let Some(name) = props.get("MANIFEST") {
            if name.is_empty() {
                anyhow::bail!("MANIFEST must not be empty");
            }
            self.manifest_name = name.to_string();
        }
        if let Some(ms) = props.get("TIME_SLICE_MS") {
            self.time_slice = parse_time_slice(ms)?;
        }
        if let Some(max) = props
            .get_parsed::<usize>("MAX_ITEMS_PER_FRAME")
            .context("Invalid MAX_ITEMS_PER_FRAME")?
        {
            // 0 means unlimited
            self.max_items_per_frame = (max > 0).then_some(max);
        }
        if let Some(weight) = props.get("SCENE_DEPENDENCY_WEIGHT") {
            self.scene_dependency_weight =
                parse_weight(weight).context("Invalid SCENE_DEPENDENCY_WEIGHT")?;
        }
        if let Some(weight) = props.get("ASSET_DEPENDENCY_WEIGHT") {
            self.asset_dependency_weight =
                parse_weight(weight).context("Invalid ASSET_DEPENDENCY_WEIGHT")?;
        }
        if let Some(list) = props.get("PRELOAD_EXTENSIONS") {
            self.preload_extensions = parse_extensions(list);
        }
        Ok(self)
    }
}

/// Load configuration from a property file; no path means defaults
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = EngineConfig::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let props = PropertyFile::load(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    config
        .apply_properties(&props)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

/// Parse a load mode name (`packaged` or `direct`)
pub fn parse_load_mode(s: &str) -> Result<LoadMode> {
    match s.to_lowercase().as_str() {
        "packaged" | "package" | "bundle" => Ok(LoadMode::Packaged),
        "direct" | "source" | "editor" => Ok(LoadMode::Direct),
        _ => anyhow::bail!("Invalid load mode: {}. Valid options: packaged, direct", s),
    }
}

/// Parse a progress weight, which must lie in 0.0..=1.0
pub fn parse_weight(s: &str) -> Result<f32> {
    let weight: f32 = s.trim().parse().context("Invalid weight value")?;

    if !(0.0..=1.0).contains(&weight) {
        anyhow::bail!("Weight out of range (0.0 to 1.0)");
    }

    Ok(weight)
}

/// Parse a frame time slice given in milliseconds
pub fn parse_time_slice(s: &str) -> Result<Duration> {
    let ms: u64 = s.trim().parse().context("Invalid time slice value")?;

    if ms == 0 {
        anyhow::bail!("Time slice must be positive");
    }

    Ok(Duration::from_millis(ms))
}

/// Parse a comma or space separated extension list into `.ext` form
pub fn parse_extensions(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|ext| !ext.is_empty() && *ext != ".")
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect()
}
