use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core_modules::background_model::KnnConfig;
use crate::core_modules::blob_extractor::DenoiseConfig;
use crate::error::TrackingError;

pub const CONFIG_ENV: &str = "ONTRACK_CONFIG";
pub const FONT_ENV: &str = "ONTRACK_FONT";

const DEFAULT_WRITE_VIDEO: bool = true;

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    knn: Option<KnnConfig>,
    denoise: Option<DenoiseConfig>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    write_video: Option<bool>,
    font_path: Option<PathBuf>,
}

/// What a session writes besides the trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub write_video: bool,
    /// Font for the overlay text. Without one, annotated frames carry no text.
    pub font_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_video: DEFAULT_WRITE_VIDEO,
            font_path: None,
        }
    }
}

/// Tuning of a tracking session. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerConfig {
    pub knn: KnnConfig,
    pub denoise: DenoiseConfig,
    pub output: OutputConfig,
}

impl TrackerConfig {
    /// Loads `path`, or the file named by `ONTRACK_CONFIG`, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, TrackingError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                log::info!("loading configuration from {}", path.display());
                read_config_file(&path)?
            }
            None => TrackerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses a TOML document; absent keys take their default values.
    pub fn from_toml_str(text: &str) -> Result<Self, TrackingError> {
        let file: TrackerConfigFile =
            toml::from_str(text).map_err(|e| TrackingError::Config(e.to_string()))?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Self {
        let output = file.output.unwrap_or_default();
        Self {
            knn: file.knn.unwrap_or_default(),
            denoise: file.denoise.unwrap_or_default(),
            output: OutputConfig {
                write_video: output.write_video.unwrap_or(DEFAULT_WRITE_VIDEO),
                font_path: output.font_path,
            },
        }
    }

    fn apply_env(&mut self) {
        if let Ok(font) = std::env::var(FONT_ENV) {
            if !font.trim().is_empty() {
                self.output.font_path = Some(PathBuf::from(font));
            }
        }
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        self.knn.validate()?;
        self.denoise.validate()?;
        if self.knn.detect_shadows && self.knn.shadow_value > self.denoise.threshold {
            return Err(TrackingError::Config(format!(
                "knn.shadow_value {} is above denoise.threshold {}; shadows would be tracked",
                self.knn.shadow_value, self.denoise.threshold
            )));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile, TrackingError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TrackingError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    toml::from_str(&text)
        .map_err(|e| TrackingError::Config(format!("{}: {e}", path.display())))
}
