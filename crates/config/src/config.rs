//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Project identity and on-disk roots shared by all pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project name; keys the output and log directory trees
    #[serde(default = "default_project_name")]
    pub name: String,
    /// Root directory holding per-tile input frame folders (tiling stage output)
    #[serde(default = "default_tiles_root")]
    pub tiles_root: PathBuf,
    /// Root directory for encoded bitstream containers
    #[serde(default = "default_encoded_root")]
    pub encoded_root: PathBuf,
    /// Root directory for segmented / multiplexed V3C output
    #[serde(default = "default_v3c_root")]
    pub v3c_root: PathBuf,
}

fn default_project_name() -> String {
    "default_project".to_string()
}

fn default_tiles_root() -> PathBuf {
    PathBuf::from("output/tiles")
}

fn default_encoded_root() -> PathBuf {
    PathBuf::from("output/encoded")
}

fn default_v3c_root() -> PathBuf {
    PathBuf::from("output/v3c")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            tiles_root: default_tiles_root(),
            encoded_root: default_encoded_root(),
            v3c_root: default_v3c_root(),
        }
    }
}

/// Encoding concurrency and quality configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    /// Total thread cap for encoding (0 = auto-detect logical cores)
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Worker threads handed to each encoder instance
    #[serde(default = "default_threads_per_instance")]
    pub threads_per_instance: u32,
    /// Quality triplets as `occ:geo:attr` QP strings, one encode per tile per entry
    #[serde(default = "default_qp_triplets")]
    pub qp_triplets: Vec<String>,
}

fn default_parallelism() -> u32 {
    1
}

fn default_threads_per_instance() -> u32 {
    1
}

fn default_qp_triplets() -> Vec<String> {
    vec!["24:32:43".to_string()]
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            threads_per_instance: default_threads_per_instance(),
            qp_triplets: default_qp_triplets(),
        }
    }
}

/// Segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentationConfig {
    /// Frames per output segment; must be a multiple of `encoder_gof`
    #[serde(default = "default_segment_size")]
    pub segment_size: u32,
    /// Encoder group-of-frames size; segment boundaries align to it
    #[serde(default = "default_encoder_gof")]
    pub encoder_gof: u32,
    /// Split segments into atlas/occp/geom/attr component streams
    #[serde(default = "default_split_components")]
    pub split_components: bool,
}

fn default_segment_size() -> u32 {
    16
}

fn default_encoder_gof() -> u32 {
    16
}

fn default_split_components() -> bool {
    true
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
            encoder_gof: default_encoder_gof(),
            split_components: default_split_components(),
        }
    }
}

/// External TMC2 encoder invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tmc2Config {
    /// Path to the PccAppEncoder binary
    #[serde(default = "default_tmc2_binary")]
    pub binary: PathBuf,
    /// Optional TMC2 configuration folder passed through to the encoder
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
    /// Geometry coordinate bitdepth (vox); None lets the pipeline infer it
    #[serde(default)]
    pub vox: Option<u32>,
}

fn default_tmc2_binary() -> PathBuf {
    PathBuf::from("PccAppEncoder")
}

impl Default for Tmc2Config {
    fn default() -> Self {
        Self {
            binary: default_tmc2_binary(),
            config_dir: None,
            vox: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub tmc2: Tmc2Config,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - V3CTK_PARALLELISM -> encode.parallelism
    /// - V3CTK_THREADS_PER_INSTANCE -> encode.threads_per_instance
    /// - V3CTK_SEGMENT_SIZE -> segmentation.segment_size
    /// - V3CTK_ENCODER_GOF -> segmentation.encoder_gof
    /// - V3CTK_SPLIT_COMPONENTS -> segmentation.split_components
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("V3CTK_PARALLELISM") {
            if let Ok(parallelism) = val.parse::<u32>() {
                self.encode.parallelism = parallelism;
            }
        }

        if let Ok(val) = env::var("V3CTK_THREADS_PER_INSTANCE") {
            if let Ok(threads) = val.parse::<u32>() {
                self.encode.threads_per_instance = threads;
            }
        }

        if let Ok(val) = env::var("V3CTK_SEGMENT_SIZE") {
            if let Ok(frames) = val.parse::<u32>() {
                self.segmentation.segment_size = frames;
            }
        }

        if let Ok(val) = env::var("V3CTK_ENCODER_GOF") {
            if let Ok(frames) = val.parse::<u32>() {
                self.segmentation.encoder_gof = frames;
            }
        }

        if let Ok(val) = env::var("V3CTK_SPLIT_COMPONENTS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.segmentation.split_components = true,
                "false" | "0" | "no" => self.segmentation.split_components = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
