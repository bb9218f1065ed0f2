//! Configuration types for advnin models

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Width of the first convolution in every NIN stage, and of the latent code.
pub const NIN_CHANNELS: usize = 192;
/// Width of the second convolution in the first stage.
pub const NIN_CHANNELS_2: usize = 160;
/// Width of the third convolution in the first stage.
pub const NIN_CHANNELS_3: usize = 96;

/// NetworkInNetwork backbone configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NinConfig {
    /// Channels of the input images
    #[serde(default = "default_in_channels")]
    pub in_channels: usize,

    /// Number of convolutional stages (at least 3)
    #[serde(default = "default_num_stages")]
    pub num_stages: usize,

    /// Append an average pool to the third stage when more stages follow it
    #[serde(default = "default_use_avg_on_conv3")]
    pub use_avg_on_conv3: bool,

    /// Scale applied to the latent standard deviation when sampling
    #[serde(default = "default_latent_noise_scale")]
    pub latent_noise_scale: f64,

    /// Batch norm epsilon
    #[serde(default = "default_bn_eps")]
    pub bn_eps: f64,

    /// Batch norm running-stat momentum
    #[serde(default = "default_bn_momentum")]
    pub bn_momentum: f64,
}

impl Default for NinConfig {
    fn default() -> Self {
        Self {
            in_channels: default_in_channels(),
            num_stages: default_num_stages(),
            use_avg_on_conv3: default_use_avg_on_conv3(),
            latent_noise_scale: default_latent_noise_scale(),
            bn_eps: default_bn_eps(),
            bn_momentum: default_bn_momentum(),
        }
    }
}

impl NinConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_stages < 3 {
            return Err(Error::ConfigError(format!(
                "num_stages must be at least 3, got {}",
                self.num_stages
            )));
        }
        if self.in_channels == 0 {
            return Err(Error::ConfigError(
                "in_channels must be positive".to_string(),
            ));
        }
        if !self.latent_noise_scale.is_finite() || self.latent_noise_scale < 0.0 {
            return Err(Error::ConfigError(format!(
                "latent_noise_scale must be a non-negative finite number, got {}",
                self.latent_noise_scale
            )));
        }
        validate_batch_norm(self.bn_eps, self.bn_momentum)
    }

    /// Names of the selectable feature blocks, in network order.
    pub fn feature_names(&self) -> Vec<String> {
        (1..=self.num_stages)
            .map(|s| format!("conv{s}"))
            .chain(std::iter::once("classifier".to_string()))
            .collect()
    }

    /// Width of the pooled classifier features.
    pub fn classifier_channels(&self) -> usize {
        NIN_CHANNELS
    }
}

/// Two-branch regressor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorConfig {
    #[serde(default)]
    pub nin: NinConfig,

    /// Input width of the linear heads (both branches concatenated)
    #[serde(default = "default_regressor_indim")]
    pub indim: usize,

    #[serde(default = "default_regressor_num_classes")]
    pub num_classes: usize,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            nin: NinConfig::default(),
            indim: default_regressor_indim(),
            num_classes: default_regressor_num_classes(),
        }
    }
}

impl RegressorConfig {
    pub fn validate(&self) -> Result<()> {
        self.nin.validate()?;
        let expected = 2 * self.nin.classifier_channels();
        if self.indim != expected {
            return Err(Error::ConfigError(format!(
                "indim must equal twice the classifier width ({expected}), got {}",
                self.indim
            )));
        }
        if self.num_classes == 0 {
            return Err(Error::ConfigError(
                "num_classes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the NIN classifier with per-layer natural/adversarial batch norms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvdNinConfig {
    #[serde(default = "default_avd_num_classes")]
    pub num_classes: usize,

    #[serde(default = "default_in_channels")]
    pub in_channels: usize,

    /// Drop probability of the two dropout layers
    #[serde(default = "default_dropout")]
    pub dropout: f32,

    /// Standard deviation of the conv weight initialization
    #[serde(default = "default_conv_init_std")]
    pub conv_init_std: f64,

    #[serde(default = "default_bn_eps")]
    pub bn_eps: f64,

    #[serde(default = "default_bn_momentum")]
    pub bn_momentum: f64,
}

impl Default for AvdNinConfig {
    fn default() -> Self {
        Self {
            num_classes: default_avd_num_classes(),
            in_channels: default_in_channels(),
            dropout: default_dropout(),
            conv_init_std: default_conv_init_std(),
            bn_eps: default_bn_eps(),
            bn_momentum: default_bn_momentum(),
        }
    }
}

impl AvdNinConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(Error::ConfigError(
                "num_classes must be positive".to_string(),
            ));
        }
        if self.in_channels == 0 {
            return Err(Error::ConfigError(
                "in_channels must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::ConfigError(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        validate_batch_norm(self.bn_eps, self.bn_momentum)
    }
}

/// A model selection plus its parameters, as stored in a config file.
///
/// ```json
/// { "architecture": "regressor", "num_classes": 4, "nin": { "num_stages": 4 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "architecture", rename_all = "snake_case")]
pub enum ArchitectureConfig {
    Nin(NinConfig),
    Regressor(RegressorConfig),
    AvdNin(AvdNinConfig),
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self::Nin(NinConfig::default())
    }
}

impl ArchitectureConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Nin(cfg) => cfg.validate(),
            Self::Regressor(cfg) => cfg.validate(),
            Self::AvdNin(cfg) => cfg.validate(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nin(_) => "nin",
            Self::Regressor(_) => "regressor",
            Self::AvdNin(_) => "avd_nin",
        }
    }
}

/// Directory for checkpoints written without an explicit path.
pub fn default_checkpoint_dir() -> PathBuf {
    if let Ok(from_env) = std::env::var("ADVNIN_CHECKPOINT_DIR") {
        let trimmed = from_env.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("advnin")
        .join("checkpoints")
}

fn validate_batch_norm(eps: f64, momentum: f64) -> Result<()> {
    if eps.is_nan() || eps <= 0.0 {
        return Err(Error::ConfigError(format!(
            "bn_eps must be positive, got {eps}"
        )));
    }
    if !(0.0..=1.0).contains(&momentum) {
        return Err(Error::ConfigError(format!(
            "bn_momentum must be in [0, 1], got {momentum}"
        )));
    }
    Ok(())
}

fn default_in_channels() -> usize {
    3
}

fn default_num_stages() -> usize {
    3
}

fn default_use_avg_on_conv3() -> bool {
    true
}

fn default_latent_noise_scale() -> f64 {
    0.001
}

fn default_bn_eps() -> f64 {
    1e-5
}

fn default_bn_momentum() -> f64 {
    0.1
}

fn default_regressor_indim() -> usize {
    2 * NIN_CHANNELS
}

fn default_regressor_num_classes() -> usize {
    8
}

fn default_avd_num_classes() -> usize {
    10
}

fn default_dropout() -> f32 {
    0.5
}

fn default_conv_init_std() -> f64 {
    0.05
}
