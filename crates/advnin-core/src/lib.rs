//! advnin Core - Network-in-Network backbones for adversarial propagation
//!
//! This crate defines convolutional model topologies on top of candle:
//!
//! - [`NetworkInNetwork`]: a NIN backbone with an auxiliary input batch norm
//!   chosen by image type, an encode / reparameterize / decode path and a
//!   global-average-pooling classifier block.
//! - [`Regressor`]: two backbone passes sharing weights, fed to two linear heads.
//! - [`AvdNin`]: a plain NIN classifier where every batch norm is split into a
//!   natural and an adversarial copy.
//!
//! # Example
//!
//! ```ignore
//! use advnin_core::{ImageType, NetworkInNetwork, NinConfig, ParamStore};
//! use candle_core::{DType, Device, Tensor};
//!
//! let store = ParamStore::new(DType::F32, &Device::Cpu);
//! let nin = NetworkInNetwork::load(NinConfig::default(), store.var_builder())?;
//!
//! let x = Tensor::randn(0f32, 1f32, (2, 3, 32, 32), &Device::Cpu)?;
//! let feats = nin.forward_features(&x, ImageType::Natural, Some(&["conv1", "classifier"]), false)?;
//! ```

pub mod config;
pub mod error;
pub mod models;

pub use config::{ArchitectureConfig, AvdNinConfig, NinConfig, RegressorConfig};
pub use error::{Error, Result};

pub use models::{
    AdvBatchNorm, AvdNin, DeviceProfile, DeviceSelector, FeatureRequest, ImageType,
    NetworkInNetwork, ParamStore, Regressor, RegressorOutput,
};
