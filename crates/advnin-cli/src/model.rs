//! Model construction shared by the subcommands.

use std::path::Path;

use advnin_core::models::var_builder_from_safetensors;
use advnin_core::{
    ArchitectureConfig, AvdNin, DeviceProfile, NetworkInNetwork, ParamStore, Regressor,
};
use anyhow::{Context, Result};
use candle_core::DType;
use candle_nn::VarBuilder;
use tracing::info;

pub enum Model {
    Nin(NetworkInNetwork),
    Regressor(Regressor),
    AvdNin(AvdNin),
}

impl Model {
    pub fn load(arch: &ArchitectureConfig, vb: VarBuilder) -> Result<Self> {
        let model = match arch {
            ArchitectureConfig::Nin(cfg) => Model::Nin(NetworkInNetwork::load(cfg.clone(), vb)?),
            ArchitectureConfig::Regressor(cfg) => {
                Model::Regressor(Regressor::load(cfg.clone(), vb)?)
            }
            ArchitectureConfig::AvdNin(cfg) => Model::AvdNin(AvdNin::load(cfg.clone(), vb)?),
        };
        Ok(model)
    }

    /// Names accepted by `--features`; empty when the model has no selectable outputs.
    pub fn feature_names(&self) -> &[String] {
        match self {
            Model::Nin(nin) => nin.feature_names(),
            Model::Regressor(reg) => reg.backbone().feature_names(),
            Model::AvdNin(_) => &[],
        }
    }

    pub fn in_channels(&self) -> usize {
        match self {
            Model::Nin(nin) => nin.config().in_channels,
            Model::Regressor(reg) => reg.config().nin.in_channels,
            Model::AvdNin(avd) => avd.config().in_channels,
        }
    }
}

/// A model whose parameters live in a writable store.
pub struct StoredModel {
    pub store: ParamStore,
    pub model: Model,
}

/// Initialize `arch` in a writable store, optionally overwriting the weights
/// from a checkpoint.
pub fn build_stored(
    arch: &ArchitectureConfig,
    device: &DeviceProfile,
    dtype: DType,
    checkpoint: Option<&Path>,
) -> Result<StoredModel> {
    let store = ParamStore::new(dtype, &device.device);
    let model = Model::load(arch, store.var_builder())?;
    let mut stored = StoredModel { store, model };
    if let Some(path) = checkpoint {
        stored
            .store
            .load(path)
            .with_context(|| format!("loading weights for {}", arch.name()))?;
        info!("Restored {} from {}", arch.name(), path.display());
    }
    Ok(stored)
}

/// Load `arch` read-only from a memory-mapped checkpoint.
pub fn build_mapped(
    arch: &ArchitectureConfig,
    device: &DeviceProfile,
    dtype: DType,
    checkpoint: &Path,
) -> Result<Model> {
    let vb = var_builder_from_safetensors(&[checkpoint.to_path_buf()], dtype, &device.device)?;
    Model::load(arch, vb).with_context(|| {
        format!(
            "checkpoint {} does not match the {} architecture",
            checkpoint.display(),
            arch.name()
        )
    })
}
