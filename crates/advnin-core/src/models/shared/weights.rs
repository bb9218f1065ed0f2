//! Parameter storage and safetensors checkpoints.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Trainable parameters (and batch-norm running statistics) of one model.
///
/// Models are built from [`ParamStore::var_builder`]; every tensor they
/// request is created in the underlying `VarMap` with its initializer, so the
/// store can later be saved or overwritten from a checkpoint.
pub struct ParamStore {
    varmap: VarMap,
    dtype: DType,
    device: Device,
}

impl ParamStore {
    pub fn new(dtype: DType, device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            dtype,
            device: device.clone(),
        }
    }

    pub fn var_builder(&self) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of stored tensors.
    pub fn num_tensors(&self) -> usize {
        self.varmap.all_vars().len()
    }

    /// Total element count across all stored tensors.
    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    /// Sorted parameter paths, e.g. `nin.bn_nat.weight`.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = self
            .varmap
            .data()
            .lock()
            .map(|guard| guard.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Overwrite one stored tensor in place; models built from this store see
    /// the new value.
    pub fn set(&self, name: &str, value: &Tensor) -> Result<()> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::ModelLoadError("Parameter store lock poisoned".to_string()))?;
        let var = data
            .get(name)
            .ok_or_else(|| Error::ModelLoadError(format!("Unknown parameter: {name}")))?;
        var.set(value)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.varmap.save(path).map_err(|e| {
            Error::ModelLoadError(format!("Failed to save checkpoint {}: {e}", path.display()))
        })?;
        info!(
            "Saved {} tensors ({} parameters) to {}",
            self.num_tensors(),
            self.num_parameters(),
            path.display()
        );
        Ok(())
    }

    /// Overwrite the already-created parameters with a checkpoint's values.
    ///
    /// Every parameter of the model must be present in the file.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::ModelLoadError(format!(
                "Checkpoint not found: {}",
                path.display()
            )));
        }
        self.varmap.load(path).map_err(|e| {
            Error::ModelLoadError(format!("Failed to load checkpoint {}: {e}", path.display()))
        })?;
        debug!("Loaded {} tensors from {}", self.num_tensors(), path.display());
        Ok(())
    }
}

/// Memory-map safetensors files for inference-only loading.
pub fn var_builder_from_safetensors(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    if paths.is_empty() {
        return Err(Error::ModelLoadError(
            "No safetensors files given".to_string(),
        ));
    }
    for path in paths {
        if !path.exists() {
            return Err(Error::ModelLoadError(format!(
                "Checkpoint not found: {}",
                path.display()
            )));
        }
    }
    info!("Memory-mapping {} safetensors file(s)", paths.len());
    // SAFETY: the files are not modified while the mapping is alive.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
    Ok(vb)
}
