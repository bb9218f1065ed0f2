//! `advnin init`: write freshly initialized weights to a checkpoint.

use std::path::PathBuf;

use advnin_core::config::default_checkpoint_dir;
use advnin_core::{ArchitectureConfig, DeviceProfile};
use anyhow::{bail, Result};
use candle_core::DType;
use tracing::info;

use crate::model::build_stored;
use crate::output::Report;

pub struct InitArgs {
    pub output: Option<PathBuf>,
    pub force: bool,
}

pub fn execute(
    args: InitArgs,
    arch: &ArchitectureConfig,
    device: &DeviceProfile,
    dtype: DType,
) -> Result<Report> {
    let path = args
        .output
        .unwrap_or_else(|| default_checkpoint_dir().join(format!("{}.safetensors", arch.name())));
    if path.exists() && !args.force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        );
    }

    let stored = build_stored(arch, device, dtype, None)?;
    stored.store.save(&path)?;
    info!("Initialized {} at {}", arch.name(), path.display());

    let mut report = Report::new(format!("initialized {}", arch.name()));
    report.push("path", path.display());
    report.push("tensors", stored.store.num_tensors());
    report.push("parameters", stored.store.num_parameters());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use advnin_core::NinConfig;

    #[test]
    fn writes_checkpoint_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("nin.safetensors");
        let arch = ArchitectureConfig::Nin(NinConfig::default());
        let cpu = DeviceProfile::cpu();

        let report = execute(
            InitArgs {
                output: Some(path.clone()),
                force: false,
            },
            &arch,
            &cpu,
            DType::F32,
        )
        .unwrap();
        assert!(path.exists());
        assert_eq!(report.get("path"), Some(path.display().to_string().as_str()));

        let err = execute(
            InitArgs {
                output: Some(path.clone()),
                force: false,
            },
            &arch,
            &cpu,
            DType::F32,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--force"));

        execute(
            InitArgs {
                output: Some(path),
                force: true,
            },
            &arch,
            &cpu,
            DType::F32,
        )
        .unwrap();
    }
}
