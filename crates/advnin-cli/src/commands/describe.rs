//! `advnin describe`: layer layout and parameter counts.

use advnin_core::{ArchitectureConfig, DeviceProfile};
use anyhow::Result;
use candle_core::DType;

use crate::model::{build_stored, Model};
use crate::output::Report;

pub fn execute(arch: &ArchitectureConfig, device: &DeviceProfile, dtype: DType) -> Result<Report> {
    let stored = build_stored(arch, device, dtype, None)?;

    let mut report = Report::new(format!("architecture: {}", arch.name()));
    report.push("device", device.kind.as_str());
    report.push("dtype", format!("{:?}", stored.store.dtype()));
    report.push("tensors", stored.store.num_tensors());
    report.push("parameters", stored.store.num_parameters());

    match &stored.model {
        Model::Nin(nin) => {
            report.push("features", nin.feature_names().join(","));
            for (name, block) in nin.feature_names().iter().zip(nin.blocks()) {
                report.push(
                    format!("block.{name}"),
                    block.layer_names().collect::<Vec<_>>().join(","),
                );
            }
        }
        Model::Regressor(reg) => {
            report.push("features", reg.backbone().feature_names().join(","));
            report.push("indim", reg.config().indim);
            report.push("num_classes", reg.config().num_classes);
        }
        Model::AvdNin(avd) => {
            let kinds: Vec<_> = avd.features().layers().iter().map(|l| l.kind()).collect();
            report.push("layers", kinds.len());
            report.push("stack", kinds.join(","));
            report.push("num_classes", avd.config().num_classes);
        }
    }
    Ok(report)
}
