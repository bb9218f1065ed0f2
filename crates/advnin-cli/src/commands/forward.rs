//! `advnin forward`: run a random batch and summarize the outputs.

use std::path::PathBuf;

use advnin_core::models::shared::layers::tensor_stats;
use advnin_core::{ArchitectureConfig, DeviceProfile, ImageType};
use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use tracing::{info, warn};

use crate::model::{build_mapped, build_stored, Model};
use crate::output::Report;

pub struct ForwardArgs {
    pub checkpoint: Option<PathBuf>,
    pub batch: usize,
    pub size: usize,
    pub im_type: ImageType,
    pub im_type2: ImageType,
    pub features: Vec<String>,
    pub train: bool,
}

pub fn execute(
    args: ForwardArgs,
    arch: &ArchitectureConfig,
    device: &DeviceProfile,
    dtype: DType,
) -> Result<Report> {
    // Training passes update running statistics, so they need a writable store.
    let model = match &args.checkpoint {
        Some(path) if !args.train => build_mapped(arch, device, dtype, path)?,
        checkpoint => build_stored(arch, device, dtype, checkpoint.as_deref())?.model,
    };

    let shape = (args.batch, model.in_channels(), args.size, args.size);
    let random_input = || -> Result<Tensor> {
        Ok(Tensor::randn(0f32, 1f32, shape, &device.device)?.to_dtype(dtype)?)
    };
    let x1 = random_input()?;

    let keys: Vec<&str> = args.features.iter().map(String::as_str).collect();
    let keys = (!keys.is_empty()).then_some(keys.as_slice());

    let mut report = Report::new(format!("forward {}", arch.name()));
    report.push("device", device.kind.as_str());
    report.push("dtype", format!("{dtype:?}"));
    report.push("input", format!("{:?}", x1.dims()));
    report.push("im_type", args.im_type);
    report.push("mode", if args.train { "train" } else { "eval" });

    match &model {
        Model::Nin(nin) => {
            let outputs = nin
                .forward_features(&x1, args.im_type, keys, args.train)
                .context("forward pass failed")?;
            let names: Vec<String> = match keys {
                Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
                None => model.feature_names().last().cloned().into_iter().collect(),
            };
            for (name, t) in names.iter().zip(&outputs) {
                push_tensor(&mut report, name, t)?;
            }
        }
        Model::Regressor(reg) => {
            let x2 = random_input()?;
            report.push("im_type2", args.im_type2);
            match keys {
                Some(keys) => {
                    let (f1, f2) = reg
                        .forward_features(&x1, &x2, args.im_type, args.im_type2, keys, args.train)
                        .context("forward pass failed")?;
                    for (key, t) in keys.iter().zip(&f1) {
                        push_tensor(&mut report, &format!("x1.{key}"), t)?;
                    }
                    for (key, t) in keys.iter().zip(&f2) {
                        push_tensor(&mut report, &format!("x2.{key}"), t)?;
                    }
                }
                None => {
                    let out = reg
                        .forward(&x1, &x2, args.im_type, args.im_type2, args.train)
                        .context("forward pass failed")?;
                    push_tensor(&mut report, "features1", &out.features1)?;
                    push_tensor(&mut report, "features2", &out.features2)?;
                    push_tensor(&mut report, "logits", &out.logits)?;
                    push_tensor(&mut report, "logits2", &out.logits2)?;
                }
            }
        }
        Model::AvdNin(avd) => {
            if keys.is_some() {
                warn!("avd_nin has no selectable features; ignoring --features");
            }
            let scores = avd
                .forward(&x1, args.im_type, args.train)
                .context("forward pass failed")?;
            push_tensor(&mut report, "scores", &scores)?;
        }
    }

    info!("Forward pass through {} complete", arch.name());
    Ok(report)
}

fn push_tensor(report: &mut Report, name: &str, t: &Tensor) -> Result<()> {
    let (mean, std) = tensor_stats(t)?;
    report.push(format!("{name}.shape"), format!("{:?}", t.dims()));
    report.push(format!("{name}.mean"), format!("{mean:.6}"));
    report.push(format!("{name}.std"), format!("{std:.6}"));
    Ok(())
}
