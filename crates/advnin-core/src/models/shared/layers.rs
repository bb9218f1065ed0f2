//! Layer constructors with the initialization schemes the backbones expect.
//!
//! candle's stock `conv2d` / `linear` helpers pick their own initializers, so
//! weights are requested here with explicit hints. When the `VarBuilder` is
//! backed by a checkpoint the hints are ignored and stored values win.

use candle_core::Tensor;
use candle_nn::{BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Init, Linear, VarBuilder};

use crate::error::Result;

/// Padding that keeps the spatial size for odd kernels at stride 1.
pub fn same_padding(kernel_size: usize) -> usize {
    kernel_size.saturating_sub(1) / 2
}

/// He-style standard deviation `sqrt(2 / (k * k * out_channels))`.
pub fn he_conv_std(kernel_size: usize, out_channels: usize) -> f64 {
    let fan_out = (kernel_size * kernel_size * out_channels).max(1) as f64;
    (2.0 / fan_out).sqrt()
}

/// Conv2d with weights drawn from `N(0, std)` and an optional zero bias.
pub fn conv2d_normal(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    cfg: Conv2dConfig,
    std: f64,
    with_bias: bool,
    vb: VarBuilder,
) -> Result<Conv2d> {
    let weight = vb.get_with_hints(
        (out_channels, in_channels / cfg.groups.max(1), kernel_size, kernel_size),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: std,
        },
    )?;
    let bias = if with_bias {
        Some(vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?)
    } else {
        None
    };
    Ok(Conv2d::new(weight, bias, cfg))
}

/// BatchNorm2d with unit scale, zero shift and fresh running statistics.
pub fn batch_norm2d(
    num_features: usize,
    eps: f64,
    momentum: f64,
    vb: VarBuilder,
) -> Result<BatchNorm> {
    let cfg = BatchNormConfig {
        eps,
        remove_mean: true,
        affine: true,
        momentum,
    };
    Ok(candle_nn::batch_norm(num_features, cfg, vb)?)
}

/// Linear layer with weights ~ U(-1/sqrt(in), 1/sqrt(in)) and a zero bias.
pub fn linear_zero_bias(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Mean and population standard deviation of every element, as f32.
pub fn tensor_stats(t: &Tensor) -> Result<(f32, f32)> {
    let flat = t
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?;
    let mean = flat.mean_all()?.to_scalar::<f32>()?;
    let var = flat
        .broadcast_sub(&flat.mean_all()?)?
        .sqr()?
        .mean_all()?
        .to_scalar::<f32>()?;
    Ok((mean, var.sqrt()))
}
