//! Padded and ceil-mode 2-D pooling.
//!
//! candle's pooling kernels take no padding and always floor the output size.
//! The NIN topologies need both, so the input is padded (or trimmed) to the
//! exact extent the requested windows cover before handing it to candle.

use candle_core::{Tensor, D};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2dConfig {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub ceil_mode: bool,
}

impl Pool2dConfig {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        Self {
            kernel_size,
            stride,
            padding: 0,
            ceil_mode: false,
        }
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_ceil_mode(mut self) -> Self {
        self.ceil_mode = true;
        self
    }

    /// Number of windows along a dimension of length `len`.
    pub fn output_len(&self, len: usize) -> Result<usize> {
        let padded = len + 2 * self.padding;
        if self.kernel_size == 0 || self.stride == 0 {
            return Err(Error::InvalidInput(
                "pooling kernel and stride must be positive".to_string(),
            ));
        }
        if self.padding * 2 > self.kernel_size {
            return Err(Error::InvalidInput(format!(
                "pooling padding {} exceeds half the kernel size {}",
                self.padding, self.kernel_size
            )));
        }
        if padded < self.kernel_size {
            return Err(Error::InvalidInput(format!(
                "pooling window {} does not fit input of length {len} (padding {})",
                self.kernel_size, self.padding
            )));
        }

        let span = padded - self.kernel_size;
        let mut out = if self.ceil_mode {
            span.div_ceil(self.stride) + 1
        } else {
            span / self.stride + 1
        };
        // The last window has to start inside the input or its left padding.
        if self.ceil_mode && (out - 1) * self.stride >= len + self.padding {
            out -= 1;
        }
        Ok(out)
    }

    /// Elements of each window that fall inside `[-padding, len + padding)`.
    fn window_counts(&self, len: usize, out: usize) -> Vec<usize> {
        (0..out)
            .map(|i| {
                let start = i * self.stride;
                let end = (start + self.kernel_size).min(len + 2 * self.padding);
                end - start
            })
            .collect()
    }
}

/// Max pooling over the last two dims of a `(B, C, H, W)` tensor.
pub fn max_pool2d(x: &Tensor, cfg: Pool2dConfig) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let (out_h, out_w) = (cfg.output_len(h)?, cfg.output_len(w)?);

    let x = fit_dim(x, 2, h, out_h, cfg, f32::NEG_INFINITY)?;
    let x = fit_dim(&x, 3, w, out_w, cfg, f32::NEG_INFINITY)?;
    Ok(x.max_pool2d_with_stride(cfg.kernel_size, cfg.stride)?)
}

/// Average pooling over the last two dims of a `(B, C, H, W)` tensor.
///
/// Zero padding counts toward the divisor; the ceil-mode overhang past the
/// padded input does not.
pub fn avg_pool2d(x: &Tensor, cfg: Pool2dConfig) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let (out_h, out_w) = (cfg.output_len(h)?, cfg.output_len(w)?);

    let padded = fit_dim(x, 2, h, out_h, cfg, 0.0)?;
    let padded = fit_dim(&padded, 3, w, out_w, cfg, 0.0)?;
    let pooled = padded.avg_pool2d_with_stride(cfg.kernel_size, cfg.stride)?;

    let rows = cfg.window_counts(h, out_h);
    let cols = cfg.window_counts(w, out_w);
    let full = cfg.kernel_size;
    if rows.iter().chain(cols.iter()).all(|&c| c == full) {
        return Ok(pooled);
    }

    let area = (full * full) as f32;
    let mut scale = Vec::with_capacity(out_h * out_w);
    for r in &rows {
        for c in &cols {
            scale.push(area / (r * c) as f32);
        }
    }
    let scale = Tensor::from_vec(scale, (1, 1, out_h, out_w), x.device())?.to_dtype(x.dtype())?;
    Ok(pooled.broadcast_mul(&scale)?)
}

/// Pad (or trim) `dim` so that exactly `out` windows fit: `padding` on the
/// leading side, whatever the last window needs on the trailing side.
fn fit_dim(
    x: &Tensor,
    dim: usize,
    len: usize,
    out: usize,
    cfg: Pool2dConfig,
    fill: f32,
) -> Result<Tensor> {
    let needed = (out - 1) * cfg.stride + cfg.kernel_size;
    let leading = cfg.padding;
    let available = len + leading;

    if needed <= available {
        let x = pad_with_value(x, dim, leading, 0, fill)?;
        return Ok(x.narrow(dim, 0, needed)?);
    }
    pad_with_value(x, dim, leading, needed - available, fill)
}

fn pad_with_value(x: &Tensor, dim: usize, left: usize, right: usize, fill: f32) -> Result<Tensor> {
    if left == 0 && right == 0 {
        return Ok(x.clone());
    }
    if fill == 0.0 {
        return Ok(x.pad_with_zeros(dim, left, right)?);
    }

    let mut shape = x.dims().to_vec();
    let mut parts = Vec::with_capacity(3);
    if left > 0 {
        shape[dim] = left;
        parts.push(filled(&shape, fill, x)?);
    }
    parts.push(x.clone());
    if right > 0 {
        shape[dim] = right;
        parts.push(filled(&shape, fill, x)?);
    }
    Ok(Tensor::cat(&parts, dim)?)
}

fn filled(shape: &[usize], fill: f32, like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::full(fill, shape, like.device())?.to_dtype(like.dtype())?)
}

/// Average over both spatial dims: `(B, C, H, W) -> (B, C)`.
pub fn global_avg_pool2d(x: &Tensor) -> Result<Tensor> {
    let (b, c, h, w) = x.dims4()?;
    if h == 0 || w == 0 {
        return Err(Error::InvalidInput(format!(
            "global average pooling needs a non-empty feature map, got {h}x{w}"
        )));
    }
    Ok(x.reshape((b, c, h * w))?.mean(D::Minus1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn arange_4x4() -> Tensor {
        Tensor::arange(0f32, 16f32, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4, 4))
            .unwrap()
    }

    #[test]
    fn output_len_matches_floor_and_ceil_rules() {
        let nin_pool = Pool2dConfig::new(3, 2).with_padding(1);
        assert_eq!(nin_pool.output_len(32).unwrap(), 16);
        assert_eq!(nin_pool.output_len(16).unwrap(), 8);
        assert_eq!(nin_pool.output_len(7).unwrap(), 4);

        let ceil_pool = Pool2dConfig::new(3, 2).with_ceil_mode();
        assert_eq!(ceil_pool.output_len(32).unwrap(), 16);
        assert_eq!(ceil_pool.output_len(16).unwrap(), 8);
        assert_eq!(Pool2dConfig::new(3, 2).output_len(32).unwrap(), 15);

        // Ceil mode never starts a window in the trailing padding.
        let padded_ceil = Pool2dConfig::new(2, 2).with_padding(1).with_ceil_mode();
        assert_eq!(padded_ceil.output_len(4).unwrap(), 3);
        assert_eq!(padded_ceil.output_len(5).unwrap(), 3);

        assert!(Pool2dConfig::new(8, 1).output_len(4).is_err());
    }

    #[test]
    fn max_pool_pads_with_negative_infinity() {
        let x = arange_4x4().affine(-1.0, 0.0).unwrap();
        let y = max_pool2d(&x, Pool2dConfig::new(3, 2).with_padding(1)).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 2]);
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(v, vec![0.0, -1.0, -4.0, -5.0]);
    }

    #[test]
    fn avg_pool_counts_padding_in_divisor() {
        let x = Tensor::ones((1, 1, 4, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
        let y = avg_pool2d(&x, Pool2dConfig::new(3, 2).with_padding(1)).unwrap();
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // Top-left window covers 4 real cells out of 9.
        assert!((v[0] - 4.0 / 9.0).abs() < 1e-6);
        assert!((v[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn avg_pool_ceil_mode_divides_by_in_bounds_extent() {
        let x = arange_4x4();
        let y = avg_pool2d(&x, Pool2dConfig::new(3, 2).with_ceil_mode()).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 2]);
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // Windows: rows/cols {0,1,2} and {2,3}.
        assert!((v[0] - 5.0).abs() < 1e-5);
        assert!((v[1] - 6.5).abs() < 1e-5);
        assert!((v[2] - 11.0).abs() < 1e-5);
        assert!((v[3] - 12.5).abs() < 1e-5);
    }

    #[test]
    fn floor_mode_trims_unused_trailing_elements() {
        let x = Tensor::arange(0f32, 25f32, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 5, 5))
            .unwrap();
        let y = max_pool2d(&x, Pool2dConfig::new(2, 2)).unwrap();
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(v, vec![6.0, 8.0, 16.0, 18.0]);
    }

    #[test]
    fn global_average_pooling_flattens_spatial_dims() {
        let x = arange_4x4();
        let y = global_avg_pool2d(&x).unwrap();
        assert_eq!(y.dims(), &[1, 1]);
        assert!((y.flatten_all().unwrap().to_vec1::<f32>().unwrap()[0] - 7.5).abs() < 1e-6);
    }
}
