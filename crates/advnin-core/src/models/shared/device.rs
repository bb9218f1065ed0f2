//! Device selection for native forward passes.
//!
//! Picks CUDA, Metal or CPU and the dtype the backbones should run in on that
//! device.

use candle_core::{DType, Device};
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cuda,
    Metal,
    Cpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Metal => "metal",
            DeviceKind::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device: Device,
    pub kind: DeviceKind,
    /// Whether half-precision bfloat16 kernels are worth using
    pub supports_bf16: bool,
}

impl DeviceProfile {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            kind: DeviceKind::Cpu,
            supports_bf16: false,
        }
    }

    /// Select the dtype for weights and activations.
    ///
    /// CPU and Metal always run in F32. CUDA honours explicit requests and
    /// defaults to BF16 when available.
    pub fn select_dtype(&self, requested: Option<&str>) -> DType {
        let dtype = match (self.kind, requested.unwrap_or("")) {
            (DeviceKind::Cpu | DeviceKind::Metal, _) => DType::F32,
            (DeviceKind::Cuda, "float32" | "f32") => DType::F32,
            (DeviceKind::Cuda, "float16" | "f16") => DType::F16,
            (DeviceKind::Cuda, "bfloat16" | "bf16") if self.supports_bf16 => DType::BF16,
            (DeviceKind::Cuda, "bfloat16" | "bf16") => DType::F32,
            (DeviceKind::Cuda, _) => {
                if self.supports_bf16 {
                    DType::BF16
                } else {
                    DType::F32
                }
            }
        };

        debug!(
            "Selected dtype {:?} for device {:?} (requested: {:?})",
            dtype, self.kind, requested
        );

        dtype
    }
}

pub struct DeviceSelector;

impl DeviceSelector {
    fn try_metal() -> Option<DeviceProfile> {
        let device = std::panic::catch_unwind(|| Device::new_metal(0))
            .ok()?
            .ok()?;
        device.is_metal().then_some(DeviceProfile {
            device,
            kind: DeviceKind::Metal,
            supports_bf16: false,
        })
    }

    fn try_cuda() -> Option<DeviceProfile> {
        let device = std::panic::catch_unwind(|| Device::cuda_if_available(0))
            .ok()?
            .ok()?;
        device.is_cuda().then_some(DeviceProfile {
            device,
            kind: DeviceKind::Cuda,
            supports_bf16: true,
        })
    }

    pub fn detect() -> Result<DeviceProfile> {
        if cfg!(target_os = "macos") {
            if let Some(profile) = Self::try_metal() {
                info!("Using Metal device");
                return Ok(profile);
            }
        } else if let Some(profile) = Self::try_cuda() {
            info!("Using CUDA device");
            return Ok(profile);
        }

        info!("Falling back to CPU");
        Ok(DeviceProfile::cpu())
    }

    /// Detect with an explicit preference. Unknown preferences are rejected;
    /// an unavailable accelerator falls back to automatic detection.
    pub fn detect_with_preference(preference: Option<&str>) -> Result<DeviceProfile> {
        match preference.map(str::trim).unwrap_or("") {
            "" | "auto" => Self::detect(),
            "cpu" => Ok(DeviceProfile::cpu()),
            "cuda" => Self::try_cuda().map_or_else(Self::detect, Ok),
            "metal" | "mps" => Self::try_metal().map_or_else(Self::detect, Ok),
            other => Err(Error::InvalidInput(format!(
                "Unknown device preference '{other}', expected one of: auto, cpu, cuda, metal"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_with_cpu_preference_returns_cpu() {
        let profile = DeviceSelector::detect_with_preference(Some("cpu")).unwrap();
        assert_eq!(profile.kind, DeviceKind::Cpu);
        assert!(profile.device.is_cpu());
    }

    #[test]
    fn test_detect_kind_matches_device() {
        let profile = DeviceSelector::detect().unwrap();
        match profile.kind {
            DeviceKind::Cpu => assert!(profile.device.is_cpu()),
            DeviceKind::Metal => assert!(profile.device.is_metal()),
            DeviceKind::Cuda => assert!(profile.device.is_cuda()),
        }
    }

    #[test]
    fn test_unknown_preference_is_rejected() {
        assert!(matches!(
            DeviceSelector::detect_with_preference(Some("tpu")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cpu_and_metal_always_f32() {
        let cpu = DeviceProfile::cpu();
        let metal = DeviceProfile {
            kind: DeviceKind::Metal,
            ..DeviceProfile::cpu()
        };
        for profile in [cpu, metal] {
            assert_eq!(profile.select_dtype(None), DType::F32);
            assert_eq!(profile.select_dtype(Some("bf16")), DType::F32);
            assert_eq!(profile.select_dtype(Some("f16")), DType::F32);
        }
    }

    #[test]
    fn test_cuda_dtype_selection() {
        let cuda = DeviceProfile {
            device: Device::Cpu,
            kind: DeviceKind::Cuda,
            supports_bf16: true,
        };
        assert_eq!(cuda.select_dtype(None), DType::BF16);
        assert_eq!(cuda.select_dtype(Some("f32")), DType::F32);
        assert_eq!(cuda.select_dtype(Some("f16")), DType::F16);

        let old_cuda = DeviceProfile {
            supports_bf16: false,
            ..cuda
        };
        assert_eq!(old_cuda.select_dtype(None), DType::F32);
        assert_eq!(old_cuda.select_dtype(Some("bf16")), DType::F32);
    }

    #[test]
    fn test_metal_preference_falls_back_when_unavailable() {
        let profile = DeviceSelector::detect_with_preference(Some("metal")).unwrap();
        match profile.kind {
            DeviceKind::Metal => assert!(profile.device.is_metal()),
            DeviceKind::Cuda => assert!(profile.device.is_cuda()),
            DeviceKind::Cpu => assert!(profile.device.is_cpu()),
        }
    }
}
