//! Native model implementations.

pub mod architectures;
pub mod shared;

pub use architectures::avd_nin::{AdvBatchNorm, AdvLayer, AdvSequential, AvdNin};
pub use architectures::nin::regressor::{Regressor, RegressorOutput};
pub use architectures::nin::{FeatureRequest, NetworkInNetwork};
pub use shared::device::{DeviceKind, DeviceProfile, DeviceSelector};
pub use shared::image_type::ImageType;
pub use shared::weights::{var_builder_from_safetensors, ParamStore};
