//! Shared model infrastructure used by all architecture implementations.
//!
//! This module holds reusable components that should not depend on any
//! specific model family.

pub mod device;
pub mod image_type;
pub mod layers;
pub mod pooling;
pub mod weights;
