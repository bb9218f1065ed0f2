//! Architecture implementations.

pub mod avd_nin;
pub mod nin;
