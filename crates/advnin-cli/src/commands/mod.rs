//! Subcommand implementations. Each returns a [`Report`](crate::output::Report).

pub mod describe;
pub mod forward;
pub mod init;
