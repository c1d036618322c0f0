//! imagesauce library exports.
//!
//! The binary in `main.rs` is a thin CLI over these modules; integration
//! tests in `tests/` drive the lifecycle through a scripted
//! [`process::CommandRunner`].

pub mod config;
pub mod customizer;
pub mod delegate;
pub mod error;
pub mod image;
pub mod logging;
pub mod manifest;
pub mod preflight;
pub mod process;
pub mod timing;
