//! Operations on the disk image itself.
//!
//! - `format` - detect qcow2 vs raw, stage a raw working copy, convert back
//! - `partition` - find the root filesystem offset with fdisk
//! - `mount` - loop mount lifecycle
//! - `resolv` - host resolv.conf shim inside the mounted root

pub mod format;
pub mod mount;
pub mod partition;
pub mod resolv;

pub use format::ImageFormat;
pub use mount::MountHandle;
pub use resolv::ResolvShimState;
