//! Filesystem attachment for hot-plugged resources.
//!
//! Provides mount requests with bounded retry for devices that enumerate
//! after the hot-add call returns, `OverlayFS` assembly of container root
//! filesystems, Plan-9 directory shares, and unmount-and-remove.

pub mod mount;
pub mod overlayfs;
pub mod plan9;
