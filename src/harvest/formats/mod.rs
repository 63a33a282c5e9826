//! Installer format implementations.
//!
//! This module contains format-specific implementations of the
//! [`ArtifactInspector`](crate::harvest::ArtifactInspector) trait.
//!
//! - `deb` - Debian packages, read through `dpkg-deb`

pub mod deb;

pub use deb::DpkgInspector;
