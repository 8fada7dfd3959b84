//! Manifest compiler for apploy App trees
//!
//! [`compile`] turns an App into typed Kubernetes objects for one
//! [`Instance`]; [`Registry`] encodes them; [`ManifestWriter`] lays them out
//! on disk.

pub mod compiler;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod writer;

pub use compiler::{compile, selector};
pub use error::{CodecError, CompileError, WriteError};
pub use manifest::{AppManifests, CompManifests, Instance, Manifest, ManifestKind, Manifests};
pub use registry::{Format, Registration, Registry};
pub use writer::ManifestWriter;
