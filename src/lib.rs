//! Deterministic OCI image builds from directory contents.
//!
//! This crate turns a directory into a single-layer OCI image without a
//! daemon, a network, or a base image. It supports:
//!
//! - Reproducible layer creation (sorted entries, zeroed timestamps)
//! - OCI config generation with platform and runtime settings
//! - Manifest assembly with stable content digests
//! - Tarball export/import in the OCI image layout (optionally gzipped)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Build Pipeline                          │
//! │                                                              │
//! │  context dir ──► LayerFactory ──► Layer (tar + digests)     │
//! │                                     │                        │
//! │  BuildOptions ─► ConfigFactory ──► ConfigFile               │
//! │                                     │                        │
//! │                  ImageBuilder ────► Image ─► TarballWriter  │
//! │                                              (OCI layout)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod config;
mod error;
mod image;
pub mod labels;
mod layer;
mod options;
pub mod reference;
mod tarball;

pub use builder::ImageBuilder;
pub use config::{
    merge_configs, validate_config, validate_port_format, validate_user_format, Config,
    ConfigFactory, ConfigFile, EmptyObject, RootFs,
};
pub use error::{BuildError, Result};
pub use image::{
    Descriptor, Image, Manifest, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_CONFIG,
    MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER, MEDIA_TYPE_OCI_MANIFEST,
};
pub use labels::default_labels;
pub use layer::{sha256_digest, Layer, LayerFactory};
pub use options::{
    BuildOptions, Platform, FEATURE_BASE_IMAGE_SUPPORT, FEATURE_BUILDKIT_FRONTEND,
    FEATURE_MULTI_STAGE_BUILD,
};
pub use reference::Reference;
pub use tarball::{
    compress_tarball, get_tarball_info, load_from_tarball, validate_tarball, TarballInfo,
    TarballOptions, TarballWriter,
};
