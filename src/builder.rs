//! Image assembly: directory in, single-layer OCI image out.
//!
//! A successful build is read-only on the filesystem, performs no network
//! I/O and always yields exactly one layer. Multi-stage builds, BuildKit
//! frontends and base-image composition are rejected at this boundary, not
//! degraded.

use std::fs;
use std::path::Path;

use crate::config::ConfigFactory;
use crate::error::{BuildError, Result};
use crate::image::{Image, MEDIA_TYPE_OCI_MANIFEST};
use crate::labels::LABEL_REF_NAME;
use crate::layer::LayerFactory;
use crate::options::{
    BuildOptions, Platform, FEATURE_BASE_IMAGE_SUPPORT, FEATURE_BUILDKIT_FRONTEND,
    FEATURE_MULTI_STAGE_BUILD,
};
use crate::tarball::TarballWriter;

/// Fallback tag when build options carry no ref-name label.
const DEFAULT_TARBALL_REF: &str = "localhost/built-image:latest";

/// Builds single-layer OCI images from directory contents.
///
/// Construction resolves platform defaults (linux/amd64) and wires up the
/// layer and config factories. All held configuration is immutable, so one
/// builder can serve concurrent builds.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    platform: Platform,
    layer_factory: LayerFactory,
    config_factory: ConfigFactory,
    tarball_writer: TarballWriter,
}

impl ImageBuilder {
    /// Create a builder for the platform in `opts`, defaulting unset fields
    /// to linux/amd64.
    pub fn new(opts: &BuildOptions) -> Result<Self> {
        let mut platform = opts.platform.clone();
        if platform.os.is_empty() {
            platform.os = "linux".to_string();
        }
        if platform.architecture.is_empty() {
            platform.architecture = "amd64".to_string();
        }

        Ok(ImageBuilder {
            layer_factory: LayerFactory::new()
                .with_permission_preservation(true)
                .with_timestamp_preservation(false),
            config_factory: ConfigFactory::new(platform.clone()),
            tarball_writer: TarballWriter::new(),
            platform,
        })
    }

    /// The resolved target platform.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Build an OCI image from `context_dir`.
    ///
    /// Validates the context directory, rejects gated feature flags, packs
    /// the directory into one layer, generates and applies the config, and
    /// stamps the OCI manifest media type explicitly.
    pub fn build(&self, context_dir: &Path, opts: &BuildOptions) -> Result<Image> {
        let meta = fs::metadata(context_dir).map_err(|e| {
            BuildError::Validation(format!(
                "context directory not found: {}: {}",
                context_dir.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(BuildError::Validation(format!(
                "context path is not a directory: {}",
                context_dir.display()
            )));
        }

        self.reject_gated_features(opts)?;

        tracing::debug!(context = %context_dir.display(), "building image");

        let layer = self.layer_factory.create_layer(context_dir)?;
        let image = Image::empty().append_layer(layer);

        let config = self.config_factory.generate_config(opts)?;
        let image = self.config_factory.apply_config(image, config)?;
        let image = image.with_media_type(MEDIA_TYPE_OCI_MANIFEST);

        tracing::info!(
            context = %context_dir.display(),
            layers = image.layers().len(),
            "image built"
        );
        Ok(image)
    }

    /// Build an image and export it as a tarball at `output_path`.
    ///
    /// Missing parent directories of the output path are created. The tag
    /// comes from the `org.opencontainers.image.ref.name` label when set,
    /// else a fixed placeholder reference.
    pub fn build_tarball(
        &self,
        context_dir: &Path,
        output_path: &Path,
        opts: &BuildOptions,
    ) -> Result<()> {
        let image = self.build(context_dir, opts)?;

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
            }
        }

        let reference = opts
            .labels
            .get(LABEL_REF_NAME)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TARBALL_REF.to_string());

        self.tarball_writer.write(&image, output_path, &reference)?;

        tracing::info!(
            output = %output_path.display(),
            reference = %reference,
            "tarball written"
        );
        Ok(())
    }

    /// Hard MVP boundary: these flags are rejected, never soft-degraded.
    fn reject_gated_features(&self, opts: &BuildOptions) -> Result<()> {
        let gated = [
            FEATURE_MULTI_STAGE_BUILD,
            FEATURE_BUILDKIT_FRONTEND,
            FEATURE_BASE_IMAGE_SUPPORT,
        ];
        let requested: Vec<&str> = gated
            .iter()
            .copied()
            .filter(|flag| opts.feature_flags.get(*flag).copied().unwrap_or(false))
            .collect();

        if requested.is_empty() {
            Ok(())
        } else {
            Err(BuildError::NotImplemented(requested.join(", ")))
        }
    }
}
