//! Immutable in-memory OCI image value.
//!
//! An image is an ordered list of layers plus a configuration and an
//! explicit manifest media type. Every mutation-shaped operation returns a
//! new value; an image handed to a writer can never change underneath it.
//! Manifest and config blobs are serialized deterministically, so digests
//! are stable across repeated calls.

use serde::{Deserialize, Serialize};

use crate::config::ConfigFile;
use crate::error::Result;
use crate::layer::{sha256_digest, Layer};

/// OCI image manifest media type.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image config media type.
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// OCI uncompressed layer media type.
pub const MEDIA_TYPE_OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// OCI image index media type.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Docker schema2 manifest media type; the default of an untouched empty
/// image, which is why builders set the OCI media type explicitly.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Content descriptor as it appears in manifests and indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub digest: String,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<std::collections::BTreeMap<String, String>>,
}

/// Image manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub config: Descriptor,

    pub layers: Vec<Descriptor>,
}

/// A fully assembled container image.
#[derive(Debug, Clone)]
pub struct Image {
    layers: Vec<Layer>,
    config: ConfigFile,
    media_type: String,
}

impl Image {
    /// The empty image: no layers, default config, Docker default media
    /// type. Assemblers are expected to set the media type explicitly.
    pub fn empty() -> Self {
        Image {
            layers: Vec::new(),
            config: ConfigFile::default(),
            media_type: MEDIA_TYPE_DOCKER_MANIFEST.to_string(),
        }
    }

    /// Return a new image with `layer` appended.
    pub fn append_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Return a new image carrying `config`. Layers are untouched.
    pub fn with_config(mut self, config: ConfigFile) -> Self {
        self.config = config;
        self
    }

    /// Return a new image with an explicit manifest media type.
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Configuration as serialized into the config blob, with rootfs
    /// diff-ids derived from the layers.
    pub fn effective_config(&self) -> ConfigFile {
        let mut config = self.config.clone();
        config.rootfs.fs_type = "layers".to_string();
        config.rootfs.diff_ids = self
            .layers
            .iter()
            .map(|l| l.diff_id().to_string())
            .collect();
        config
    }

    /// Serialized config blob.
    pub fn config_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.effective_config())?)
    }

    /// Digest of the config blob, in "sha256:hex" form.
    pub fn config_digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.config_bytes()?))
    }

    /// Manifest document referencing the config blob and every layer.
    pub fn manifest(&self) -> Result<Manifest> {
        let config_bytes = self.config_bytes()?;
        Ok(Manifest {
            schema_version: 2,
            media_type: self.media_type.clone(),
            config: Descriptor {
                media_type: MEDIA_TYPE_OCI_CONFIG.to_string(),
                digest: sha256_digest(&config_bytes),
                size: config_bytes.len() as u64,
                annotations: None,
            },
            layers: self
                .layers
                .iter()
                .map(|layer| Descriptor {
                    media_type: MEDIA_TYPE_OCI_LAYER.to_string(),
                    digest: layer.digest().to_string(),
                    size: layer.size(),
                    annotations: None,
                })
                .collect(),
        })
    }

    /// Serialized manifest blob.
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.manifest()?)?)
    }

    /// Image digest: the digest of the manifest blob.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn layer_with(content: &[u8]) -> Layer {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "f", content).unwrap();
        Layer::from_tar_bytes(builder.into_inner().unwrap())
    }

    #[test]
    fn test_empty_image() {
        let image = Image::empty();
        assert!(image.layers().is_empty());
        assert_eq!(image.media_type(), MEDIA_TYPE_DOCKER_MANIFEST);
    }

    #[test]
    fn test_append_layer_and_media_type() {
        let image = Image::empty()
            .append_layer(layer_with(b"hello"))
            .with_media_type(MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(image.layers().len(), 1);
        assert_eq!(image.media_type(), MEDIA_TYPE_OCI_MANIFEST);
    }

    #[test]
    fn test_with_config_preserves_layers() {
        let image = Image::empty().append_layer(layer_with(b"hello"));
        let digest_before = image.layers()[0].digest().to_string();

        let config = ConfigFile {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            config: Config::default(),
            ..Default::default()
        };
        let image = image.with_config(config);
        assert_eq!(image.layers().len(), 1);
        assert_eq!(image.layers()[0].digest(), digest_before);
        assert_eq!(image.config().architecture, "amd64");
    }

    #[test]
    fn test_effective_config_fills_diff_ids() {
        let layer = layer_with(b"hello");
        let diff_id = layer.diff_id().to_string();
        let image = Image::empty().append_layer(layer);

        let config = image.effective_config();
        assert_eq!(config.rootfs.fs_type, "layers");
        assert_eq!(config.rootfs.diff_ids, vec![diff_id]);
    }

    #[test]
    fn test_manifest_references_config_and_layers() {
        let image = Image::empty()
            .append_layer(layer_with(b"hello"))
            .with_media_type(MEDIA_TYPE_OCI_MANIFEST);

        let manifest = image.manifest().unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.media_type, MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(manifest.config.media_type, MEDIA_TYPE_OCI_CONFIG);
        assert_eq!(manifest.config.digest, image.config_digest().unwrap());
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].media_type, MEDIA_TYPE_OCI_LAYER);
        assert_eq!(manifest.layers[0].digest, image.layers()[0].digest());
        assert_eq!(manifest.layers[0].size, image.layers()[0].size());
    }

    #[test]
    fn test_digest_stable_across_calls() {
        let image = Image::empty()
            .append_layer(layer_with(b"hello"))
            .with_media_type(MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(image.digest().unwrap(), image.digest().unwrap());
    }

    #[test]
    fn test_manifest_parses_as_oci_spec_manifest() {
        let image = Image::empty()
            .append_layer(layer_with(b"hello"))
            .with_media_type(MEDIA_TYPE_OCI_MANIFEST);

        let bytes = image.manifest_bytes().unwrap();
        let parsed: oci_spec::image::ImageManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.layers().len(), 1);
        assert_eq!(
            parsed.config().digest().as_str(),
            image.config_digest().unwrap()
        );
    }
}
