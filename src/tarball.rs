//! Tarball export and import of assembled images.
//!
//! Tarballs use the OCI image layout: an `oci-layout` marker, an optional
//! `index.json`, and content-addressed blobs under `blobs/sha256/`. A
//! multi-image tarball carries one index whose manifest descriptors are
//! told apart by their `org.opencontainers.image.ref.name` annotation.
//! Writes either produce a complete file or fail before creating one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::config::ConfigFile;
use crate::error::{BuildError, Result};
use crate::image::{Descriptor, Image, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST};
use crate::labels::LABEL_REF_NAME;
use crate::layer::{sha256_digest, Layer};
use crate::reference::Reference;

const OCI_LAYOUT_CONTENT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;

/// Image index document at the root of the layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Index {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,

    #[serde(rename = "mediaType")]
    media_type: String,

    manifests: Vec<Descriptor>,
}

/// Tarball export behavior.
#[derive(Debug, Clone)]
pub struct TarballOptions {
    /// Gzip the output tarball.
    pub compress: bool,

    /// Embed the `index.json` in the layout. On by default; readers that
    /// only need the blobs can turn it off.
    pub include_manifest: bool,
}

impl Default for TarballOptions {
    fn default() -> Self {
        TarballOptions {
            // Uncompressed by default for speed
            compress: false,
            include_manifest: true,
        }
    }
}

/// Writes assembled images to on-disk tarballs.
#[derive(Debug, Clone, Default)]
pub struct TarballWriter {
    options: TarballOptions,
}

impl TarballWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TarballOptions) -> Self {
        TarballWriter { options }
    }

    /// Enable gzip compression of the output.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.options.compress = compress;
        self
    }

    /// Control whether the layout embeds `index.json`.
    pub fn with_manifest(mut self, include: bool) -> Self {
        self.options.include_manifest = include;
        self
    }

    /// Export an image to a tarball, overwriting any existing file.
    ///
    /// The reference is parsed under weak validation; registry reachability
    /// is never checked. A nil image cannot be expressed at this API — the
    /// remaining input faults are an empty output path and an empty
    /// reference, each reported separately.
    pub fn write(&self, image: &Image, output_path: &Path, reference: &str) -> Result<()> {
        if output_path.as_os_str().is_empty() {
            return Err(BuildError::Validation(
                "output path cannot be empty".to_string(),
            ));
        }
        if reference.is_empty() {
            return Err(BuildError::Validation(
                "image reference cannot be empty".to_string(),
            ));
        }

        let reference = Reference::parse(reference)?;
        let tagged = reference.tagged();

        let entries = layout_entries(&[(tagged, image)], self.options.include_manifest)?;
        self.write_entries(output_path, &entries)
    }

    /// Export several images to one tarball, keyed by reference.
    ///
    /// Every reference is parsed before any byte is written, so an invalid
    /// reference never leaves a partial file behind.
    pub fn write_multiple(
        &self,
        images: &BTreeMap<String, Image>,
        output_path: &Path,
    ) -> Result<()> {
        if images.is_empty() {
            return Err(BuildError::Validation(
                "no images provided for export".to_string(),
            ));
        }

        let mut tagged: Vec<(String, &Image)> = Vec::with_capacity(images.len());
        for (reference, image) in images {
            let parsed = Reference::parse(reference)?;
            tagged.push((parsed.tagged(), image));
        }
        tagged.sort_by(|a, b| a.0.cmp(&b.0));

        let entries = layout_entries(&tagged, self.options.include_manifest)?;
        self.write_entries(output_path, &entries)
    }

    fn write_entries(&self, output_path: &Path, entries: &[(String, Vec<u8>)]) -> Result<()> {
        let file = fs::File::create(output_path).map_err(|e| BuildError::io(output_path, e))?;

        tracing::debug!(
            output = %output_path.display(),
            entries = entries.len(),
            compress = self.options.compress,
            "writing tarball"
        );

        if self.options.compress {
            let encoder = GzEncoder::new(file, Compression::default());
            let encoder = append_all(tar::Builder::new(encoder), entries, output_path)?;
            encoder
                .finish()
                .map_err(|e| BuildError::io(output_path, e))?;
        } else {
            append_all(tar::Builder::new(file), entries, output_path)?;
        }
        Ok(())
    }
}

fn append_all<W: Write>(
    mut builder: tar::Builder<W>,
    entries: &[(String, Vec<u8>)],
    output_path: &Path,
) -> Result<W> {
    for (name, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_size(bytes.len() as u64);
        builder
            .append_data(&mut header, name, bytes.as_slice())
            .map_err(|e| BuildError::io(output_path, e))?;
    }
    builder
        .into_inner()
        .map_err(|e| BuildError::io(output_path, e))
}

/// Assemble the OCI layout entries for a set of tagged images. Blobs are
/// deduplicated by digest; the index lists manifests in input order.
fn layout_entries(
    images: &[(String, &Image)],
    include_manifest: bool,
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut blobs: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut manifests = Vec::with_capacity(images.len());

    for (tag, image) in images {
        for layer in image.layers() {
            blobs.insert(digest_hex(layer.digest()), layer.tar_bytes().to_vec());
        }

        let config_bytes = image.config_bytes()?;
        blobs.insert(digest_hex(&sha256_digest(&config_bytes)), config_bytes);

        let manifest_bytes = image.manifest_bytes()?;
        let manifest_digest = sha256_digest(&manifest_bytes);
        let mut annotations = BTreeMap::new();
        annotations.insert(LABEL_REF_NAME.to_string(), tag.clone());
        manifests.push(Descriptor {
            media_type: image.media_type().to_string(),
            digest: manifest_digest.clone(),
            size: manifest_bytes.len() as u64,
            annotations: Some(annotations),
        });
        blobs.insert(digest_hex(&manifest_digest), manifest_bytes);
    }

    let mut entries = vec![("oci-layout".to_string(), OCI_LAYOUT_CONTENT.to_vec())];
    if include_manifest {
        let index = Index {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_INDEX.to_string(),
            manifests,
        };
        entries.push(("index.json".to_string(), serde_json::to_vec(&index)?));
    }
    for (hex, bytes) in blobs {
        entries.push((format!("blobs/sha256/{}", hex), bytes));
    }
    Ok(entries)
}

fn digest_hex(digest: &str) -> String {
    digest.strip_prefix("sha256:").unwrap_or(digest).to_string()
}

/// Metadata about an on-disk tarball.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarballInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// Report existence and size of a tarball file.
pub fn get_tarball_info(path: &Path) -> Result<TarballInfo> {
    let meta = fs::metadata(path).map_err(|e| BuildError::io(path, e))?;
    Ok(TarballInfo {
        path: path.to_path_buf(),
        size: meta.len(),
    })
}

/// Shallow tarball check: the file must exist and be non-empty. No
/// structural validation is performed.
pub fn validate_tarball(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| BuildError::io(path, e))?;
    if meta.len() == 0 {
        return Err(BuildError::Validation(format!(
            "tarball file is empty: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Gzip an existing tarball into `output_path`.
pub fn compress_tarball(input_path: &Path, output_path: &Path) -> Result<()> {
    let data = fs::read(input_path).map_err(|e| BuildError::io(input_path, e))?;
    let file = fs::File::create(output_path).map_err(|e| BuildError::io(output_path, e))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(&data)
        .and_then(|_| encoder.finish().map(|_| ()))
        .map_err(|e| BuildError::io(output_path, e))
}

/// Load an image back from a tarball written by [`TarballWriter`].
///
/// The reverse of `write`: locates the manifest for `reference` (via the
/// index annotations, or by scanning blobs when the index was omitted) and
/// reconstructs the in-memory image. Gzipped tarballs are detected by magic
/// and decompressed transparently.
pub fn load_from_tarball(path: &Path, reference: &str) -> Result<Image> {
    let reference = Reference::parse(reference)?;
    let tagged = reference.tagged();

    let mut data = fs::read(path).map_err(|e| BuildError::io(path, e))?;
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut decompressed = Vec::new();
        GzDecoder::new(data.as_slice())
            .read_to_end(&mut decompressed)
            .map_err(|e| BuildError::io(path, e))?;
        data = decompressed;
    }

    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut archive = tar::Archive::new(data.as_slice());
    for entry in archive.entries().map_err(|e| BuildError::io(path, e))? {
        let mut entry = entry.map_err(|e| BuildError::io(path, e))?;
        let name = entry
            .path()
            .map_err(|e| BuildError::io(path, e))?
            .to_string_lossy()
            .into_owned();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| BuildError::io(path, e))?;
        files.insert(name, bytes);
    }

    let manifest_bytes = find_manifest(&files, &tagged)?;
    let manifest: oci_spec::image::ImageManifest = serde_json::from_slice(&manifest_bytes)?;

    let config_bytes = blob(&files, manifest.config().digest())?;
    let config: ConfigFile = serde_json::from_slice(config_bytes)?;

    let mut image = Image::empty().with_config(config).with_media_type(
        manifest
            .media_type()
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| MEDIA_TYPE_OCI_MANIFEST.to_string()),
    );
    for layer_desc in manifest.layers() {
        let bytes = blob(&files, layer_desc.digest())?;
        image = image.append_layer(Layer::from_tar_bytes(bytes.to_vec()));
    }
    Ok(image)
}

/// Locate the manifest blob for a tag, preferring the index when present.
fn find_manifest(files: &BTreeMap<String, Vec<u8>>, tagged: &str) -> Result<Vec<u8>> {
    if let Some(index_bytes) = files.get("index.json") {
        let index: oci_spec::image::ImageIndex = serde_json::from_slice(index_bytes)?;
        let descriptor = index
            .manifests()
            .iter()
            .find(|d| {
                d.annotations()
                    .as_ref()
                    .and_then(|a| a.get(LABEL_REF_NAME))
                    .map(|name| name == tagged)
                    .unwrap_or(false)
            })
            .or_else(|| {
                if index.manifests().len() == 1 {
                    index.manifests().first()
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                BuildError::Validation(format!("reference not found in tarball: {}", tagged))
            })?;
        return blob(files, descriptor.digest()).map(|b| b.to_vec());
    }

    // No index: scan blobs for something that parses as a manifest.
    for (name, bytes) in files {
        if !name.starts_with("blobs/sha256/") {
            continue;
        }
        if let Ok(manifest) = serde_json::from_slice::<oci_spec::image::ImageManifest>(bytes) {
            if manifest.schema_version() == 2 {
                return Ok(bytes.clone());
            }
        }
    }
    Err(BuildError::Validation(
        "no image manifest found in tarball".to_string(),
    ))
}

fn blob<'a>(files: &'a BTreeMap<String, Vec<u8>>, digest: &str) -> Result<&'a Vec<u8>> {
    let name = format!("blobs/sha256/{}", digest_hex(digest));
    files.get(&name).ok_or_else(|| {
        BuildError::Validation(format!("tarball missing blob: {}", digest))
    })
}
