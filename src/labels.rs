//! Well-known OCI annotation keys and the recommended default label set.

use std::collections::BTreeMap;

/// Build timestamp label. Auto-filled at config generation when left blank.
pub const LABEL_CREATED: &str = "org.opencontainers.image.created";

/// Source repository label.
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";

/// Human-readable title label.
pub const LABEL_TITLE: &str = "org.opencontainers.image.title";

/// Human-readable description label.
pub const LABEL_DESCRIPTION: &str = "org.opencontainers.image.description";

/// Version label.
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";

/// Reference-name annotation. When present on build options it selects the
/// tag used for tarball export.
pub const LABEL_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Recommended OCI label set for a build.
///
/// The `created` key is intentionally blank; it is filled with the build
/// time during config generation.
pub fn default_labels(source: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_CREATED.to_string(), String::new());
    labels.insert(LABEL_SOURCE.to_string(), source.to_string());
    labels.insert(
        LABEL_TITLE.to_string(),
        "Built with scratchbuild".to_string(),
    );
    labels.insert(
        LABEL_DESCRIPTION.to_string(),
        "OCI image built from a directory".to_string(),
    );
    labels.insert(LABEL_VERSION.to_string(), "latest".to_string());
    labels
}
