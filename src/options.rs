//! Build options and platform selection.
//!
//! `BuildOptions` is the entire configuration surface of a build. All
//! setters consume and return the value, so a configured options value can
//! be shared freely without any in-place mutation hazard.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::labels;

/// Feature flag gating multi-stage builds. Always rejected.
pub const FEATURE_MULTI_STAGE_BUILD: &str = "multi-stage-build";

/// Feature flag gating a BuildKit-style frontend. Always rejected.
pub const FEATURE_BUILDKIT_FRONTEND: &str = "buildkit-frontend";

/// Feature flag gating base-image composition. Always rejected.
pub const FEATURE_BASE_IMAGE_SUPPORT: &str = "base-image-support";

/// Target platform for the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system (e.g., "linux")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,

    /// CPU architecture (e.g., "amd64", "arm64")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    /// Architecture variant (e.g., "v8")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Platform {
            os: os.into(),
            architecture: architecture.into(),
            variant: String::new(),
        }
    }
}

/// Configuration for a single image build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Target platform. Defaults to linux/amd64 when left unset.
    #[serde(default)]
    pub platform: Platform,

    /// Base image reference. Reserved; builds always start from scratch and
    /// enabling `base-image-support` is rejected.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_image: String,

    /// OCI labels to apply to the image.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Environment variables in "KEY=value" form, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Working directory inside the container. Must be absolute when set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,

    /// Container entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    /// Default command and arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    /// User (numeric UID or name, optionally ":group").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    /// Exposed ports in "port/protocol" form (e.g., "80/tcp").
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exposed_ports: BTreeSet<String>,

    /// Volume mount points (e.g., "/data").
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub volumes: BTreeSet<String>,

    /// Feature flags gating incomplete functionality.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_flags: BTreeMap<String, bool>,
}

impl BuildOptions {
    /// Options with the default platform and recommended labels.
    pub fn with_defaults() -> Self {
        BuildOptions {
            platform: Platform::new("linux", "amd64"),
            labels: labels::default_labels("scratchbuild"),
            ..Default::default()
        }
    }

    /// Set the target platform.
    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.platform = Platform::new(os, arch);
        self
    }

    /// Set the base image reference (reserved, unused).
    pub fn with_base_image(mut self, reference: impl Into<String>) -> Self {
        self.base_image = reference.into();
        self
    }

    /// Merge labels into the options. Existing keys are overwritten.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the entrypoint.
    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = entrypoint;
        self
    }

    /// Set the default command.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Append environment variables ("KEY=value").
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Set the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Add an exposed port ("port/protocol").
    pub fn with_exposed_port(mut self, port: impl Into<String>) -> Self {
        self.exposed_ports.insert(port.into());
        self
    }

    /// Add a volume mount point.
    pub fn with_volume(mut self, path: impl Into<String>) -> Self {
        self.volumes.insert(path.into());
        self
    }

    /// Merge feature flags into the options.
    pub fn with_feature_flags(mut self, flags: BTreeMap<String, bool>) -> Self {
        self.feature_flags.extend(flags);
        self
    }
}
