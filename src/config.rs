//! OCI image configuration: generation, validation and merging.
//!
//! The wire types mirror the OCI image config JSON. All maps are `BTreeMap`
//! so serialization is deterministic; the config digest of two equal configs
//! is always the same.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};
use crate::image::Image;
use crate::labels::LABEL_CREATED;
use crate::options::{BuildOptions, Platform};

/// Value type for presence-sets (`ExposedPorts`, `Volumes`), serialized as
/// an empty JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

/// Container runtime configuration section of the OCI config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(rename = "Cmd", default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(
        rename = "Entrypoint",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub entrypoint: Vec<String>,

    #[serde(
        rename = "WorkingDir",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub working_dir: String,

    #[serde(rename = "User", default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(
        rename = "ExposedPorts",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub exposed_ports: BTreeMap<String, EmptyObject>,

    #[serde(
        rename = "Volumes",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub volumes: BTreeMap<String, EmptyObject>,

    #[serde(rename = "Labels", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Root filesystem section. Diff-ids are derived from an image's layers at
/// serialization time, never stored by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        RootFs {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// Top-level OCI image configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub config: Config,

    #[serde(default)]
    pub rootfs: RootFs,
}

/// Generates and validates OCI image configurations.
///
/// Scoped to a resolved platform; options with an unset platform fall back
/// to it field by field.
#[derive(Debug, Clone)]
pub struct ConfigFactory {
    platform: Platform,
}

impl ConfigFactory {
    pub fn new(platform: Platform) -> Self {
        ConfigFactory { platform }
    }

    /// Generate a validated configuration from build options.
    ///
    /// The `created` timestamp is the generation time; unlike layer
    /// timestamps it is not reproducibility-controlled. A blank
    /// `org.opencontainers.image.created` label is auto-filled with the
    /// current UTC time in RFC3339 form; every other label passes through.
    pub fn generate_config(&self, opts: &BuildOptions) -> Result<ConfigFile> {
        let now = Utc::now();

        let mut labels = opts.labels.clone();
        if let Some(value) = labels.get_mut(LABEL_CREATED) {
            if value.is_empty() {
                *value = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            }
        }

        let config = ConfigFile {
            architecture: pick(&opts.platform.architecture, &self.platform.architecture),
            os: pick(&opts.platform.os, &self.platform.os),
            variant: pick(&opts.platform.variant, &self.platform.variant),
            created: Some(now),
            config: Config {
                env: opts.env.clone(),
                cmd: opts.cmd.clone(),
                entrypoint: opts.entrypoint.clone(),
                working_dir: opts.working_dir.clone(),
                user: opts.user.clone(),
                exposed_ports: presence_set(&opts.exposed_ports),
                volumes: presence_set(&opts.volumes),
                labels,
            },
            rootfs: RootFs::default(),
        };

        validate_config(&config)?;
        Ok(config)
    }

    /// Attach a configuration to an image, returning a new image handle.
    /// Existing layers are preserved unchanged.
    pub fn apply_config(&self, image: Image, config: ConfigFile) -> Result<Image> {
        Ok(image.with_config(config))
    }
}

fn pick(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn presence_set(keys: &std::collections::BTreeSet<String>) -> BTreeMap<String, EmptyObject> {
    keys.iter()
        .map(|k| (k.clone(), EmptyObject::default()))
        .collect()
}

/// Validate a configuration. The first violation wins.
///
/// Port keys get only a shallow separator check here; the strict
/// [`validate_port_format`] helper is a separate tier that callers opt into.
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    if config.architecture.is_empty() {
        return Err(BuildError::Validation(
            "architecture cannot be empty".to_string(),
        ));
    }
    if config.os.is_empty() {
        return Err(BuildError::Validation(
            "operating system cannot be empty".to_string(),
        ));
    }
    if !config.config.working_dir.is_empty() && !config.config.working_dir.starts_with('/') {
        return Err(BuildError::Validation(format!(
            "working directory must be an absolute path: {}",
            config.config.working_dir
        )));
    }
    for port in config.config.exposed_ports.keys() {
        if !port.contains('/') {
            return Err(BuildError::Validation(format!(
                "invalid exposed port format {}: expected 'port/protocol'",
                port
            )));
        }
    }
    for env in &config.config.env {
        if !env.contains('=') {
            return Err(BuildError::Validation(format!(
                "environment variable must be in KEY=value format: {}",
                env
            )));
        }
    }
    if config.config.user.matches(':').count() > 1 {
        return Err(BuildError::Validation(format!(
            "invalid user format {}: at most one colon allowed",
            config.config.user
        )));
    }
    Ok(())
}

/// Strict exposed-port validation: numeric port in range plus a tcp/udp
/// protocol. Not invoked from [`validate_config`].
pub fn validate_port_format(port: &str) -> Result<()> {
    let (number, protocol) = port.split_once('/').ok_or_else(|| {
        BuildError::Validation(format!(
            "port must be in format 'port/protocol': {}",
            port
        ))
    })?;

    let number: u32 = number
        .parse()
        .map_err(|_| BuildError::Validation(format!("invalid port number: {}", number)))?;
    if !(1..=65535).contains(&number) {
        return Err(BuildError::Validation(format!(
            "port number must be between 1 and 65535: {}",
            number
        )));
    }

    match protocol.to_ascii_lowercase().as_str() {
        "tcp" | "udp" => Ok(()),
        other => Err(BuildError::Validation(format!(
            "protocol must be 'tcp' or 'udp': {}",
            other
        ))),
    }
}

/// Strict user validation: numeric UID or username, optionally ":group".
/// Not invoked from [`validate_config`].
pub fn validate_user_format(user: &str) -> Result<()> {
    if user.is_empty() {
        return Ok(());
    }

    let mut parts = user.split(':');
    let user_part = parts.next().unwrap_or("");
    let group_part = parts.next();
    if parts.next().is_some() {
        return Err(BuildError::Validation(
            "user specification can have at most one colon".to_string(),
        ));
    }

    for (name, part) in [("user", Some(user_part)), ("group", group_part)] {
        let Some(part) = part else { continue };
        if part.is_empty() {
            return Err(BuildError::Validation(format!("{} part cannot be empty", name)));
        }
        if part.parse::<u32>().is_err() && !is_valid_name(part) {
            return Err(BuildError::Validation(format!("invalid {} name format: {}", name, part)));
        }
    }
    Ok(())
}

/// Basic Unix user/group name check: starts with a letter or underscore,
/// then letters, digits, underscores or hyphens; at most 32 characters.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 32 {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Merge configurations left to right; later configs override earlier ones.
///
/// Scalars are overwritten by the last non-empty value. Cmd and Entrypoint
/// are replaced wholesale, never element-merged. Env entries are appended
/// across all inputs. Labels, exposed ports and volumes merge as maps with
/// later keys winning. Zero inputs yield an empty default config.
pub fn merge_configs(configs: &[ConfigFile]) -> ConfigFile {
    let Some((first, rest)) = configs.split_first() else {
        return ConfigFile::default();
    };

    let mut result = first.clone();
    for cfg in rest {
        if !cfg.architecture.is_empty() {
            result.architecture = cfg.architecture.clone();
        }
        if !cfg.os.is_empty() {
            result.os = cfg.os.clone();
        }
        if !cfg.variant.is_empty() {
            result.variant = cfg.variant.clone();
        }

        result.config.env.extend(cfg.config.env.iter().cloned());
        if !cfg.config.cmd.is_empty() {
            result.config.cmd = cfg.config.cmd.clone();
        }
        if !cfg.config.entrypoint.is_empty() {
            result.config.entrypoint = cfg.config.entrypoint.clone();
        }
        if !cfg.config.working_dir.is_empty() {
            result.config.working_dir = cfg.config.working_dir.clone();
        }
        if !cfg.config.user.is_empty() {
            result.config.user = cfg.config.user.clone();
        }

        result
            .config
            .labels
            .extend(cfg.config.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        result
            .config
            .exposed_ports
            .extend(cfg.config.exposed_ports.iter().map(|(k, v)| (k.clone(), v.clone())));
        result
            .config
            .volumes
            .extend(cfg.config.volumes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    result
}
