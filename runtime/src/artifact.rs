//! Image artifacts.
//!
//! The immutable result of a successful build: an ordered stack of
//! filesystem deltas plus the runtime metadata the launcher needs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use boxfile_core::error::{BuildError, Result};
use serde::Serialize;

use crate::build::layer::{sha256_bytes, DeltaEntry};
use crate::manifest::ExposedPort;

const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation carrying the base image reference on the exported manifest.
pub const BASE_NAME_ANNOTATION: &str = "org.opencontainers.image.base.name";

/// The layer produced by one COPY or RUN directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemDelta {
    /// Position of the directive that produced the layer
    pub position: usize,
    /// Directive text recorded in history
    pub created_by: String,
    /// Paths added by the layer
    pub entries: Vec<DeltaEntry>,
    /// SHA256 of the compressed blob (hex, no prefix)
    pub digest: String,
    /// SHA256 of the uncompressed tar (hex, no prefix)
    pub diff_id: String,
    /// Compressed size in bytes
    pub size: u64,
    /// gzip-compressed tar
    #[serde(skip)]
    pub blob: Vec<u8>,
}

impl FilesystemDelta {
    /// Whether the layer adds the given absolute image path.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    pub fn prefixed_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }
}

/// One build step as recorded in the image history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub position: usize,
    pub created_by: String,
    pub empty_layer: bool,
}

/// A successfully built image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageArtifact {
    pub build_id: String,
    /// Base image reference from FROM
    pub base_image: String,
    /// Filesystem deltas in directive order
    pub layers: Vec<FilesystemDelta>,
    /// Environment in first-declaration order
    pub env: Vec<(String, String)>,
    pub workdir: String,
    pub exposed_ports: BTreeSet<ExposedPort>,
    pub command: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub created: chrono::DateTime<chrono::Utc>,
}

impl ImageArtifact {
    /// Look up a variable in the final environment.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether any layer adds the given absolute image path.
    pub fn contains_path(&self, path: &str) -> bool {
        self.layers.iter().any(|layer| layer.contains(path))
    }

    /// Total compressed size of all layers.
    pub fn size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }

    /// Render the OCI image configuration.
    pub fn config_json(&self) -> serde_json::Value {
        let created = self.created.to_rfc3339();
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };

        let mut config = serde_json::Map::new();
        if !self.env.is_empty() {
            let env: Vec<String> = self
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            config.insert("Env".to_string(), serde_json::json!(env));
        }
        config.insert("Cmd".to_string(), serde_json::json!(self.command));
        if self.workdir != "/" {
            config.insert("WorkingDir".to_string(), serde_json::json!(self.workdir));
        }
        if !self.exposed_ports.is_empty() {
            let ports: BTreeMap<String, serde_json::Value> = self
                .exposed_ports
                .iter()
                .map(|p| (p.to_string(), serde_json::json!({})))
                .collect();
            config.insert("ExposedPorts".to_string(), serde_json::json!(ports));
        }

        serde_json::json!({
            "architecture": arch,
            "os": "linux",
            "created": created,
            "config": config,
            "rootfs": {
                "type": "layers",
                "diff_ids": self.layers.iter()
                    .map(|l| format!("sha256:{}", l.diff_id))
                    .collect::<Vec<_>>()
            },
            "history": self.history.iter().map(|h| {
                let mut entry = serde_json::json!({
                    "created": created,
                    "created_by": h.created_by
                });
                if h.empty_layer {
                    entry["empty_layer"] = serde_json::json!(true);
                }
                entry
            }).collect::<Vec<_>>()
        })
    }

    /// Write the artifact as an OCI image layout under `dir`.
    ///
    /// Only the layers produced by this build are written; the base
    /// image is referenced through the base-name annotation. Returns the
    /// manifest digest (`sha256:...`).
    pub fn write_oci_layout(&self, dir: &Path) -> Result<String> {
        let blobs_dir = dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| {
            BuildError::Layer(format!(
                "Failed to create blobs dir {}: {}",
                blobs_dir.display(),
                e
            ))
        })?;

        let mut layer_descriptors = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let blob_path = blobs_dir.join(&layer.digest);
            if !blob_path.exists() {
                std::fs::write(&blob_path, &layer.blob).map_err(|e| {
                    BuildError::Layer(format!(
                        "Failed to write layer from step {}: {}",
                        layer.position, e
                    ))
                })?;
            }
            layer_descriptors.push(serde_json::json!({
                "mediaType": LAYER_MEDIA_TYPE,
                "digest": layer.prefixed_digest(),
                "size": layer.size
            }));
        }

        let config_bytes = serde_json::to_vec_pretty(&self.config_json())?;
        let config_digest = sha256_bytes(&config_bytes);
        std::fs::write(blobs_dir.join(&config_digest), &config_bytes)?;

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": CONFIG_MEDIA_TYPE,
                "digest": format!("sha256:{}", config_digest),
                "size": config_bytes.len()
            },
            "layers": layer_descriptors,
            "annotations": {
                BASE_NAME_ANNOTATION: self.base_image
            }
        });
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        let manifest_digest = sha256_bytes(&manifest_bytes);
        std::fs::write(blobs_dir.join(&manifest_digest), &manifest_bytes)?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": INDEX_MEDIA_TYPE,
            "manifests": [{
                "mediaType": MANIFEST_MEDIA_TYPE,
                "digest": format!("sha256:{}", manifest_digest),
                "size": manifest_bytes.len()
            }]
        });
        std::fs::write(dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
        std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#)?;

        tracing::debug!(
            dir = %dir.display(),
            layers = self.layers.len(),
            digest = %manifest_digest,
            "Wrote OCI image layout"
        );
        Ok(format!("sha256:{}", manifest_digest))
    }
}
