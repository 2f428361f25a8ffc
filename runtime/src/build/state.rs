//! Build state accumulator.
//!
//! Each directive consumes the state produced by the previous one and
//! returns the next. The state never escapes a build except through
//! [`BuildState::into_artifact`].

use std::collections::BTreeSet;

use boxfile_core::error::{BuildError, Result};

use crate::artifact::{FilesystemDelta, HistoryEntry, ImageArtifact};
use crate::manifest::ExposedPort;

/// Cumulative state after applying a prefix of the directive sequence.
#[derive(Debug, Clone)]
pub struct BuildState {
    base_image: Option<String>,
    workdir: String,
    env: Vec<(String, String)>,
    ports: BTreeSet<ExposedPort>,
    command: Option<Vec<String>>,
    layers: Vec<FilesystemDelta>,
    history: Vec<HistoryEntry>,
    staged: BTreeSet<String>,
}

impl Default for BuildState {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildState {
    pub fn new() -> Self {
        Self {
            base_image: None,
            workdir: "/".to_string(),
            env: Vec::new(),
            ports: BTreeSet::new(),
            command: None,
            layers: Vec::new(),
            history: Vec::new(),
            staged: BTreeSet::new(),
        }
    }

    pub fn base_image(&self) -> Option<&str> {
        self.base_image.as_deref()
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn ports(&self) -> &BTreeSet<ExposedPort> {
        &self.ports
    }

    pub fn layers(&self) -> &[FilesystemDelta] {
        &self.layers
    }

    pub fn with_base(mut self, image: impl Into<String>) -> Self {
        self.base_image = Some(image.into());
        self
    }

    /// Set the working directory. `path` must already be resolved.
    pub fn with_workdir(mut self, path: impl Into<String>) -> Self {
        self.workdir = path.into();
        self
    }

    /// Set a variable. A later write to the same key replaces the value
    /// in place.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    /// Union ports into the exposed set.
    pub fn with_ports(mut self, ports: impl IntoIterator<Item = ExposedPort>) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn with_command(mut self, argv: Vec<String>) -> Self {
        self.command = Some(argv);
        self
    }

    /// Append a layer and mark its paths as staged.
    pub fn with_layer(mut self, layer: FilesystemDelta) -> Self {
        self.staged
            .extend(layer.entries.iter().map(|entry| entry.path.clone()));
        self.layers.push(layer);
        self
    }

    /// Record the history entry for a directive.
    pub fn record(mut self, position: usize, created_by: impl Into<String>, empty_layer: bool) -> Self {
        self.history.push(HistoryEntry {
            position,
            created_by: created_by.into(),
            empty_layer,
        });
        self
    }

    /// Whether an absolute image path was staged by an earlier layer.
    pub fn is_staged(&self, image_path: &str) -> bool {
        self.staged.contains(image_path)
    }

    /// Expand `$VAR` and `${VAR}` against the accumulated environment.
    /// Unknown variables are left untouched.
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(idx) = rest.find('$') {
            out.push_str(&rest[..idx]);
            let after = &rest[idx + 1..];

            if let Some(braced) = after.strip_prefix('{') {
                if let Some(end) = braced.find('}') {
                    let name = &braced[..end];
                    match self.env_var(name) {
                        Some(value) if is_var_name(name) => out.push_str(value),
                        _ => out.push_str(&rest[idx..idx + end + 3]),
                    }
                    rest = &braced[end + 1..];
                    continue;
                }
                out.push_str(&rest[idx..]);
                return out;
            }

            let name_len = after
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_alphanumeric() || *c == '_') || (*i == 0 && c.is_ascii_digit()))
                .map(|(i, _)| i)
                .unwrap_or(after.len());
            let name = &after[..name_len];
            match self.env_var(name) {
                Some(value) if !name.is_empty() => out.push_str(value),
                _ => {
                    out.push('$');
                    out.push_str(name);
                }
            }
            rest = &after[name_len..];
        }

        out.push_str(rest);
        out
    }

    /// Resolve an image path against the working directory, normalizing
    /// `.` and `..` components. The result is absolute.
    pub fn resolve(&self, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.workdir.trim_end_matches('/'), path)
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    /// Finish the build.
    pub fn into_artifact(self, build_id: impl Into<String>) -> Result<ImageArtifact> {
        let base_image = self
            .base_image
            .ok_or_else(|| BuildError::InvalidTransition("build finished without FROM".to_string()))?;
        let command = self
            .command
            .ok_or_else(|| BuildError::InvalidTransition("build finished without CMD".to_string()))?;

        Ok(ImageArtifact {
            build_id: build_id.into(),
            base_image,
            layers: self.layers,
            env: self.env,
            workdir: self.workdir,
            exposed_ports: self.ports,
            command,
            history: self.history,
            created: chrono::Utc::now(),
        })
    }
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
