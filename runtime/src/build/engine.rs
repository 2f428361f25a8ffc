//! Build engine.
//!
//! Applies a validated manifest's directives strictly in order onto a
//! [`BuildState`], inside a private per-build workspace, and produces an
//! [`ImageArtifact`]. A failing directive aborts the build; no partial
//! artifact is ever returned and the workspace is removed on every
//! outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use boxfile_core::config::BuilderConfig;
use boxfile_core::error::{BuildError, Result};
use boxfile_core::event::{events, BuildEvent, EventEmitter};
use boxfile_core::validation::{Rule, ValidationReport, Violation};
use tokio_util::sync::CancellationToken;

use super::context::BuildContext;
use super::deps::{infer_requirements, Requirement};
use super::installer::{DeferredInstaller, DependencyInstaller, InstallRequest, ShellInstaller};
use super::layer::pack_layer;
use super::phase::PhaseTracker;
use super::state::BuildState;
use crate::artifact::{FilesystemDelta, ImageArtifact};
use crate::manifest::{Directive, DirectiveKind, ExposedPort, ValidatedManifest};

/// Per-build inputs shared by every directive handler.
struct Step<'a> {
    build_id: &'a str,
    position: usize,
    label: &'a str,
    rootfs: &'a Path,
    context: &'a BuildContext,
}

/// Builds images from validated manifests.
///
/// A builder holds no per-build state, so one instance can run several
/// independent builds concurrently.
#[derive(Clone)]
pub struct Builder {
    installer: Arc<dyn DependencyInstaller>,
    events: EventEmitter,
}

impl Builder {
    pub fn new(installer: Arc<dyn DependencyInstaller>) -> Self {
        Self {
            installer,
            events: EventEmitter::default(),
        }
    }

    /// Builder honouring the install and event settings of `config`.
    pub fn from_config(config: &BuilderConfig) -> Self {
        let installer: Arc<dyn DependencyInstaller> = if config.install.execute {
            Arc::new(ShellInstaller::from_config(&config.install))
        } else {
            Arc::new(DeferredInstaller)
        };
        Self {
            installer,
            events: EventEmitter::new(config.event_capacity),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn installer_name(&self) -> &str {
        self.installer.name()
    }

    /// Build `manifest` against `context`.
    pub async fn build(
        &self,
        manifest: &ValidatedManifest,
        context: &BuildContext,
    ) -> Result<ImageArtifact> {
        self.build_with_cancel(manifest, context, &CancellationToken::new())
            .await
    }

    /// Build with cooperative cancellation, checked between directives.
    pub async fn build_with_cancel(
        &self,
        manifest: &ValidatedManifest,
        context: &BuildContext,
        cancel: &CancellationToken,
    ) -> Result<ImageArtifact> {
        let build_id = uuid::Uuid::new_v4().to_string();
        let directives = manifest.directives();

        let workspace = tempfile::Builder::new()
            .prefix("boxfile-build-")
            .tempdir()?;
        let rootfs = workspace.path().join("rootfs");
        std::fs::create_dir_all(&rootfs)?;

        tracing::info!(
            build_id = %build_id,
            directives = directives.len(),
            context = %context.root().display(),
            installer = self.installer.name(),
            "Build started"
        );

        let mut tracker = PhaseTracker::new(&build_id, directives.len(), self.events.clone());
        let mut state = BuildState::new();

        for directive in directives {
            let label = directive.kind.to_string();
            let position = tracker.begin(&label)?;

            let step = Step {
                build_id: &build_id,
                position,
                label: &label,
                rootfs: &rootfs,
                context,
            };

            let outcome = if cancel.is_cancelled() {
                Err(BuildError::Cancelled { position })
            } else {
                self.apply(state, directive, &step).await
            };

            state = match outcome {
                Ok(next) => next,
                Err(e) => {
                    tracker.fail(&e)?;
                    tracing::warn!(
                        build_id = %build_id,
                        phase = %tracker.phase(),
                        error = %e,
                        "Build failed"
                    );
                    return Err(e);
                }
            };

            tracker.applied(position, &label);
            tracing::info!(
                build_id = %build_id,
                position,
                kind = directive.kind.name(),
                "Applied {}",
                label
            );
        }

        tracker.complete()?;
        let artifact = state.into_artifact(build_id.as_str())?;

        tracing::info!(
            build_id = %build_id,
            layers = artifact.layers.len(),
            size = artifact.size(),
            "Build complete"
        );
        Ok(artifact)
    }

    async fn apply(&self, state: BuildState, directive: &Directive, step: &Step<'_>) -> Result<BuildState> {
        let position = step.position;
        match &directive.kind {
            DirectiveKind::SelectBase { image } => {
                Ok(state.with_base(image.as_str()).record(position, step.label, true))
            }

            DirectiveKind::SetWorkdir { path } => {
                let resolved = state.resolve(&state.expand(path));
                let host = step.rootfs.join(resolved.trim_start_matches('/'));
                std::fs::create_dir_all(&host).map_err(|e| {
                    BuildError::Layer(format!("Failed to create WORKDIR {}: {}", resolved, e))
                })?;
                Ok(state.with_workdir(resolved).record(position, step.label, true))
            }

            DirectiveKind::CopyFiles {
                sources,
                destination,
            } => {
                let layer = handle_copy(&state, sources, destination, step)?;
                Ok(state.with_layer(layer).record(position, step.label, false))
            }

            DirectiveKind::InstallDependencies { command, requires } => {
                self.handle_install(state, command, requires.as_deref(), step)
                    .await
            }

            DirectiveKind::SetEnv { key, value } => {
                let value = state.expand(value);
                Ok(state.with_env(key.as_str(), value).record(position, step.label, true))
            }

            DirectiveKind::ExposePort { ports } => {
                let parsed = ports
                    .iter()
                    .map(|spec| {
                        spec.parse::<ExposedPort>().map_err(|reason| {
                            BuildError::Invalid(ValidationReport::new(vec![Violation::new(
                                Some(position),
                                Rule::InvalidPort,
                                format!("EXPOSE {}", reason),
                            )]))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(state.with_ports(parsed).record(position, step.label, true))
            }

            DirectiveKind::SetCommand { argv } => {
                Ok(state.with_command(argv.clone()).record(position, step.label, true))
            }
        }
    }

    /// Handle RUN: check the dependency manifest is staged, then hand the
    /// command to the installer.
    async fn handle_install(
        &self,
        state: BuildState,
        command: &str,
        requires: Option<&str>,
        step: &Step<'_>,
    ) -> Result<BuildState> {
        let command = state.expand(command);

        let requirements = match requires {
            Some(path) => vec![Requirement::new(state.expand(path))],
            None => infer_requirements(&command),
        };
        for requirement in &requirements {
            let staged = requirement
                .alternatives
                .iter()
                .any(|alt| state.is_staged(&state.resolve(alt)));
            if !staged {
                tracing::debug!(
                    position = step.position,
                    required = ?requirement.alternatives,
                    "Dependency manifest not staged"
                );
                return Err(BuildError::MissingResource {
                    position: step.position,
                    path: requirement.primary().to_string(),
                });
            }
        }

        let request = InstallRequest {
            position: step.position,
            command: &command,
            rootfs: step.rootfs,
            workdir: state.workdir(),
            env: state.env(),
        };
        let outcome = self.installer.install(&request).await?;

        if !outcome.executed {
            self.events.emit(BuildEvent::with_string(
                events::INSTALL_DEFERRED,
                step.build_id,
                Some(step.position),
                command.as_str(),
            ));
            return Ok(state.record(step.position, step.label, true));
        }

        self.events.emit(BuildEvent::with_string(
            events::INSTALL_COMPLETED,
            step.build_id,
            Some(step.position),
            command.as_str(),
        ));

        if outcome.changed.is_empty() {
            return Ok(state.record(step.position, step.label, true));
        }

        tracing::debug!(
            position = step.position,
            changed = outcome.changed.len(),
            "Install changed the rootfs"
        );
        let layer = delta(step, &outcome.changed)?;
        Ok(state.with_layer(layer).record(step.position, step.label, false))
    }
}

/// Handle COPY: stage sources from the context into the rootfs and pack
/// the copied paths into a layer.
fn handle_copy(
    state: &BuildState,
    sources: &[String],
    destination: &str,
    step: &Step<'_>,
) -> Result<FilesystemDelta> {
    // Every source must exist before anything is copied
    let mut resolved = Vec::with_capacity(sources.len());
    for source in sources {
        match step.context.resolve(source)? {
            Some(path) => resolved.push((source.as_str(), path)),
            None => {
                return Err(BuildError::MissingResource {
                    position: step.position,
                    path: source.clone(),
                })
            }
        }
    }

    let destination = state.expand(destination);
    let resolved_dst = state.resolve(&destination);
    let dst_in_rootfs = step.rootfs.join(resolved_dst.trim_start_matches('/'));

    let into_dir = destination.ends_with('/')
        || resolved.len() > 1
        || resolved.iter().any(|(_, path)| path.is_dir())
        || dst_in_rootfs.is_dir();

    let mut copied = Vec::new();
    if into_dir {
        std::fs::create_dir_all(&dst_in_rootfs).map_err(|e| {
            BuildError::Layer(format!(
                "Failed to create COPY destination {}: {}",
                resolved_dst, e
            ))
        })?;
        copied.push(relative_to(step.rootfs, &dst_in_rootfs));
    } else if let Some(parent) = dst_in_rootfs.parent() {
        std::fs::create_dir_all(parent)?;
    }

    for (source, src_path) in &resolved {
        if src_path.is_dir() {
            copy_dir_recursive(src_path, &dst_in_rootfs, step.rootfs, &mut copied)?;
            continue;
        }

        let target = if into_dir {
            let name = src_path.file_name().ok_or_else(|| {
                BuildError::Layer(format!("COPY source '{}' has no file name", source))
            })?;
            dst_in_rootfs.join(name)
        } else {
            dst_in_rootfs.clone()
        };
        copy_file(src_path, &target)?;
        copied.push(relative_to(step.rootfs, &target));
    }

    tracing::debug!(
        position = step.position,
        destination = %resolved_dst,
        paths = copied.len(),
        "Staged files"
    );
    delta(step, &copied)
}

/// Pack changed rootfs paths into the layer for the current step.
fn delta(step: &Step<'_>, paths: &[PathBuf]) -> Result<FilesystemDelta> {
    let blob = pack_layer(step.rootfs, paths)?;
    let size = blob.size();
    Ok(FilesystemDelta {
        position: step.position,
        created_by: step.label.to_string(),
        entries: blob.entries,
        digest: blob.digest,
        diff_id: blob.diff_id,
        size,
        blob: blob.bytes,
    })
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    std::fs::copy(src, dst).map_err(|e| {
        BuildError::Layer(format!(
            "Failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            e
        ))
    })?;
    Ok(())
}

/// Recursively copy the contents of `src` into `dst`, recording every
/// created path relative to `rootfs`. Symlinks inside the context are
/// not followed.
fn copy_dir_recursive(src: &Path, dst: &Path, rootfs: &Path, copied: &mut Vec<PathBuf>) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| {
        BuildError::Layer(format!("Failed to create directory {}: {}", dst.display(), e))
    })?;

    let mut entries = std::fs::read_dir(src)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            tracing::warn!(path = %src_path.display(), "Skipping symlink in COPY source");
        } else if file_type.is_dir() {
            copied.push(relative_to(rootfs, &dst_path));
            copy_dir_recursive(&src_path, &dst_path, rootfs, copied)?;
        } else {
            copy_file(&src_path, &dst_path)?;
            copied.push(relative_to(rootfs, &dst_path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::placeholder::PlaceholderPolicy;
    use tempfile::TempDir;

    fn validated(text: &str) -> ValidatedManifest {
        Manifest::parse(text)
            .unwrap()
            .into_validated(&PlaceholderPolicy::default())
            .unwrap()
    }

    fn context(files: &[(&str, &str)]) -> (TempDir, BuildContext) {
        let tmp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = tmp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let ctx = BuildContext::open(tmp.path()).unwrap();
        (tmp, ctx)
    }

    fn builder() -> Builder {
        Builder::new(Arc::new(DeferredInstaller))
    }

    #[tokio::test]
    async fn test_metadata_only_build() {
        let (_tmp, ctx) = context(&[]);
        let manifest = validated(
            "FROM alpine:3.19\nWORKDIR /srv\nWORKDIR app\nENV A=1\nENV B=$A-2\nENV A=3\nEXPOSE 80 53/udp\nEXPOSE 80\nCMD [\"run\"]\n",
        );
        let artifact = builder().build(&manifest, &ctx).await.unwrap();

        assert_eq!(artifact.base_image, "alpine:3.19");
        assert_eq!(artifact.workdir, "/srv/app");
        assert_eq!(
            artifact.env,
            vec![
                ("A".to_string(), "3".to_string()),
                ("B".to_string(), "1-2".to_string())
            ]
        );
        assert_eq!(artifact.exposed_ports.len(), 2);
        assert_eq!(artifact.command, vec!["run"]);
        assert!(artifact.layers.is_empty());
        assert_eq!(artifact.history.len(), 9);
        assert!(artifact.history.iter().all(|h| h.empty_layer));
    }

    #[tokio::test]
    async fn test_copy_file_into_directory() {
        let (_tmp, ctx) = context(&[("pyproject.toml", "[project]\n")]);
        let manifest = validated("FROM python\nWORKDIR /app\nCOPY pyproject.toml ./\nCMD [\"x\"]\n");
        let artifact = builder().build(&manifest, &ctx).await.unwrap();

        assert_eq!(artifact.layers.len(), 1);
        let layer = &artifact.layers[0];
        assert_eq!(layer.position, 3);
        assert!(layer.contains("/app/pyproject.toml"));
        assert!(layer.contains("/app"));
    }

    #[tokio::test]
    async fn test_copy_file_to_renamed_path() {
        let (_tmp, ctx) = context(&[("conf/dev.ini", "x=1\n")]);
        let manifest = validated("FROM alpine\nCOPY conf/dev.ini /etc/app.ini\nCMD [\"x\"]\n");
        let artifact = builder().build(&manifest, &ctx).await.unwrap();
        assert!(artifact.contains_path("/etc/app.ini"));
        assert!(!artifact.contains_path("/etc/app.ini/dev.ini"));
    }

    #[tokio::test]
    async fn test_copy_directory_copies_contents() {
        let (_tmp, ctx) = context(&[("src/myapp/__init__.py", ""), ("src/myapp/main.py", "print()\n")]);
        let manifest = validated("FROM python\nWORKDIR /app\nCOPY src/ /app/src/\nCMD [\"x\"]\n");
        let artifact = builder().build(&manifest, &ctx).await.unwrap();

        let layer = &artifact.layers[0];
        assert!(layer.contains("/app/src/myapp"));
        assert!(layer.contains("/app/src/myapp/main.py"));
        assert!(!layer.contains("/app/src/src"));
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let (_tmp, ctx) = context(&[("present.txt", "")]);
        let manifest = validated("FROM alpine\nCOPY present.txt missing.txt /data/\nCMD [\"x\"]\n");
        let err = builder().build(&manifest, &ctx).await.unwrap_err();
        match err {
            BuildError::MissingResource { position, path } => {
                assert_eq!(position, 2);
                assert_eq!(path, "missing.txt");
            }
            other => panic!("expected MissingResource, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_requires_staged_manifest() {
        let (_tmp, ctx) = context(&[("requirements.txt", "flask\n")]);
        let manifest = validated("FROM python\nWORKDIR /app\nRUN pip install -r requirements.txt\nCMD [\"x\"]\n");
        let err = builder().build(&manifest, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingResource { position: 3, ref path } if path == "requirements.txt"
        ));
    }

    #[tokio::test]
    async fn test_install_explicit_requires() {
        let (_tmp, ctx) = context(&[("deps.lock", "")]);
        let manifest = validated(
            "FROM alpine\nCOPY deps.lock /opt/\nRUN --requires=/opt/deps.lock ./install.sh\nCMD [\"x\"]\n",
        );
        assert!(builder().build(&manifest, &ctx).await.is_ok());

        let manifest = validated("FROM alpine\nRUN --requires=/opt/deps.lock ./install.sh\nCMD [\"x\"]\n");
        assert!(matches!(
            builder().build(&manifest, &ctx).await,
            Err(BuildError::MissingResource { position: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_deferred_install_emits_event() {
        let (_tmp, ctx) = context(&[("package.json", "{}")]);
        let builder = builder();
        let mut rx = builder.events().subscribe();
        let manifest = validated("FROM node\nWORKDIR /app\nCOPY package.json .\nRUN npm ci\nCMD [\"node\"]\n");
        builder.build(&manifest, &ctx).await.unwrap();

        let mut saw_deferred = false;
        while let Ok(event) = rx.try_recv() {
            if event.key == events::INSTALL_DEFERRED {
                assert_eq!(event.position, Some(4));
                saw_deferred = true;
            }
        }
        assert!(saw_deferred);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_tmp, ctx) = context(&[]);
        let manifest = validated("FROM alpine\nCMD [\"x\"]\n");
        let token = CancellationToken::new();
        token.cancel();

        let builder = builder();
        let mut rx = builder.events().subscribe();
        let err = builder
            .build_with_cancel(&manifest, &ctx, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled { position: 1 }));

        let mut keys = Vec::new();
        while let Ok(event) = rx.try_recv() {
            keys.push(event.key);
        }
        assert_eq!(keys.last().map(String::as_str), Some(events::BUILD_CANCELLED));
        assert!(!keys.iter().any(|k| k == events::BUILD_COMPLETED));
    }

    #[test]
    fn test_from_config_picks_installer() {
        let mut config = BuilderConfig::default();
        assert_eq!(Builder::from_config(&config).installer_name(), "deferred");
        config.install.execute = true;
        assert_eq!(Builder::from_config(&config).installer_name(), "shell");
    }
}
