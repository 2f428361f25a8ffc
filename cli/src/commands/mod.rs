//! CLI command definitions and dispatch.

mod build;
mod fill;
mod inspect;
mod validate;
mod version;

use std::path::{Path, PathBuf};

use boxfile_core::BuilderConfig;
use boxfile_runtime::MANIFEST_NAMES;
use clap::{Parser, Subcommand};

/// Boxfile: validate, fill and build container image manifests.
#[derive(Parser)]
#[command(name = "boxfile", version, about)]
pub struct Cli {
    /// Config file (default: ~/.boxfile/config.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Check a manifest for ordering, placeholder and path violations
    Validate(validate::ValidateArgs),
    /// Build an image from a manifest and a build context
    Build(build::BuildArgs),
    /// Resolve placeholder tokens in a manifest template
    Fill(fill::FillArgs),
    /// Build without running installs and print the image metadata as JSON
    Inspect(inspect::InspectArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Locate the manifest for a directory.
///
/// An explicit file is taken relative to `dir` unless absolute. Without
/// one, the first of `Boxfile`, `Dockerfile` present in `dir` is used.
pub(crate) fn locate_manifest(dir: &Path, file: Option<&str>) -> Result<PathBuf, String> {
    if let Some(f) = file {
        let p = PathBuf::from(f);
        let path = if p.is_absolute() { p } else { dir.join(p) };
        if !path.is_file() {
            return Err(format!("Manifest not found at {}", path.display()));
        }
        return Ok(path);
    }

    MANIFEST_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            format!(
                "No {} found in {}",
                MANIFEST_NAMES.join(" or "),
                dir.display()
            )
        })
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: BuilderConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Validate(args) => validate::execute(args, &config).await,
        Command::Build(args) => build::execute(args, config).await,
        Command::Fill(args) => fill::execute(args, &config).await,
        Command::Inspect(args) => inspect::execute(args, config).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_locate_prefers_boxfile() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), "FROM a\n").unwrap();
        assert_eq!(
            locate_manifest(tmp.path(), None).unwrap(),
            tmp.path().join("Dockerfile")
        );

        std::fs::write(tmp.path().join("Boxfile"), "FROM a\n").unwrap();
        assert_eq!(
            locate_manifest(tmp.path(), None).unwrap(),
            tmp.path().join("Boxfile")
        );
    }

    #[test]
    fn test_locate_explicit_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("prod.boxfile"), "FROM a\n").unwrap();
        assert_eq!(
            locate_manifest(tmp.path(), Some("prod.boxfile")).unwrap(),
            tmp.path().join("prod.boxfile")
        );
        assert!(locate_manifest(tmp.path(), Some("missing")).is_err());
    }

    #[test]
    fn test_locate_nothing() {
        let tmp = TempDir::new().unwrap();
        let err = locate_manifest(tmp.path(), None).unwrap_err();
        assert!(err.contains("Boxfile or Dockerfile"));
    }

    #[test]
    fn test_cli_parses_global_config() {
        let cli = Cli::try_parse_from(["boxfile", "validate", "--config", "/tmp/c.yaml", "-f", "Boxfile"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert!(matches!(cli.command, Command::Validate(_)));
    }
}
