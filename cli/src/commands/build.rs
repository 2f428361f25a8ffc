//! `boxfile build` command - Build an image from a manifest.
//!
//! Validates the manifest, applies its directives against the build
//! context and optionally writes the result as an OCI image layout.

use std::path::Path;

use boxfile_core::event::{events, EventPayload};
use boxfile_core::BuilderConfig;
use boxfile_runtime::{fill, parse_pairs, BuildContext, Builder, ImageArtifact, Manifest, PlaceholderPolicy};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory (contains the manifest and source files)
    #[arg(default_value = ".")]
    pub path: String,

    /// Path to the manifest (default: <PATH>/Boxfile, then <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Write the image as an OCI layout into this directory
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Fill placeholders before building (KEY=VALUE), can be repeated
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Run install commands through the configured shell
    #[arg(long)]
    pub run_install: bool,

    /// Run install commands chrooted into the build rootfs
    #[arg(long)]
    pub chroot: bool,

    /// Per-install timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Suppress build output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: BuildArgs, config: BuilderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = effective_config(config, &args);
    let context = BuildContext::open(&args.path)?;
    let manifest_path = super::locate_manifest(context.root(), args.file.as_deref())?;

    let mut text = std::fs::read_to_string(&manifest_path)
        .map_err(|e| format!("Failed to read {}: {}", manifest_path.display(), e))?;
    if !args.set.is_empty() {
        text = fill(&text, &parse_pairs(&args.set)?)?;
    }

    let policy = PlaceholderPolicy::from(&config.placeholder);
    let manifest = Manifest::parse(&text)?.into_validated(&policy)?;
    let total = manifest.directives().len();

    if !args.quiet {
        println!("Building from {}", manifest_path.display());
    }

    let builder = Builder::from_config(&config);
    let printer = (!args.quiet).then(|| spawn_step_printer(&builder, total));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling after the current step");
            on_interrupt.cancel();
        }
    });

    let result = builder.build_with_cancel(&manifest, &context, &cancel).await;

    // Closing the event channel lets the printer drain and exit
    drop(builder);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let artifact = result?;

    let digest = match &args.output {
        Some(dir) => Some(artifact.write_oci_layout(Path::new(dir))?),
        None => None,
    };

    if args.quiet {
        println!("{}", digest.as_deref().unwrap_or(&artifact.build_id));
        return Ok(());
    }

    print_summary(&artifact);
    if let (Some(dir), Some(digest)) = (&args.output, &digest) {
        println!("Wrote OCI layout to {} ({})", dir, digest);
    }
    Ok(())
}

/// Apply command-line overrides on top of the loaded config.
fn effective_config(mut config: BuilderConfig, args: &BuildArgs) -> BuilderConfig {
    if args.run_install || args.chroot {
        config.install.execute = true;
    }
    if args.chroot {
        config.install.chroot = true;
    }
    if let Some(secs) = args.timeout {
        config.install.timeout_secs = Some(secs);
    }
    config
}

fn spawn_step_printer(builder: &Builder, total: usize) -> tokio::task::JoinHandle<()> {
    let mut rx = builder.events().subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let message = match &event.payload {
                EventPayload::String(s) => s.as_str(),
                _ => "",
            };
            match event.key.as_str() {
                events::DIRECTIVE_APPLYING => {
                    println!("Step {}/{}: {}", event.position.unwrap_or(0), total, message)
                }
                events::INSTALL_DEFERRED => println!("  install deferred (use --run-install to execute)"),
                events::BUILD_FAILED | events::BUILD_CANCELLED => {
                    println!("  failed: {}", message)
                }
                _ => {}
            }
        }
    })
}

fn print_summary(artifact: &ImageArtifact) {
    println!(
        "Successfully built on {} ({} layers, {})",
        artifact.base_image,
        artifact.layers.len(),
        output::format_bytes(artifact.size())
    );
    if artifact.layers.is_empty() {
        return;
    }
    let mut table = output::new_table(&["STEP", "DIGEST", "SIZE", "CREATED BY"]);
    for layer in &artifact.layers {
        table.add_row(vec![
            layer.position.to_string(),
            output::short_digest(&layer.digest).to_string(),
            output::format_bytes(layer.size),
            output::truncate(&layer.created_by, 60),
        ]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: BuildArgs,
    }

    fn parse(argv: &[&str]) -> BuildArgs {
        let mut full = vec!["build"];
        full.extend_from_slice(argv);
        Wrapper::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.path, ".");
        assert!(args.file.is_none());
        assert!(!args.run_install);
        let config = effective_config(BuilderConfig::default(), &args);
        assert!(!config.install.execute);
    }

    #[test]
    fn test_run_install_enables_execution() {
        let args = parse(&["--run-install", "--timeout", "30", "ctx"]);
        let config = effective_config(BuilderConfig::default(), &args);
        assert!(config.install.execute);
        assert!(!config.install.chroot);
        assert_eq!(config.install.timeout_secs, Some(30));
        assert_eq!(args.path, "ctx");
    }

    #[test]
    fn test_chroot_implies_execution() {
        let args = parse(&["--chroot"]);
        let config = effective_config(BuilderConfig::default(), &args);
        assert!(config.install.execute);
        assert!(config.install.chroot);
    }

    #[test]
    fn test_repeated_set_values() {
        let args = parse(&["--set", "env=prod", "--set", "URL=http://example.com?a=1"]);
        let vars = parse_pairs(&args.set).unwrap();
        assert_eq!(vars.get("env").map(String::as_str), Some("prod"));
        assert_eq!(vars.get("URL").map(String::as_str), Some("http://example.com?a=1"));
    }

    #[tokio::test]
    async fn test_execute_writes_oci_layout() {
        let ctx = tempfile::TempDir::new().unwrap();
        let out = tempfile::TempDir::new().unwrap();
        std::fs::write(ctx.path().join("app.py"), "print('hi')\n").unwrap();
        std::fs::write(
            ctx.path().join("Boxfile"),
            "FROM python:3.11-slim\nWORKDIR /app\nCOPY app.py .\nENV MODE=CHANGEME_mode\nCMD [\"python\", \"app.py\"]\n",
        )
        .unwrap();

        let args = parse(&[
            "-q",
            "--set",
            "mode=prod",
            "-o",
            &out.path().display().to_string(),
            &ctx.path().display().to_string(),
        ]);
        execute(args, BuilderConfig::default()).await.unwrap();
        assert!(out.path().join("index.json").exists());
        assert!(out.path().join("oci-layout").exists());
    }
}
