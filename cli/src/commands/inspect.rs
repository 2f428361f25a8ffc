//! `boxfile inspect` command - Image metadata as JSON.
//!
//! Builds with installs deferred, so only the manifest and the context
//! are needed, then prints the artifact.

use boxfile_core::BuilderConfig;
use boxfile_runtime::{BuildContext, Builder, Manifest, PlaceholderPolicy};
use clap::Args;

#[derive(Args)]
pub struct InspectArgs {
    /// Build context directory
    #[arg(default_value = ".")]
    pub path: String,

    /// Path to the manifest (default: <PATH>/Boxfile, then <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,
}

pub async fn execute(args: InspectArgs, mut config: BuilderConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.install.execute = false;

    let context = BuildContext::open(&args.path)?;
    let manifest_path = super::locate_manifest(context.root(), args.file.as_deref())?;
    let policy = PlaceholderPolicy::from(&config.placeholder);
    let manifest = Manifest::from_file(&manifest_path)?.into_validated(&policy)?;

    let artifact = Builder::from_config(&config).build(&manifest, &context).await?;

    let json = serde_json::to_string_pretty(&artifact)?;
    println!("{json}");

    Ok(())
}
