//! `boxfile validate` command.

use std::path::Path;

use boxfile_core::{BuilderConfig, ValidationReport};
use boxfile_runtime::{Manifest, PlaceholderPolicy};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ValidateArgs {
    /// Directory containing the manifest
    #[arg(default_value = ".")]
    pub path: String,

    /// Path to the manifest (default: <PATH>/Boxfile, then <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Print the validation report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ValidateArgs, config: &BuilderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manifest_path = super::locate_manifest(Path::new(&args.path), args.file.as_deref())?;
    let manifest = Manifest::from_file(&manifest_path)?;
    let policy = PlaceholderPolicy::from(&config.placeholder);
    let report = manifest.validate(&policy);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_valid() {
        println!(
            "{} is valid ({} directives)",
            manifest_path.display(),
            manifest.len()
        );
    } else {
        println!("{}", report_table(&report));
    }

    if !report.is_valid() {
        return Err(format!(
            "{} violation(s) in {}",
            report.violations().len(),
            manifest_path.display()
        )
        .into());
    }
    Ok(())
}

fn report_table(report: &ValidationReport) -> comfy_table::Table {
    let mut table = output::new_table(&["STEP", "RULE", "CLASS", "DETAIL"]);
    for violation in report.violations() {
        let step = violation
            .position
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let class = match violation.class() {
            boxfile_core::ViolationClass::Structural => "structural",
            boxfile_core::ViolationClass::UnresolvedPlaceholder => "placeholder",
        };
        table.add_row(vec![
            step,
            violation.rule.code().to_string(),
            class.to_string(),
            violation.detail.clone(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxfile_core::{Rule, Violation};

    #[test]
    fn test_report_table_rows() {
        let report = ValidationReport::new(vec![
            Violation::new(None, Rule::EmptyManifest, "manifest contains no directives"),
            Violation::new(Some(6), Rule::UnresolvedPlaceholder, "ENV value contains 'CHANGEME_env'"),
        ]);
        let rendered = report_table(&report).to_string();
        assert!(rendered.contains("empty-manifest"));
        assert!(rendered.contains("placeholder"));
        assert!(rendered.contains("CHANGEME_env"));
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_manifest() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Boxfile"), "FROM alpine\nENV A=CHANGEME\n").unwrap();
        let args = ValidateArgs {
            path: tmp.path().display().to_string(),
            file: None,
            json: true,
        };
        let err = execute(args, &BuilderConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("violation(s)"));
    }

    #[tokio::test]
    async fn test_execute_accepts_valid_manifest() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Boxfile"), "FROM alpine\nCMD [\"true\"]\n").unwrap();
        let args = ValidateArgs {
            path: tmp.path().display().to_string(),
            file: None,
            json: false,
        };
        assert!(execute(args, &BuilderConfig::default()).await.is_ok());
    }
}
