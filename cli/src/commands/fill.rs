//! `boxfile fill` command - Resolve placeholder tokens in a template.

use std::path::Path;

use boxfile_core::BuilderConfig;
use boxfile_runtime::{fill, parse_env_file, parse_pairs, PlaceholderPolicy, Vars};
use clap::Args;

#[derive(Args)]
pub struct FillArgs {
    /// Directory containing the manifest template
    #[arg(default_value = ".")]
    pub path: String,

    /// Path to the template (default: <PATH>/Boxfile, then <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Placeholder value (KEY=VALUE), can be repeated
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Read placeholder values from an env file
    #[arg(long = "env-file")]
    pub env_file: Option<String>,

    /// Write the filled manifest here instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,
}

pub async fn execute(args: FillArgs, config: &BuilderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let template_path = super::locate_manifest(Path::new(&args.path), args.file.as_deref())?;
    let template = std::fs::read_to_string(&template_path)
        .map_err(|e| format!("Failed to read {}: {}", template_path.display(), e))?;

    let vars = collect_vars(args.env_file.as_deref(), &args.set)?;
    let filled = fill(&template, &vars)?;

    let policy = PlaceholderPolicy::from(&config.placeholder);
    if let Some(token) = policy.find(&filled) {
        tracing::warn!(token = %token, "Placeholder left unresolved");
        eprintln!("Warning: unresolved placeholder '{}' remains", token);
    }

    match &args.output {
        Some(out) => {
            std::fs::write(out, &filled).map_err(|e| format!("Failed to write {}: {}", out, e))?;
            eprintln!("Wrote {}", out);
        }
        None => print!("{filled}"),
    }
    Ok(())
}

/// Env file values first, `--set` pairs override them.
fn collect_vars(env_file: Option<&str>, pairs: &[String]) -> Result<Vars, Box<dyn std::error::Error>> {
    let mut vars = match env_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read env file {}: {}", path, e))?;
            parse_env_file(&content)?
        }
        None => Vars::new(),
    };
    vars.extend(parse_pairs(pairs)?);
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_overrides_env_file() {
        let tmp = TempDir::new().unwrap();
        let env_path = tmp.path().join("values.env");
        std::fs::write(&env_path, "# defaults\nenv=dev\nexport package=\"myapp\"\n").unwrap();

        let vars = collect_vars(
            Some(env_path.to_str().unwrap()),
            &["env=prod".to_string()],
        )
        .unwrap();
        assert_eq!(vars.get("env").map(String::as_str), Some("prod"));
        assert_eq!(vars.get("package").map(String::as_str), Some("myapp"));
    }

    #[test]
    fn test_bad_pair_is_error() {
        assert!(collect_vars(None, &["novalue".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_execute_writes_output() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("Boxfile"),
            "FROM python:3.11-slim\nENV APP_ENV=CHANGEME_env\nCMD [\"python\", \"-m\", \"{{ cookiecutter.package }}\"]\n",
        )
        .unwrap();
        let out = tmp.path().join("Boxfile.filled");

        let args = FillArgs {
            path: tmp.path().display().to_string(),
            file: None,
            set: vec!["env=prod".to_string(), "package=myapp".to_string()],
            env_file: None,
            output: Some(out.display().to_string()),
        };
        execute(args, &BuilderConfig::default()).await.unwrap();

        let filled = std::fs::read_to_string(out).unwrap();
        assert!(filled.contains("ENV APP_ENV=prod"));
        assert!(filled.contains("\"myapp\""));
    }
}
