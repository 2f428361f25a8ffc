//! Dependency-manifest inference for install commands.
//!
//! An install command usually reads a manifest file (`requirements.txt`,
//! `package.json`, ...) that an earlier COPY must have staged. This
//! module recognises the common package managers and names the file.

/// A file an install command needs. Any one of the alternatives satisfies
/// it; paths are relative to the working directory unless absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub alternatives: Vec<String>,
}

impl Requirement {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            alternatives: vec![path.into()],
        }
    }

    fn any(paths: &[&str]) -> Self {
        Self {
            alternatives: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Path reported when none of the alternatives is staged.
    pub fn primary(&self) -> &str {
        self.alternatives.first().map(String::as_str).unwrap_or_default()
    }
}

const PYTHON_PROJECT: &[&str] = &["pyproject.toml", "setup.py", "setup.cfg"];

/// Infer the dependency manifests an install command reads.
pub fn infer_requirements(command: &str) -> Vec<Requirement> {
    let mut requirements = Vec::new();
    for segment in split_segments(command) {
        let words = words(segment);
        let words = strip_prefixes(&words);
        requirements.extend(segment_requirements(words));
    }
    requirements
}

/// Split on shell control operators.
fn split_segments(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let bytes = command.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let op_len = match bytes[i] {
            b'&' if bytes.get(i + 1) == Some(&b'&') => 2,
            b'|' if bytes.get(i + 1) == Some(&b'|') => 2,
            b'|' | b';' => 1,
            _ => 0,
        };
        if op_len > 0 {
            segments.push(&command[start..i]);
            i += op_len;
            start = i;
        } else {
            i += 1;
        }
    }
    segments.push(&command[start..]);
    segments.retain(|s| !s.trim().is_empty());
    segments
}

/// Shell words of a segment. Unbalanced quotes fall back to plain
/// whitespace splitting.
fn words(segment: &str) -> Vec<String> {
    shell_words::split(segment).unwrap_or_else(|_| {
        segment
            .split_whitespace()
            .map(|w| w.trim_matches(|c| c == '"' || c == '\'').to_string())
            .collect()
    })
}

/// Drop leading `VAR=value` assignments, `sudo`, `env` and the
/// `python -m` launcher.
fn strip_prefixes(words: &[String]) -> &[String] {
    let mut rest = words;
    loop {
        match rest {
            [first, tail @ ..] if first == "sudo" || first == "env" => rest = tail,
            [first, tail @ ..] if is_assignment(first) => rest = tail,
            [python, flag, tail @ ..] if python.starts_with("python") && flag == "-m" => rest = tail,
            _ => return rest,
        }
    }
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with('-')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn segment_requirements(words: &[String]) -> Vec<Requirement> {
    let program = match words.first() {
        Some(p) => p.rsplit('/').next().unwrap_or(p.as_str()),
        None => return Vec::new(),
    };
    let args: Vec<&str> = words[1..].iter().map(String::as_str).collect();
    let sub = args.first().copied().unwrap_or_default();

    match program {
        "pip" | "pip3" => pip_requirements(&args),
        "uv" if sub == "pip" => pip_requirements(&args[1..]),
        "uv" if sub == "sync" => vec![Requirement::new("pyproject.toml")],
        "poetry" | "pdm" if sub == "install" || sub == "sync" => {
            vec![Requirement::new("pyproject.toml")]
        }
        "pipenv" if sub == "install" || sub == "sync" => vec![Requirement::new("Pipfile")],
        "npm" if sub == "ci" => vec![Requirement::new("package.json")],
        "npm" | "pnpm" if (sub == "install" || sub == "i") && positional(&args[1..]).is_empty() => {
            vec![Requirement::new("package.json")]
        }
        "yarn" if sub.is_empty() || sub == "install" || sub.starts_with('-') => {
            vec![Requirement::new("package.json")]
        }
        "cargo" if sub == "build" || sub == "fetch" => vec![Requirement::new("Cargo.toml")],
        "go" if sub == "mod" && args.get(1) == Some(&"download") => vec![Requirement::new("go.mod")],
        "bundle" if sub == "install" => vec![Requirement::new("Gemfile")],
        "composer" if sub == "install" => vec![Requirement::new("composer.json")],
        _ => Vec::new(),
    }
}

fn pip_requirements(args: &[&str]) -> Vec<Requirement> {
    if args.first() != Some(&"install") {
        return Vec::new();
    }

    let mut requirements = Vec::new();
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-r" | "--requirement" => {
                if let Some(file) = iter.next() {
                    requirements.push(Requirement::new(*file));
                }
            }
            "-e" | "--editable" => {
                if let Some(target) = iter.next() {
                    if is_local_project(target) {
                        requirements.push(project_requirement(target));
                    }
                }
            }
            other => {
                if let Some(file) = other.strip_prefix("--requirement=") {
                    requirements.push(Requirement::new(file));
                } else if let Some(file) = other.strip_prefix("-r").filter(|f| !f.is_empty()) {
                    requirements.push(Requirement::new(file));
                } else if !other.starts_with('-') && is_local_project(other) {
                    requirements.push(project_requirement(other));
                }
            }
        }
    }
    requirements
}

fn is_local_project(target: &str) -> bool {
    let path = target.split('[').next().unwrap_or(target);
    path == "." || path == "./" || path.starts_with("./") || path.starts_with("../")
}

fn project_requirement(target: &str) -> Requirement {
    let dir = target
        .split('[')
        .next()
        .unwrap_or(target)
        .trim_end_matches('/');
    if dir == "." {
        return Requirement::any(PYTHON_PROJECT);
    }
    Requirement {
        alternatives: PYTHON_PROJECT
            .iter()
            .map(|file| format!("{}/{}", dir, file))
            .collect(),
    }
}

fn positional<'a>(args: &[&'a str]) -> Vec<&'a str> {
    args.iter().copied().filter(|a| !a.starts_with('-')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primaries(command: &str) -> Vec<String> {
        infer_requirements(command)
            .iter()
            .map(|r| r.primary().to_string())
            .collect()
    }

    #[test]
    fn test_pip_requirements_file() {
        assert_eq!(primaries("pip install -r requirements.txt"), vec!["requirements.txt"]);
        assert_eq!(
            primaries("pip install --no-cache-dir --requirement=reqs/base.txt"),
            vec!["reqs/base.txt"]
        );
        assert_eq!(primaries("pip3 install -rdev.txt"), vec!["dev.txt"]);
        assert_eq!(
            primaries("python3 -m pip install -r a.txt -r b.txt"),
            vec!["a.txt", "b.txt"]
        );
    }

    #[test]
    fn test_pip_local_project() {
        let reqs = infer_requirements("pip install --no-cache-dir .");
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].alternatives, vec!["pyproject.toml", "setup.py", "setup.cfg"]);

        let reqs = infer_requirements("pip install -e ./lib[test]");
        assert_eq!(reqs[0].primary(), "./lib/pyproject.toml");
    }

    #[test]
    fn test_pip_named_packages_need_nothing() {
        assert!(infer_requirements("pip install flask gunicorn").is_empty());
        assert!(infer_requirements("pip freeze").is_empty());
    }

    #[test]
    fn test_other_managers() {
        assert_eq!(primaries("poetry install --no-root"), vec!["pyproject.toml"]);
        assert_eq!(primaries("uv sync --frozen"), vec!["pyproject.toml"]);
        assert_eq!(primaries("uv pip install -r requirements.lock"), vec!["requirements.lock"]);
        assert_eq!(primaries("pipenv install --deploy"), vec!["Pipfile"]);
        assert_eq!(primaries("npm ci"), vec!["package.json"]);
        assert_eq!(primaries("npm install --production"), vec!["package.json"]);
        assert_eq!(primaries("yarn --frozen-lockfile"), vec!["package.json"]);
        assert_eq!(primaries("cargo build --release"), vec!["Cargo.toml"]);
        assert_eq!(primaries("go mod download"), vec!["go.mod"]);
        assert_eq!(primaries("bundle install"), vec!["Gemfile"]);
        assert_eq!(primaries("composer install --no-dev"), vec!["composer.json"]);
    }

    #[test]
    fn test_npm_with_package_names_needs_nothing() {
        assert!(infer_requirements("npm install -g typescript").is_empty());
    }

    #[test]
    fn test_compound_commands() {
        assert_eq!(
            primaries("apt-get update && apt-get install -y gcc && pip install -r req.txt"),
            vec!["req.txt"]
        );
        assert_eq!(
            primaries("PIP_NO_CACHE_DIR=1 pip install . ; npm ci || true"),
            vec!["pyproject.toml", "package.json"]
        );
        assert_eq!(primaries("sudo bundle install | tee log"), vec!["Gemfile"]);
    }

    #[test]
    fn test_quoted_paths_stay_whole() {
        assert_eq!(
            primaries("pip install -r 'deps/base reqs.txt'"),
            vec!["deps/base reqs.txt"]
        );
        assert_eq!(primaries("pip install -r \"unbalanced.txt"), vec!["unbalanced.txt"]);
    }

    #[test]
    fn test_opaque_commands() {
        assert!(infer_requirements("apt-get install -y curl").is_empty());
        assert!(infer_requirements("").is_empty());
        assert!(infer_requirements("make").is_empty());
    }
}
