//! Placeholder detection and template fill.
//!
//! Manifests are authored as templates: values the operator must still
//! supply carry a sentinel such as `CHANGEME_env` or `{{ package }}`.
//! Validation rejects any remaining sentinel; [`fill`] resolves them
//! from `KEY=VALUE` variables.

use std::collections::BTreeMap;

use boxfile_core::config::PlaceholderConfig;
use boxfile_core::error::{BuildError, Result};

/// Prefix of word-style placeholders (`CHANGEME_<name>`).
const CHANGEME_PREFIX: &str = "CHANGEME_";

/// Template variables used by [`fill`].
pub type Vars = BTreeMap<String, String>;

/// Sentinel tokens marking unresolved values.
#[derive(Debug, Clone)]
pub struct PlaceholderPolicy {
    sentinels: Vec<String>,
}

impl PlaceholderPolicy {
    pub fn new(sentinels: Vec<String>) -> Self {
        Self {
            sentinels: sentinels.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn sentinels(&self) -> &[String] {
        &self.sentinels
    }

    /// Return the first unresolved placeholder token in `text`.
    pub fn find(&self, text: &str) -> Option<String> {
        self.sentinels
            .iter()
            .filter_map(|sentinel| text.find(sentinel.as_str()).map(|pos| (pos, sentinel)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(pos, sentinel)| token_at(text, pos, sentinel))
    }
}

impl Default for PlaceholderPolicy {
    fn default() -> Self {
        Self::from(&PlaceholderConfig::default())
    }
}

impl From<&PlaceholderConfig> for PlaceholderPolicy {
    fn from(config: &PlaceholderConfig) -> Self {
        Self::new(config.sentinels.clone())
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Expand a sentinel match at `pos` into the full token for reporting.
fn token_at(text: &str, pos: usize, sentinel: &str) -> String {
    if sentinel.starts_with('{') {
        let end = text[pos..]
            .find("}}")
            .map(|offset| pos + offset + 2)
            .or_else(|| text[pos..].find(char::is_whitespace).map(|offset| pos + offset))
            .unwrap_or(text.len());
        return text[pos..end].to_string();
    }

    let start = text[..pos]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_token_char(*c))
        .last()
        .map_or(pos, |(i, _)| i);
    let end = text[pos..]
        .char_indices()
        .find(|(_, c)| !is_token_char(*c))
        .map_or(text.len(), |(i, _)| pos + i);
    text[start..end].to_string()
}

/// Look a template name up, falling back to its last dotted segment
/// (`cookiecutter.package` → `package`).
fn lookup<'a>(vars: &'a Vars, name: &str) -> Option<&'a String> {
    vars.get(name).or_else(|| {
        name.rsplit_once('.')
            .and_then(|(_, last)| vars.get(last))
    })
}

/// Replace `{{ name }}` and `CHANGEME_name` tokens with values from `vars`.
///
/// Names without a value are left untouched so validation still reports
/// them. An unterminated `{{` is an error.
pub fn fill(text: &str, vars: &Vars) -> Result<String> {
    let braced = fill_braced(text, vars)?;
    Ok(fill_changeme(&braced, vars))
}

fn fill_braced(text: &str, vars: &Vars) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| {
            BuildError::Template(format!(
                "unterminated '{{{{' near '{}'",
                truncate(&rest[open..], 32)
            ))
        })?;
        let name = after_open[..close].trim();
        let token = &rest[open..open + 2 + close + 2];
        match lookup(vars, name) {
            Some(value) if name.chars().all(is_token_char) => out.push_str(value),
            _ => out.push_str(token),
        }
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn fill_changeme(text: &str, vars: &Vars) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(CHANGEME_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + CHANGEME_PREFIX.len()..];
        let name_len = after
            .char_indices()
            .find(|(_, c)| !is_token_char(*c))
            .map_or(after.len(), |(i, _)| i);
        let name = &after[..name_len];
        match vars.get(name) {
            Some(value) if !name.is_empty() => out.push_str(value),
            _ => out.push_str(&rest[start..start + CHANGEME_PREFIX.len() + name_len]),
        }
        rest = &after[name_len..];
    }
    out.push_str(rest);
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Parse `KEY=VALUE` pairs into template variables.
pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Vars> {
    let mut vars = Vars::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| BuildError::Template(format!("Invalid pair: {}", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(BuildError::Template(format!("Invalid pair: {}", pair)));
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Parse an env file: `KEY=VALUE` lines, `#` comments, optional
/// `export ` prefix, surrounding quotes stripped.
pub fn parse_env_file(content: &str) -> Result<Vars> {
    let mut vars = Vars::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            BuildError::Template(format!(
                "env file line {}: expected KEY=VALUE, got '{}'",
                idx + 1,
                trimmed
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(BuildError::Template(format!(
                "env file line {}: empty key",
                idx + 1
            )));
        }
        vars.insert(key.to_string(), unquote(value.trim()));
    }
    Ok(vars)
}

fn unquote(s: &str) -> String {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
