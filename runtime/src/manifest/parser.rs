//! Manifest parser.
//!
//! Parses Boxfile/Dockerfile text into directives. Supports line
//! continuations (`\`), comments, and both shell and JSON (exec) forms
//! for CMD. Positions are assigned in order of appearance.

use boxfile_core::error::{BuildError, Result};

use super::directive::{Directive, DirectiveKind};

/// Parse manifest text into positioned directives.
pub(crate) fn parse_directives(content: &str) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();

    for (line_num, line) in join_continuation_lines(content) {
        let trimmed = line.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let kind = parse_instruction(trimmed, line_num)?;
        let position = directives.len() + 1;
        directives.push(Directive::new(position, kind).with_line(line_num));
    }

    Ok(directives)
}

/// Join lines ending with `\` into single logical lines, keeping the
/// number of the physical line each logical line starts on.
fn join_continuation_lines(content: &str) -> Vec<(usize, String)> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();
    let mut start_line = 0;

    for (idx, line) in content.lines().enumerate() {
        if current.is_empty() {
            start_line = idx + 1;
        }
        // Comment lines inside a continuation are dropped
        if !current.is_empty() && line.trim_start().starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push((start_line, std::mem::take(&mut current)));
        }
    }

    // Handle trailing continuation without final line
    if !current.is_empty() {
        logical_lines.push((start_line, current));
    }

    logical_lines
}

/// Parse a single logical line.
///
/// Only the seven build directives are accepted. Other Dockerfile
/// instructions are rejected rather than skipped so that nothing the
/// author wrote is silently lost.
fn parse_instruction(line: &str, line_num: usize) -> Result<DirectiveKind> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    let kind = match keyword_upper.as_str() {
        "FROM" | "SELECTBASE" => parse_from(rest, line_num)?,
        "WORKDIR" | "SETWORKDIR" => parse_workdir(rest, line_num)?,
        "COPY" | "COPYFILES" => parse_copy(rest, line_num)?,
        "RUN" | "INSTALLDEPENDENCIES" => parse_run(rest, line_num)?,
        "ENV" | "SETENV" => parse_env(rest, line_num)?,
        "EXPOSE" | "EXPOSEPORT" => parse_expose(rest, line_num)?,
        "CMD" | "SETCOMMAND" => parse_cmd(rest, line_num)?,
        "ADD" => {
            return Err(parse_error(
                line_num,
                "ADD is not supported, use COPY to stage files from the build context",
            ))
        }
        "ENTRYPOINT" => {
            return Err(parse_error(
                line_num,
                "ENTRYPOINT is not supported, declare the full launch command with CMD",
            ))
        }
        "LABEL" | "USER" | "ARG" | "VOLUME" | "SHELL" | "STOPSIGNAL" | "HEALTHCHECK"
        | "ONBUILD" | "MAINTAINER" => {
            return Err(parse_error(
                line_num,
                format!("Instruction '{}' is not supported", keyword_upper),
            ))
        }
        _ => {
            return Err(parse_error(
                line_num,
                format!("Unknown instruction '{}'", keyword),
            ))
        }
    };

    Ok(kind)
}

fn parse_error(line: usize, message: impl Into<String>) -> BuildError {
    BuildError::Parse {
        line,
        message: message.into(),
    }
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "FROM requires an image argument"));
    }

    // `FROM image AS alias`: the alias has no meaning in a single-stage build
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() > 1 && !(parts.len() == 3 && parts[1].eq_ignore_ascii_case("AS")) {
        return Err(parse_error(
            line_num,
            format!("FROM takes a single image reference, got '{}'", rest),
        ));
    }

    Ok(DirectiveKind::SelectBase {
        image: parts[0].to_string(),
    })
}

fn parse_workdir(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "WORKDIR requires a path"));
    }
    Ok(DirectiveKind::SetWorkdir {
        path: unquote(rest),
    })
}

fn parse_copy(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "COPY requires source and destination"));
    }

    if rest.starts_with("--") {
        let (flag, _) = split_first_word(rest);
        return Err(parse_error(
            line_num,
            format!("COPY flag '{}' is not supported", flag),
        ));
    }

    let parts: Vec<String> = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        rest.split_whitespace().map(str::to_string).collect()
    };
    let Some((destination, sources)) = parts.split_last() else {
        return Err(parse_error(line_num, "COPY requires source and destination"));
    };
    if sources.is_empty() {
        return Err(parse_error(
            line_num,
            "COPY requires at least one source and a destination",
        ));
    }

    Ok(DirectiveKind::CopyFiles {
        sources: sources.to_vec(),
        destination: destination.clone(),
    })
}

fn parse_run(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "RUN requires a command"));
    }

    // Optional --requires=<file> naming the dependency manifest explicitly
    let (requires, remaining) = match rest.strip_prefix("--requires=") {
        Some(after) => {
            let (file, command) = split_first_word(after);
            if file.is_empty() {
                return Err(parse_error(line_num, "RUN --requires needs a file path"));
            }
            (Some(unquote(file)), command)
        }
        None => (None, rest),
    };

    if remaining.is_empty() {
        return Err(parse_error(line_num, "RUN requires a command"));
    }

    // JSON array form: quote each argument so it survives the shell
    let command = if remaining.starts_with('[') {
        shell_words::join(parse_json_array(remaining, line_num)?)
    } else {
        remaining.to_string()
    };

    Ok(DirectiveKind::InstallDependencies { command, requires })
}

fn parse_env(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "ENV requires a key and value"));
    }

    // Two forms:
    // ENV KEY=VALUE  (or KEY="VALUE")
    // ENV KEY VALUE
    let (first, _) = split_first_word(rest);
    if first.contains('=') {
        return parse_env_assignment(rest, line_num);
    }

    // Legacy form: ENV KEY VALUE
    let (key, value) = split_first_word(rest);
    if value.is_empty() {
        return Err(parse_error(
            line_num,
            format!("ENV {} requires a value", key),
        ));
    }
    Ok(DirectiveKind::SetEnv {
        key: key.to_string(),
        value: unquote(value),
    })
}

/// `KEY=VALUE` form. One variable per directive: a further `NAME=` word
/// would otherwise end up inside the first value.
fn parse_env_assignment(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    let words = shell_words::split(rest)
        .map_err(|e| parse_error(line_num, format!("ENV {}: {}", rest, e)))?;
    if let Some(extra) = words.iter().skip(1).find(|w| is_assignment(w)) {
        return Err(parse_error(
            line_num,
            format!(
                "ENV sets one variable per line, put '{}' on its own ENV line",
                extra
            ),
        ));
    }

    let Some((key, value)) = rest.split_once('=') else {
        return Err(parse_error(line_num, "ENV requires a key and value"));
    };
    if key.is_empty() {
        return Err(parse_error(line_num, "ENV key must not be empty"));
    }
    Ok(DirectiveKind::SetEnv {
        key: key.to_string(),
        value: unquote(value),
    })
}

/// `NAME=...` with a shell variable name.
fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn parse_expose(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "EXPOSE requires a port"));
    }
    // Port syntax is checked by validation so placeholders can be reported
    Ok(DirectiveKind::ExposePort {
        ports: rest.split_whitespace().map(str::to_string).collect(),
    })
}

fn parse_cmd(rest: &str, line_num: usize) -> Result<DirectiveKind> {
    if rest.is_empty() {
        return Err(parse_error(line_num, "CMD requires an argument"));
    }

    let argv = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        // Shell form: wrap in sh -c
        vec!["/bin/sh".to_string(), "-c".to_string(), rest.to_string()]
    };

    if argv.is_empty() {
        return Err(parse_error(line_num, "CMD exec form must not be empty"));
    }

    Ok(DirectiveKind::SetCommand { argv })
}

// --- Helpers ---

/// Parse a JSON array string like `["a", "b", "c"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    serde_json::from_str(s)
        .map_err(|e| parse_error(line_num, format!("Invalid JSON array '{}': {}", s, e)))
}

/// Remove surrounding quotes from a string.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
