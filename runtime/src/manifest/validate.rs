//! Manifest validation.
//!
//! Pure checks over the directive sequence. Every violation is collected
//! rather than stopping at the first one.

use boxfile_core::validation::{Rule, ValidationReport, Violation};

use super::directive::{Directive, DirectiveKind, ExposedPort};
use crate::build::context::normalize_source;
use crate::placeholder::PlaceholderPolicy;

/// Validate an ordered directive sequence.
pub(crate) fn validate(directives: &[Directive], policy: &PlaceholderPolicy) -> ValidationReport {
    let mut report = ValidationReport::default();

    if directives.is_empty() {
        report.push(Violation::new(
            None,
            Rule::EmptyManifest,
            "manifest contains no directives",
        ));
        return report;
    }

    check_positions(directives, &mut report);
    check_base(directives, &mut report);
    check_command(directives, &mut report);

    for directive in directives {
        check_placeholders(directive, policy, &mut report);
        match &directive.kind {
            DirectiveKind::CopyFiles { sources, .. } => check_sources(directive, sources, &mut report),
            DirectiveKind::ExposePort { ports } => check_ports(directive, ports, policy, &mut report),
            _ => {}
        }
    }

    report.sorted()
}

fn check_positions(directives: &[Directive], report: &mut ValidationReport) {
    for (idx, directive) in directives.iter().enumerate() {
        let expected = idx + 1;
        if directive.position != expected {
            report.push(Violation::new(
                Some(directive.position),
                Rule::PositionOutOfOrder,
                format!(
                    "{} declares position {} but is directive {} of the sequence",
                    directive.kind.keyword(),
                    directive.position,
                    expected
                ),
            ));
        }
    }
}

fn check_base(directives: &[Directive], report: &mut ValidationReport) {
    let bases: Vec<&Directive> = directives
        .iter()
        .filter(|d| matches!(d.kind, DirectiveKind::SelectBase { .. }))
        .collect();

    match bases.as_slice() {
        [] => report.push(Violation::new(
            Some(directives[0].position),
            Rule::MissingBase,
            format!(
                "manifest has no FROM; first directive is {}",
                directives[0].kind.keyword()
            ),
        )),
        [first, rest @ ..] => {
            if !std::ptr::eq(*first, &directives[0]) {
                report.push(Violation::new(
                    Some(first.position),
                    Rule::BaseNotFirst,
                    format!(
                        "FROM must be the first directive, found after {}",
                        directives[0].kind.keyword()
                    ),
                ));
            }
            for extra in rest {
                report.push(Violation::new(
                    Some(extra.position),
                    Rule::DuplicateBase,
                    "manifest declares more than one FROM",
                ));
            }
        }
    }
}

fn check_command(directives: &[Directive], report: &mut ValidationReport) {
    let last = &directives[directives.len() - 1];
    let commands: Vec<&Directive> = directives
        .iter()
        .filter(|d| matches!(d.kind, DirectiveKind::SetCommand { .. }))
        .collect();

    match commands.as_slice() {
        [] => report.push(Violation::new(
            Some(last.position),
            Rule::MissingCommand,
            format!(
                "manifest has no CMD; last directive is {}",
                last.kind.keyword()
            ),
        )),
        [.., final_cmd] => {
            for extra in &commands[..commands.len() - 1] {
                report.push(Violation::new(
                    Some(extra.position),
                    Rule::DuplicateCommand,
                    "manifest declares more than one CMD",
                ));
            }
            if !std::ptr::eq(*final_cmd, last) {
                report.push(Violation::new(
                    Some(last.position),
                    Rule::CommandNotLast,
                    format!("CMD must be the last directive, found {} after it", last.kind.keyword()),
                ));
            }
        }
    }
}

fn check_placeholders(directive: &Directive, policy: &PlaceholderPolicy, report: &mut ValidationReport) {
    for (name, value) in directive.kind.parameters() {
        if let Some(token) = policy.find(value) {
            report.push(Violation::new(
                Some(directive.position),
                Rule::UnresolvedPlaceholder,
                format!(
                    "{} {} contains unresolved placeholder '{}'",
                    directive.kind.keyword(),
                    name,
                    token
                ),
            ));
        }
    }
}

fn check_sources(directive: &Directive, sources: &[String], report: &mut ValidationReport) {
    for source in sources {
        if normalize_source(source).is_none() {
            report.push(Violation::new(
                Some(directive.position),
                Rule::SourceEscapesContext,
                format!("COPY source '{}' is outside the build context", source),
            ));
        }
    }
}

fn check_ports(
    directive: &Directive,
    ports: &[String],
    policy: &PlaceholderPolicy,
    report: &mut ValidationReport,
) {
    for spec in ports {
        // Placeholders are already reported
        if policy.find(spec).is_some() {
            continue;
        }
        if let Err(reason) = spec.parse::<ExposedPort>() {
            report.push(Violation::new(
                Some(directive.position),
                Rule::InvalidPort,
                format!("EXPOSE {}", reason),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxfile_core::validation::ViolationClass;

    fn sequence(kinds: Vec<DirectiveKind>) -> Vec<Directive> {
        kinds
            .into_iter()
            .enumerate()
            .map(|(i, kind)| Directive::new(i + 1, kind))
            .collect()
    }

    fn from(image: &str) -> DirectiveKind {
        DirectiveKind::SelectBase {
            image: image.to_string(),
        }
    }

    fn cmd(argv: &[&str]) -> DirectiveKind {
        DirectiveKind::SetCommand {
            argv: argv.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn env(key: &str, value: &str) -> DirectiveKind {
        DirectiveKind::SetEnv {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn rules(report: &ValidationReport) -> Vec<(Option<usize>, Rule)> {
        report.violations().iter().map(|v| (v.position, v.rule)).collect()
    }

    #[test]
    fn test_minimal_valid() {
        let directives = sequence(vec![from("alpine"), cmd(&["true"])]);
        assert!(validate(&directives, &PlaceholderPolicy::default()).is_valid());
    }

    #[test]
    fn test_empty_manifest() {
        let report = validate(&[], &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(None, Rule::EmptyManifest)]);
    }

    #[test]
    fn test_missing_base() {
        let directives = sequence(vec![env("A", "1"), cmd(&["true"])]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(1), Rule::MissingBase)]);
        assert!(report.has_class(ViolationClass::Structural));
    }

    #[test]
    fn test_base_not_first() {
        let directives = sequence(vec![env("A", "1"), from("alpine"), cmd(&["true"])]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(2), Rule::BaseNotFirst)]);
    }

    #[test]
    fn test_duplicate_base() {
        let directives = sequence(vec![from("alpine"), from("debian"), cmd(&["true"])]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(2), Rule::DuplicateBase)]);
    }

    #[test]
    fn test_missing_command() {
        let directives = sequence(vec![from("alpine"), env("A", "1")]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(2), Rule::MissingCommand)]);
    }

    #[test]
    fn test_command_not_last() {
        let directives = sequence(vec![
            from("alpine"),
            cmd(&["true"]),
            DirectiveKind::ExposePort {
                ports: vec!["8000".to_string()],
            },
        ]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(3), Rule::CommandNotLast)]);
    }

    #[test]
    fn test_duplicate_command() {
        let directives = sequence(vec![from("alpine"), cmd(&["a"]), cmd(&["b"])]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(2), Rule::DuplicateCommand)]);
    }

    #[test]
    fn test_single_directive_reports_both_anchors() {
        let directives = sequence(vec![from("alpine")]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(rules(&report), vec![(Some(1), Rule::MissingCommand)]);
    }

    #[test]
    fn test_position_out_of_order() {
        let directives = vec![
            Directive::new(1, from("alpine")),
            Directive::new(3, env("A", "1")),
            Directive::new(2, cmd(&["true"])),
        ];
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert!(report.has_rule(Rule::PositionOutOfOrder));
        assert_eq!(report.violations().len(), 2);
    }

    #[test]
    fn test_unresolved_placeholder() {
        let directives = sequence(vec![
            from("python:3.11-slim"),
            env("APP_ENV", "CHANGEME_env"),
            cmd(&["python", "-m", "{{ cookiecutter.pkg }}"]),
        ]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(
            rules(&report),
            vec![
                (Some(2), Rule::UnresolvedPlaceholder),
                (Some(3), Rule::UnresolvedPlaceholder),
            ]
        );
        assert!(report.has_class(ViolationClass::UnresolvedPlaceholder));
        assert!(!report.has_class(ViolationClass::Structural));
        assert!(report.violations()[0].detail.contains("CHANGEME_env"));
    }

    #[test]
    fn test_copy_source_escapes() {
        let directives = sequence(vec![
            from("alpine"),
            DirectiveKind::CopyFiles {
                sources: vec!["/etc/passwd".to_string(), "../up".to_string(), "ok/".to_string()],
                destination: "/app/".to_string(),
            },
            cmd(&["true"]),
        ]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(
            rules(&report),
            vec![
                (Some(2), Rule::SourceEscapesContext),
                (Some(2), Rule::SourceEscapesContext),
            ]
        );
    }

    #[test]
    fn test_invalid_port_and_placeholder_port() {
        let directives = sequence(vec![
            from("alpine"),
            DirectiveKind::ExposePort {
                ports: vec!["http".to_string(), "CHANGEME_port".to_string(), "8000".to_string()],
            },
            cmd(&["true"]),
        ]);
        let report = validate(&directives, &PlaceholderPolicy::default());
        assert_eq!(
            rules(&report),
            vec![
                (Some(2), Rule::UnresolvedPlaceholder),
                (Some(2), Rule::InvalidPort),
            ]
        );
    }

    #[test]
    fn test_duplicate_ports_allowed() {
        let directives = sequence(vec![
            from("alpine"),
            DirectiveKind::ExposePort {
                ports: vec!["8000".to_string()],
            },
            DirectiveKind::ExposePort {
                ports: vec!["8000".to_string(), "9000".to_string()],
            },
            cmd(&["true"]),
        ]);
        assert!(validate(&directives, &PlaceholderPolicy::default()).is_valid());
    }
}
