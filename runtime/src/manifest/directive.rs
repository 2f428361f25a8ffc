//! Directive model.
//!
//! A directive is one manifest step: a kind with its parameters, the
//! position it occupies in the ordered sequence, and the source line it
//! was parsed from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single manifest directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// 1-based position in the manifest
    pub position: usize,
    /// Source line (0 when built programmatically)
    pub line: usize,
    /// What the directive does
    pub kind: DirectiveKind,
}

impl Directive {
    pub fn new(position: usize, kind: DirectiveKind) -> Self {
        Self {
            position,
            line: 0,
            kind,
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

/// Directive kinds and their parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DirectiveKind {
    /// `FROM <image>`
    SelectBase { image: String },
    /// `WORKDIR <path>`
    SetWorkdir { path: String },
    /// `COPY <src>... <dst>`
    CopyFiles {
        sources: Vec<String>,
        destination: String,
    },
    /// `RUN [--requires=<file>] <command>`
    InstallDependencies {
        command: String,
        requires: Option<String>,
    },
    /// `ENV <key>=<value>`
    SetEnv { key: String, value: String },
    /// `EXPOSE <port>[/<proto>]...`
    ExposePort { ports: Vec<String> },
    /// `CMD ["exec", "form"]`
    SetCommand { argv: Vec<String> },
}

impl DirectiveKind {
    /// Manifest keyword for this kind.
    pub fn keyword(&self) -> &'static str {
        match self {
            DirectiveKind::SelectBase { .. } => "FROM",
            DirectiveKind::SetWorkdir { .. } => "WORKDIR",
            DirectiveKind::CopyFiles { .. } => "COPY",
            DirectiveKind::InstallDependencies { .. } => "RUN",
            DirectiveKind::SetEnv { .. } => "ENV",
            DirectiveKind::ExposePort { .. } => "EXPOSE",
            DirectiveKind::SetCommand { .. } => "CMD",
        }
    }

    /// Kind name as used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::SelectBase { .. } => "SelectBase",
            DirectiveKind::SetWorkdir { .. } => "SetWorkdir",
            DirectiveKind::CopyFiles { .. } => "CopyFiles",
            DirectiveKind::InstallDependencies { .. } => "InstallDependencies",
            DirectiveKind::SetEnv { .. } => "SetEnv",
            DirectiveKind::ExposePort { .. } => "ExposePort",
            DirectiveKind::SetCommand { .. } => "SetCommand",
        }
    }

    /// Every parameter value with its name, in declaration order.
    pub fn parameters(&self) -> Vec<(&'static str, &str)> {
        match self {
            DirectiveKind::SelectBase { image } => vec![("image", image.as_str())],
            DirectiveKind::SetWorkdir { path } => vec![("path", path.as_str())],
            DirectiveKind::CopyFiles {
                sources,
                destination,
            } => {
                let mut params: Vec<(&'static str, &str)> =
                    sources.iter().map(|s| ("source", s.as_str())).collect();
                params.push(("destination", destination.as_str()));
                params
            }
            DirectiveKind::InstallDependencies { command, requires } => {
                let mut params = vec![("command", command.as_str())];
                if let Some(r) = requires {
                    params.push(("requires", r.as_str()));
                }
                params
            }
            DirectiveKind::SetEnv { key, value } => {
                vec![("key", key.as_str()), ("value", value.as_str())]
            }
            DirectiveKind::ExposePort { ports } => {
                ports.iter().map(|p| ("port", p.as_str())).collect()
            }
            DirectiveKind::SetCommand { argv } => {
                argv.iter().map(|a| ("argument", a.as_str())).collect()
            }
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::SelectBase { image } => write!(f, "FROM {}", image),
            DirectiveKind::SetWorkdir { path } => write!(f, "WORKDIR {}", path),
            DirectiveKind::CopyFiles {
                sources,
                destination,
            } => write!(f, "COPY {} {}", sources.join(" "), destination),
            DirectiveKind::InstallDependencies { command, requires } => match requires {
                Some(r) => write!(f, "RUN --requires={} {}", r, command),
                None => write!(f, "RUN {}", command),
            },
            DirectiveKind::SetEnv { key, value } => write!(f, "ENV {}={}", key, value),
            DirectiveKind::ExposePort { ports } => write!(f, "EXPOSE {}", ports.join(" ")),
            DirectiveKind::SetCommand { argv } => {
                let json = serde_json::to_string(argv).map_err(|_| fmt::Error)?;
                write!(f, "CMD {}", json)
            }
        }
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A parsed `EXPOSE` port spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ExposedPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }
}

impl FromStr for ExposedPort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (port, protocol) = match s.split_once('/') {
            Some((port, proto)) => {
                let protocol = match proto.to_ascii_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    other => return Err(format!("unknown protocol '{}' in '{}'", other, s)),
                };
                (port, protocol)
            }
            None => (s, Protocol::Tcp),
        };
        let port: u16 = port
            .parse()
            .map_err(|_| format!("'{}' is not a port number", s))?;
        if port == 0 {
            return Err(format!("port 0 cannot be exposed ('{}')", s));
        }
        Ok(Self { port, protocol })
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Tcp => write!(f, "{}/tcp", self.port),
            Protocol::Udp => write!(f, "{}/udp", self.port),
        }
    }
}
