//! Argument templates for custom actions.
//!
//! Templates are parsed once, when a definition is registered. Recognised
//! placeholders (`{{SOURCE_DIR}}` and friends) become typed segments;
//! anything else between braces stays literal text.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::run_config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    SourceDir,
    ConfigDir,
    Level,
    StateName,
    CafEnv,
    Workspace,
}

impl Placeholder {
    pub const ALL: [Placeholder; 6] = [
        Placeholder::SourceDir,
        Placeholder::ConfigDir,
        Placeholder::Level,
        Placeholder::StateName,
        Placeholder::CafEnv,
        Placeholder::Workspace,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Placeholder::SourceDir => "SOURCE_DIR",
            Placeholder::ConfigDir => "CONFIG_DIR",
            Placeholder::Level => "LEVEL",
            Placeholder::StateName => "STATE_NAME",
            Placeholder::CafEnv => "CAF_ENV",
            Placeholder::Workspace => "WORKSPACE",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.token() == token)
    }

    fn resolve(self, run: &RunConfig) -> String {
        match self {
            Placeholder::SourceDir => run.source_path.display().to_string(),
            Placeholder::ConfigDir => run.config_path.display().to_string(),
            Placeholder::Level => run.level.clone(),
            Placeholder::StateName => run.state_name.clone(),
            Placeholder::CafEnv => run.environment_name.clone(),
            Placeholder::Workspace => run.workspace_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// One parsed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    raw: String,
    segments: Vec<Segment>,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Z_]+)\s*\}\}").unwrap())
}

impl ArgTemplate {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder_re().captures_iter(raw) {
            let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(field) = Placeholder::from_token(token.as_str()) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(raw[last..whole.start()].to_string()));
            }
            segments.push(Segment::Field(field));
            last = whole.end();
        }
        if last < raw.len() {
            segments.push(Segment::Literal(raw[last..].to_string()));
        }
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn render(&self, run: &RunConfig) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Field(p) => p.resolve(run),
            })
            .collect()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ArgTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
