use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;

/// Editor modes a binding can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Mode {
    /// Normal mode: navigation and commands.
    #[default]
    Normal,
    /// Insert mode: text editing.
    Insert,
    /// Visual mode: selections.
    Visual,
    /// Command line (`:` prefix).
    Command,
    /// Terminal buffers.
    Terminal,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Normal => "NORMAL",
            Mode::Insert => "INSERT",
            Mode::Visual => "VISUAL",
            Mode::Command => "COMMAND",
            Mode::Terminal => "TERMINAL",
        }
    }

    /// Single-letter short name used in configs (`n`, `i`, `v`, `c`, `t`).
    pub fn short(&self) -> char {
        match self {
            Mode::Normal => 'n',
            Mode::Insert => 'i',
            Mode::Visual => 'v',
            Mode::Command => 'c',
            Mode::Terminal => 't',
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" | "normal" => Ok(Mode::Normal),
            "i" | "insert" => Ok(Mode::Insert),
            "v" | "x" | "visual" => Ok(Mode::Visual),
            "c" | "command" => Ok(Mode::Command),
            "t" | "terminal" => Ok(Mode::Terminal),
            _ => Err(Error::UnknownMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}
