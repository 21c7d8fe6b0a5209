use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::plugin::descriptor::PluginId;

/// A parsed command-line invocation: `Name arg1 "arg two"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Splits a command line into name and arguments. Quotes group words,
    /// backslash escapes the next character. Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = split_words(normalize_command(line)).into_iter();
        let name = words.next()?;
        Some(Self {
            name,
            args: words.collect(),
        })
    }
}

/// Handler for a command or a key binding; returns an optional message for the user.
pub type Handler = Rc<RefCell<dyn FnMut(&Invocation) -> anyhow::Result<Option<String>>>>;

pub fn handler<F>(f: F) -> Handler
where
    F: FnMut(&Invocation) -> anyhow::Result<Option<String>> + 'static,
{
    Rc::new(RefCell::new(f))
}

pub struct CommandEntry {
    pub owner: Option<PluginId>,
    /// `None` while the entry is a placeholder for a plugin that has not loaded yet.
    pub handler: Option<Handler>,
    pub desc: Option<String>,
}

impl CommandEntry {
    pub fn is_placeholder(&self) -> bool {
        self.handler.is_none()
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("owner", &self.owner)
            .field("placeholder", &self.is_placeholder())
            .field("desc", &self.desc)
            .finish()
    }
}

/// User-facing command names and what they run.
#[derive(Debug, Default)]
pub struct CommandTable {
    entries: HashMap<String, CommandEntry>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a stub whose first invocation loads `owner`.
    pub fn placeholder(&mut self, name: impl Into<String>, owner: PluginId) {
        self.entries.insert(
            name.into(),
            CommandEntry {
                owner: Some(owner),
                handler: None,
                desc: None,
            },
        );
    }

    /// Defines (or redefines) a command. The last definition wins.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        owner: Option<PluginId>,
        handler: Handler,
        desc: Option<String>,
    ) {
        let name = name.into();
        if let Some(previous) = self.entries.get(&name)
            && !previous.is_placeholder()
        {
            tracing::debug!(command = %name, "redefining command");
        }
        self.entries.insert(
            name,
            CommandEntry {
                owner,
                handler: Some(handler),
                desc,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Strips mapping decorations so `:Neotree<CR>` and `<cmd>Neotree<cr>` both read `Neotree`.
pub fn normalize_command(raw: &str) -> &str {
    let mut text = raw.trim();
    for prefix in ["<cmd>", "<Cmd>", "<CMD>", ":"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest;
            break;
        }
    }
    for suffix in ["<cr>", "<CR>", "<Cr>", "<enter>", "<Enter>"] {
        if let Some(rest) = text.strip_suffix(suffix) {
            text = rest;
            break;
        }
    }
    text.trim()
}

fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            in_word = true;
            continue;
        }

        match ch {
            '\\' => {
                escaped = true;
                in_word = true;
            }
            '"' | '\'' if quote == Some(ch) => quote = None,
            '"' | '\'' if quote.is_none() => {
                quote = Some(ch);
                in_word = true;
            }
            c if c.is_whitespace() && quote.is_none() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if escaped {
        current.push('\\');
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_arguments() {
        let inv = Invocation::parse(r#"ObsidianNew "daily note" it\'s 'a b'"#).unwrap();
        assert_eq!(inv.name, "ObsidianNew");
        assert_eq!(inv.args, vec!["daily note", "it's", "a b"]);
    }

    #[test]
    fn blank_lines_have_no_invocation() {
        assert!(Invocation::parse("   ").is_none());
        assert!(Invocation::parse(":<CR>").is_none());
    }

    #[test]
    fn empty_quotes_are_an_argument() {
        let inv = Invocation::parse(r#"Grep """#).unwrap();
        assert_eq!(inv.args, vec![String::new()]);
    }

    #[test]
    fn normalizes_mapping_rhs() {
        assert_eq!(normalize_command(":Neotree toggle<CR>"), "Neotree toggle");
        assert_eq!(normalize_command("<cmd>Git<cr>"), "Git");
        assert_eq!(normalize_command("Telescope"), "Telescope");
    }

    #[test]
    fn define_replaces_placeholder() {
        let mut table = CommandTable::new();
        let owner = PluginId::new("nvim-neo-tree/neo-tree.nvim");
        table.placeholder("Neotree", owner.clone());
        assert!(table.get("Neotree").unwrap().is_placeholder());

        table.define(
            "Neotree",
            Some(owner),
            handler(|_| Ok(None)),
            Some("file tree".into()),
        );
        assert!(!table.get("Neotree").unwrap().is_placeholder());
        assert_eq!(table.names(), vec!["Neotree"]);
    }
}
