use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::plugin::descriptor::{Activation, PluginDescriptor, PluginId};

/// What caused a plugin to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Event(String),
    Command(String),
    Filetype(String),
    Keys(String),
    /// Pulled in by the named dependent.
    Dependency(PluginId),
    /// Explicit load request.
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Event(name) => write!(f, "event {name}"),
            Trigger::Command(name) => write!(f, "command {name}"),
            Trigger::Filetype(ft) => write!(f, "filetype {ft}"),
            Trigger::Keys(keys) => write!(f, "keys {keys}"),
            Trigger::Dependency(of) => write!(f, "dependency of {of}"),
            Trigger::Manual => write!(f, "load"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub plugin: PluginId,
    pub trigger: Trigger,
    /// Logical time the plugin became active.
    pub at: u64,
}

/// Event and filetype subscriptions, in declaration order. Commands and keys
/// are indexed through their placeholders instead.
#[derive(Debug, Default)]
pub struct TriggerIndex {
    events: HashMap<String, Vec<PluginId>>,
    filetypes: HashMap<String, Vec<PluginId>>,
}

impl TriggerIndex {
    pub fn build<'a>(plugins: impl Iterator<Item = &'a PluginDescriptor>) -> Self {
        let mut index = Self::default();
        for plugin in plugins {
            match &plugin.activation {
                Activation::OnEvent(event) => index
                    .events
                    .entry(event.clone())
                    .or_default()
                    .push(plugin.id.clone()),
                Activation::OnFiletype(types) => {
                    for ft in types {
                        index
                            .filetypes
                            .entry(ft.clone())
                            .or_default()
                            .push(plugin.id.clone());
                    }
                }
                _ => {}
            }
        }
        index
    }

    pub fn for_event(&self, event: &str) -> &[PluginId] {
        self.events.get(event).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn for_filetype(&self, filetype: &str) -> &[PluginId] {
        self.filetypes.get(filetype).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Filetype from a file name, using the names editors commonly use.
pub fn detect_filetype(path: &Path) -> Option<&'static str> {
    let file_name = path.file_name()?.to_str()?;
    match file_name {
        "COMMIT_EDITMSG" => return Some("gitcommit"),
        "Makefile" | "makefile" | "GNUmakefile" => return Some("make"),
        "Dockerfile" => return Some("dockerfile"),
        _ => {}
    }

    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let filetype = match extension.as_str() {
        "md" | "markdown" | "mdx" => "markdown",
        "rs" => "rust",
        "lua" => "lua",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" => "typescript",
        "tsx" => "typescriptreact",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "sh" | "bash" => "sh",
        "norg" => "norg",
        "org" => "org",
        "txt" => "text",
        "html" | "htm" => "html",
        "css" => "css",
        _ => return None,
    };
    Some(filetype)
}
