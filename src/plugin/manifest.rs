use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::mode::Mode;

/// `plugin.toml` at the root of a plugin directory.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    #[serde(default)]
    pub keybindings: Vec<KeybindingDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeybindingDef {
    #[serde(default)]
    pub mode: Mode,
    pub keys: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginManifest {
    pub const FILE_NAME: &'static str = "plugin.toml";

    pub fn read(root_dir: &Path) -> Result<Self> {
        let manifest_path = root_dir.join(Self::FILE_NAME);
        let raw = fs::read_to_string(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;

        toml::from_str::<PluginManifest>(&raw)
            .with_context(|| format!("parsing {}", manifest_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_manifest_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("plugin.toml"),
            r#"
name = "pomo"
version = "0.3.1"

[[commands]]
name = "TimerStart"

[[keybindings]]
keys = "<leader>ts"
action = ":TimerStart 25m<CR>"
"#,
        )
        .unwrap();

        let manifest = PluginManifest::read(dir.path()).unwrap();
        assert_eq!(manifest.name, "pomo");
        assert_eq!(manifest.commands[0].name, "TimerStart");
        assert_eq!(manifest.keybindings[0].mode, Mode::Normal);
        assert!(manifest.description.is_none());
    }

    #[test]
    fn missing_manifest_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = PluginManifest::read(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("plugin.toml"));
    }
}
