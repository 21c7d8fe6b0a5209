use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::Error;
use crate::keymap::Action;
use crate::model::keys::KeySequence;
use crate::model::mode::Mode;
use crate::plugin::descriptor::{
    Activation, KeyTrigger, Options, PluginDescriptor, PluginSource,
};
use crate::plugin::installer::BuildStep;

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub keymaps: Vec<KeymapSpec>,
    /// User options per plugin id, merged over the plugin's own `opts`.
    #[serde(default)]
    pub overrides: HashMap<String, Options>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Key notation substituted for `<leader>`.
    pub leader: String,
    /// `tracing-subscriber` env-filter directive.
    pub log_filter: String,
    /// How long a partial key sequence waits for the next key.
    pub timeout_ms: u64,
    #[serde(default)]
    pub plugin_dir: Option<String>,
    #[serde(default)]
    pub state_dir: Option<String>,
}

/// One `[[plugins]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSpec {
    pub id: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub ft: Vec<String>,
    #[serde(default)]
    pub keys: Vec<KeySpec>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub opts: Options,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeySpec {
    pub lhs: String,
    #[serde(default)]
    pub rhs: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub desc: Option<String>,
}

/// One `[[keymaps]]` entry, bound at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct KeymapSpec {
    pub lhs: String,
    pub rhs: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub desc: Option<String>,
    /// Plugin loaded before `rhs` runs.
    #[serde(default)]
    pub owner: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl PluginSpec {
    /// Builds the descriptor. Only one kind of trigger may be given.
    pub fn descriptor(&self, leader: &str) -> Result<PluginDescriptor, Error> {
        let mut triggers = Vec::new();
        if let Some(event) = self.event.as_ref() {
            triggers.push(Activation::OnEvent(event.clone()));
        }
        if !self.cmd.is_empty() {
            triggers.push(Activation::OnCommand(self.cmd.clone()));
        }
        if !self.ft.is_empty() {
            triggers.push(Activation::OnFiletype(self.ft.clone()));
        }
        if !self.keys.is_empty() {
            let keys = self
                .keys
                .iter()
                .map(|key| key.trigger(leader))
                .collect::<Result<Vec<_>, Error>>()?;
            triggers.push(Activation::OnKeys(keys));
        }

        let mut descriptor = PluginDescriptor::new(self.id.as_str());
        match triggers.len() {
            0 => {}
            1 => descriptor = descriptor.activation(triggers.remove(0)),
            _ => return Err(Error::ConflictingTriggers(descriptor.id)),
        }

        for dependency in &self.dependencies {
            descriptor = descriptor.depends_on(dependency.as_str());
        }
        descriptor = descriptor.opts(self.opts.clone());

        if let Some(path) = self.path.as_ref() {
            descriptor = descriptor.source(PluginSource::Path(path.clone()));
        } else if let Some(repo) = self.repo.as_ref() {
            descriptor = descriptor.source(PluginSource::Repo(repo.clone()));
        }
        if let Some(revision) = self.revision.as_ref() {
            descriptor = descriptor.revision(revision.clone());
        }
        if let Some(build) = self.build.as_ref() {
            descriptor = descriptor.build(BuildStep::shell(build.clone()));
        }
        for variable in &self.credentials {
            descriptor = descriptor.credential(variable.clone());
        }

        Ok(descriptor)
    }
}

impl KeySpec {
    fn trigger(&self, leader: &str) -> Result<KeyTrigger, Error> {
        let mut trigger = KeyTrigger::new(self.mode, KeySequence::parse(&self.lhs, leader)?);
        if let Some(rhs) = self.rhs.as_ref() {
            trigger = trigger.action(Action::command(rhs.clone()));
        }
        trigger.desc = self.desc.clone();
        Ok(trigger)
    }
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load() -> Result<Self> {
        let user_path = config_dir().join("config.toml");
        Self::load_from(user_path.exists().then_some(user_path.as_path()))
    }

    /// Defaults layered with the file at `user_path`, if given. The user's
    /// `[general]` is merged key by key; every other top-level key replaces the
    /// default wholesale.
    pub fn load_from(user_path: Option<&Path>) -> Result<Self> {
        let mut merged: toml::Table =
            toml::from_str(DEFAULTS).context("parsing built-in defaults")?;

        if let Some(path) = user_path {
            let user_str = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let user: toml::Table =
                toml::from_str(&user_str).with_context(|| format!("parsing {}", path.display()))?;
            layer(&mut merged, user);
        }

        toml::Value::Table(merged)
            .try_into::<AppConfig>()
            .context("invalid configuration")
    }

    pub fn parse(source: &str) -> Result<Self> {
        let mut merged: toml::Table = toml::from_str(DEFAULTS)?;
        layer(&mut merged, toml::from_str(source)?);
        Ok(toml::Value::Table(merged).try_into::<AppConfig>()?)
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.general
            .plugin_dir
            .as_ref()
            .map(|dir| expand_tilde(Path::new(dir)))
            .unwrap_or_else(plugin_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.general
            .state_dir
            .as_ref()
            .map(|dir| expand_tilde(Path::new(dir)))
            .unwrap_or_else(data_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join("build-ledger.toml")
    }
}

fn layer(base: &mut toml::Table, user: toml::Table) {
    for (key, value) in user {
        if key == "general"
            && let toml::Value::Table(user_general) = &value
            && let Some(toml::Value::Table(base_general)) = base.get_mut(&key)
        {
            base_general.extend(user_general.clone());
            continue;
        }
        base.insert(key, value);
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "lazydeck")
}

pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".lazydeck"))
}

pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("lazydeck"))
}

pub fn plugin_dir() -> PathBuf {
    if let Some(project_dirs) = project_dirs() {
        return project_dirs.config_dir().join("plugins");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".config/lazydeck/plugins");
    }

    PathBuf::from(".lazydeck-plugins")
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if !text.starts_with('~') {
        return path.to_path_buf();
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        let home = base_dirs.home_dir().to_string_lossy();
        return PathBuf::from(text.replacen('~', &home, 1));
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_user_file() {
        let config = AppConfig::load_from(None).unwrap();
        assert_eq!(config.general.leader, " ");
        assert_eq!(config.general.log_filter, "lazydeck=info");
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn user_general_merges_key_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[general]\nleader = \",\"\n").unwrap();

        let config = AppConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.general.leader, ",");
        assert_eq!(config.general.timeout_ms, 1000);
    }

    #[test]
    fn parses_every_trigger_kind() {
        let config = AppConfig::parse(
            r#"
[[plugins]]
id = "nvim-lua/plenary.nvim"

[[plugins]]
id = "folke/which-key.nvim"
event = "VeryLazy"

[[plugins]]
id = "nvim-neo-tree/neo-tree.nvim"
cmd = ["Neotree"]
dependencies = ["nvim-lua/plenary.nvim"]
keys = []
[plugins.opts]
close_if_last_window = true

[[plugins]]
id = "epwalsh/obsidian.nvim"
ft = ["markdown"]
revision = "v3.9.0"
build = "make"

[[plugins]]
id = "robitx/gp.nvim"
credentials = ["OPENAI_API_KEY"]
keys = [
  { lhs = "<leader>ac", rhs = ":GpChatNew<CR>", desc = "new chat" },
  { lhs = "<leader>ar", mode = "v" },
]

[overrides."nvim-neo-tree/neo-tree.nvim"]
close_if_last_window = false
"#,
        )
        .unwrap();

        let leader = config.general.leader.clone();
        let descriptors: Vec<PluginDescriptor> = config
            .plugins
            .iter()
            .map(|spec| spec.descriptor(&leader).unwrap())
            .collect();

        assert!(matches!(descriptors[0].activation, Activation::Immediate));
        assert!(matches!(&descriptors[1].activation, Activation::OnEvent(e) if e == "VeryLazy"));
        let tree = &descriptors[2].activation;
        assert!(matches!(tree, Activation::OnCommand(c) if c == &["Neotree"]));
        assert_eq!(descriptors[2].dependencies.len(), 1);
        let notes = &descriptors[3].activation;
        assert!(matches!(notes, Activation::OnFiletype(f) if f == &["markdown"]));
        assert_eq!(descriptors[3].revision.as_deref(), Some("v3.9.0"));
        assert!(descriptors[3].build.is_some());

        let Activation::OnKeys(keys) = &descriptors[4].activation else {
            panic!("expected key trigger");
        };
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].sequence.to_string(), "<Space>ac");
        assert!(keys[0].action.is_some());
        assert_eq!(keys[1].mode, Mode::Visual);
        assert!(keys[1].action.is_none());
        assert_eq!(descriptors[4].credentials, vec!["OPENAI_API_KEY".to_string()]);

        let over = &config.overrides["nvim-neo-tree/neo-tree.nvim"];
        assert_eq!(over["close_if_last_window"].as_bool(), Some(false));
    }

    #[test]
    fn conflicting_triggers_are_rejected() {
        let config = AppConfig::parse(
            r#"
[[plugins]]
id = "a/b"
event = "BufReadPre"
cmd = ["B"]
"#,
        )
        .unwrap();

        assert!(matches!(
            config.plugins[0].descriptor(" "),
            Err(Error::ConflictingTriggers(_))
        ));
    }

    #[test]
    fn bad_mode_fails_parsing() {
        let result = AppConfig::parse(
            r#"
[[keymaps]]
lhs = "x"
rhs = "X"
mode = "hyper"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde(Path::new("~/plugins"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
