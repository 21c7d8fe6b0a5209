use std::fmt;
use std::path::PathBuf;

use smallvec::SmallVec;

use crate::keymap::Action;
use crate::model::keys::KeySequence;
use crate::model::mode::Mode;
use crate::plugin::installer::BuildStep;
use crate::plugin::setup::{SetupContext, SetupPayload};

/// Setup options handed to a plugin: a TOML table.
pub type Options = toml::Table;

/// Unique plugin name, conventionally `source/name` (`folke/which-key.nvim`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the id, without a `.git` suffix.
    pub fn short_name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/').trim_end_matches(".git");
        trimmed
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(trimmed)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A lazy key: pressing `sequence` in `mode` loads the plugin.
#[derive(Debug, Clone)]
pub struct KeyTrigger {
    pub mode: Mode,
    pub sequence: KeySequence,
    /// Own right-hand side. Without one, the binding the plugin makes for the
    /// same keys during setup is used.
    pub action: Option<Action>,
    pub desc: Option<String>,
}

impl KeyTrigger {
    pub fn new(mode: Mode, sequence: KeySequence) -> Self {
        Self {
            mode,
            sequence,
            action: None,
            desc: None,
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }
}

/// When a plugin is materialized.
#[derive(Debug, Clone, Default)]
pub enum Activation {
    /// At startup, in dependency order.
    #[default]
    Immediate,
    OnEvent(String),
    OnCommand(Vec<String>),
    OnFiletype(Vec<String>),
    OnKeys(Vec<KeyTrigger>),
}

impl Activation {
    pub fn is_lazy(&self) -> bool {
        !matches!(self, Activation::Immediate)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Immediate => write!(f, "start"),
            Activation::OnEvent(event) => write!(f, "event {event}"),
            Activation::OnCommand(names) => write!(f, "cmd {}", names.join(",")),
            Activation::OnFiletype(types) => write!(f, "ft {}", types.join(",")),
            Activation::OnKeys(keys) => {
                let keys: Vec<String> = keys.iter().map(|k| k.sequence.to_string()).collect();
                write!(f, "keys {}", keys.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    Path(PathBuf),
    Repo(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    Registered,
    Materializing,
    Active,
    /// Terminal for the session; the plugin is never retried.
    Failed(String),
}

impl PluginState {
    pub fn label(&self) -> &'static str {
        match self {
            PluginState::Registered => "registered",
            PluginState::Materializing => "loading",
            PluginState::Active => "active",
            PluginState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct PluginDescriptor {
    pub id: PluginId,
    pub activation: Activation,
    pub dependencies: SmallVec<[PluginId; 4]>,
    /// Taken out when setup runs, so it can only run once.
    pub setup: Option<SetupPayload>,
    pub build: Option<BuildStep>,
    pub revision: Option<String>,
    pub source: Option<PluginSource>,
    /// Environment variables the plugin's commands need at invocation time.
    pub credentials: Vec<String>,
    pub state: PluginState,
    /// Logical time setup started.
    pub setup_at: Option<u64>,
    /// Logical time the plugin became active.
    pub activated_at: Option<u64>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<PluginId>) -> Self {
        Self {
            id: id.into(),
            activation: Activation::Immediate,
            dependencies: SmallVec::new(),
            setup: Some(SetupPayload::Options(Options::new())),
            build: None,
            revision: None,
            source: None,
            credentials: Vec::new(),
            state: PluginState::Registered,
            setup_at: None,
            activated_at: None,
        }
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn on_event(self, event: impl Into<String>) -> Self {
        self.activation(Activation::OnEvent(event.into()))
    }

    pub fn on_command<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.activation(Activation::OnCommand(names.into_iter().map(Into::into).collect()))
    }

    pub fn on_filetype<I, S>(self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.activation(Activation::OnFiletype(types.into_iter().map(Into::into).collect()))
    }

    pub fn on_keys(self, keys: Vec<KeyTrigger>) -> Self {
        self.activation(Activation::OnKeys(keys))
    }

    /// Adds a dependency; repeated ids are ignored.
    pub fn depends_on(mut self, id: impl Into<PluginId>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Static options for the host's generic setup entry point.
    pub fn opts(mut self, options: Options) -> Self {
        self.setup = Some(SetupPayload::Options(options));
        self
    }

    /// Custom setup routine, called with the defaults merged with any user override.
    pub fn config<F>(mut self, defaults: Options, routine: F) -> Self
    where
        F: FnOnce(&Options, &mut SetupContext<'_>) -> anyhow::Result<()> + 'static,
    {
        self.setup = Some(SetupPayload::Callback {
            defaults,
            routine: Box::new(routine),
        });
        self
    }

    pub fn build(mut self, step: BuildStep) -> Self {
        self.build = Some(step);
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn source(mut self, source: PluginSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn credential(mut self, variable: impl Into<String>) -> Self {
        self.credentials.push(variable.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_source_and_suffix() {
        assert_eq!(PluginId::new("nvim-neo-tree/neo-tree.nvim").short_name(), "neo-tree.nvim");
        assert_eq!(PluginId::new("https://github.com/a/b.git").short_name(), "b");
        assert_eq!(PluginId::new("local").short_name(), "local");
    }

    #[test]
    fn builder_defaults_to_immediate_with_empty_options() {
        let plugin = PluginDescriptor::new("nvim-lua/plenary.nvim")
            .depends_on("a/b")
            .depends_on("a/b");

        assert!(!plugin.activation.is_lazy());
        assert_eq!(plugin.dependencies.len(), 1);
        assert_eq!(plugin.state, PluginState::Registered);
        assert!(matches!(plugin.setup, Some(SetupPayload::Options(ref opts)) if opts.is_empty()));
    }

    #[test]
    fn activation_labels() {
        let plugin = PluginDescriptor::new("x/y").on_command(["Neotree", "NeotreeFocus"]);
        assert_eq!(plugin.activation.to_string(), "cmd Neotree,NeotreeFocus");
    }
}
