use std::collections::VecDeque;
use std::fmt;

use crate::command::{CommandTable, Handler};
use crate::error::{Error, Result};
use crate::keymap::{Action, BindOptions, Keymap};
use crate::model::keys::KeySequence;
use crate::model::mode::Mode;
use crate::plugin::descriptor::{Options, PluginDescriptor, PluginId, PluginState};
use crate::plugin::host::PluginHost;

pub type SetupRoutine = Box<dyn FnOnce(&Options, &mut SetupContext<'_>) -> anyhow::Result<()>>;

/// How a plugin is configured once loaded.
pub enum SetupPayload {
    /// Passed to the host's generic setup entry point.
    Options(Options),
    /// Custom routine receiving the merged options.
    Callback {
        defaults: Options,
        routine: SetupRoutine,
    },
}

impl SetupPayload {
    pub fn defaults(&self) -> &Options {
        match self {
            SetupPayload::Options(options) => options,
            SetupPayload::Callback { defaults, .. } => defaults,
        }
    }
}

impl fmt::Debug for SetupPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupPayload::Options(options) => f.debug_tuple("Options").field(options).finish(),
            SetupPayload::Callback { defaults, .. } => f
                .debug_struct("Callback")
                .field("defaults", defaults)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Setup already ran; nothing happened.
    AlreadyApplied,
}

/// What a setup routine may touch: its own commands, key bindings and
/// user notifications.
pub struct SetupContext<'a> {
    pub(crate) plugin: &'a PluginId,
    pub(crate) leader: &'a str,
    pub(crate) keymap: &'a mut Keymap,
    pub(crate) commands: &'a mut CommandTable,
    pub(crate) notifications: &'a mut VecDeque<String>,
}

impl<'a> SetupContext<'a> {
    pub fn new(
        plugin: &'a PluginId,
        leader: &'a str,
        keymap: &'a mut Keymap,
        commands: &'a mut CommandTable,
        notifications: &'a mut VecDeque<String>,
    ) -> Self {
        Self {
            plugin,
            leader,
            keymap,
            commands,
            notifications,
        }
    }

    pub fn plugin(&self) -> &PluginId {
        self.plugin
    }

    /// Defines a command owned by the plugin being set up.
    pub fn command(&mut self, name: impl Into<String>, handler: Handler) {
        self.commands
            .define(name, Some(self.plugin.clone()), handler, None);
    }

    /// Binds keys on behalf of the plugin being set up.
    pub fn bind(&mut self, mode: Mode, notation: &str, action: Action) -> Result<()> {
        self.bind_with(mode, notation, action, BindOptions::owned_by(self.plugin.clone()))
    }

    pub fn bind_with(
        &mut self,
        mode: Mode,
        notation: &str,
        action: Action,
        options: BindOptions,
    ) -> Result<()> {
        let sequence = KeySequence::parse(notation, self.leader)?;
        self.keymap.bind(mode, sequence, Some(action), options);
        Ok(())
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.notifications.push_back(message.into());
    }
}

/// Merges user overrides into plugin defaults. Each top-level key of the
/// override replaces the default wholesale; nested tables are not merged.
pub fn merge_options(defaults: &Options, user: Option<&Options>) -> Options {
    let mut merged = defaults.clone();
    if let Some(user) = user {
        for (key, value) in user {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Runs a plugin's setup exactly once. A plugin whose setup already ran (or
/// that is already active) is left untouched.
pub fn apply(
    plugin: &mut PluginDescriptor,
    user: Option<&Options>,
    host: &mut dyn PluginHost,
    cx: &mut SetupContext<'_>,
) -> Result<Applied> {
    if plugin.state == PluginState::Active {
        return Ok(Applied::AlreadyApplied);
    }
    let Some(payload) = plugin.setup.take() else {
        return Ok(Applied::AlreadyApplied);
    };

    let merged = merge_options(payload.defaults(), user);
    let result = match payload {
        SetupPayload::Options(_) => host.setup(&plugin.id, &merged, cx),
        SetupPayload::Callback { routine, .. } => routine(&merged, cx),
    };

    result.map_err(|err| Error::setup(&plugin.id, &err))?;
    tracing::debug!(plugin = %plugin.id, keys = merged.len(), "setup applied");
    Ok(Applied::Applied)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::command::handler;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(PluginId, Options)>,
    }

    impl PluginHost for Recorder {
        fn setup(
            &mut self,
            plugin: &PluginId,
            options: &Options,
            _cx: &mut SetupContext<'_>,
        ) -> anyhow::Result<()> {
            self.calls.push((plugin.clone(), options.clone()));
            Ok(())
        }
    }

    fn table(source: &str) -> Options {
        toml::from_str(source).unwrap()
    }

    struct Parts {
        keymap: Keymap,
        commands: CommandTable,
        notes: VecDeque<String>,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                keymap: Keymap::new(),
                commands: CommandTable::new(),
                notes: VecDeque::new(),
            }
        }

        fn cx<'a>(&'a mut self, id: &'a PluginId) -> SetupContext<'a> {
            SetupContext::new(id, " ", &mut self.keymap, &mut self.commands, &mut self.notes)
        }
    }

    #[test]
    fn override_wins_per_top_level_key() {
        let defaults = table("width = 30\n[window]\nposition = 'left'\nborder = 'rounded'\n");
        let user = table("[window]\nposition = 'right'\n");

        let merged = merge_options(&defaults, Some(&user));
        assert_eq!(merged["width"].as_integer(), Some(30));
        let window = merged["window"].as_table().unwrap();
        assert_eq!(window["position"].as_str(), Some("right"));
        assert!(window.get("border").is_none());
    }

    #[test]
    fn static_options_go_to_host_once() {
        let mut host = Recorder::default();
        let mut parts = Parts::new();
        let mut plugin =
            PluginDescriptor::new("lewis6991/gitsigns.nvim").opts(table("signcolumn = true"));
        let id = plugin.id.clone();
        let user = table("numhl = true");

        let mut cx = parts.cx(&id);
        assert_eq!(apply(&mut plugin, Some(&user), &mut host, &mut cx).unwrap(), Applied::Applied);
        assert_eq!(
            apply(&mut plugin, Some(&user), &mut host, &mut cx).unwrap(),
            Applied::AlreadyApplied
        );

        assert_eq!(host.calls.len(), 1);
        let (called_id, options) = &host.calls[0];
        assert_eq!(called_id, &id);
        assert_eq!(options["signcolumn"].as_bool(), Some(true));
        assert_eq!(options["numhl"].as_bool(), Some(true));
    }

    #[test]
    fn callback_receives_merged_options_and_registers_commands() {
        let seen = Rc::new(RefCell::new(None));
        let seen_in_routine = seen.clone();
        let mut plugin = PluginDescriptor::new("epwalsh/obsidian.nvim").config(
            table("workspace = 'notes'"),
            move |options, cx| {
                *seen_in_routine.borrow_mut() = options.get("workspace").cloned();
                cx.command("ObsidianToday", handler(|_| Ok(Some("today".into()))));
                cx.bind(Mode::Normal, "<leader>on", Action::command("ObsidianToday"))?;
                cx.notify("obsidian ready");
                Ok(())
            },
        );
        let id = plugin.id.clone();
        let mut host = Recorder::default();
        let mut parts = Parts::new();
        let user = table("workspace = 'work'");

        {
            let mut cx = parts.cx(&id);
            apply(&mut plugin, Some(&user), &mut host, &mut cx).unwrap();
        }

        assert!(host.calls.is_empty());
        assert_eq!(seen.borrow().as_ref().and_then(|v| v.as_str()), Some("work"));
        let entry = parts.commands.get("ObsidianToday").unwrap();
        assert_eq!(entry.owner.as_ref(), Some(&id));
        let binding = parts
            .keymap
            .get(Mode::Normal, &KeySequence::parse("<Space>on", "").unwrap())
            .unwrap();
        assert_eq!(binding.owner.as_ref(), Some(&id));
        assert_eq!(parts.notes, vec!["obsidian ready".to_string()]);
    }

    #[test]
    fn failing_routine_is_a_setup_failure() {
        let mut plugin = PluginDescriptor::new("robitx/gp.nvim")
            .config(Options::new(), |_, _| Err(anyhow::anyhow!("bad provider")));
        let id = plugin.id.clone();
        let mut host = Recorder::default();
        let mut parts = Parts::new();
        let mut cx = parts.cx(&id);

        let err = apply(&mut plugin, None, &mut host, &mut cx).unwrap_err();
        assert!(matches!(err, Error::SetupFailure { ref reason, .. } if reason == "bad provider"));
    }
}
