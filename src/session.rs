//! The running plugin session: one context object holding the registry, the
//! keymap and the command table, driven from the editor's main loop.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::command::{CommandTable, Handler, Invocation};
use crate::error::{Error, Result};
use crate::keymap::{Action, BindOptions, Keymap};
use crate::model::config::AppConfig;
use crate::model::keys::KeySequence;
use crate::model::mode::Mode;
use crate::plugin::credentials::Credentials;
use crate::plugin::descriptor::{Activation, Options, PluginDescriptor, PluginId, PluginState};
use crate::plugin::host::PluginHost;
use crate::plugin::installer::{BuildContext, BuildLedger};
use crate::plugin::registry::{PluginKey, Registry};
use crate::plugin::setup::{self, SetupContext};
use crate::plugin::trigger::{ActivationRecord, Trigger, TriggerIndex, detect_filetype};

/// Outcome of a command or key dispatch. Details go to the notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    NotFound,
    Failed,
}

pub struct Session {
    registry: Registry,
    triggers: TriggerIndex,
    keymap: Keymap,
    commands: CommandTable,
    overrides: HashMap<PluginId, Options>,
    host: Box<dyn PluginHost>,
    credentials: Credentials,
    ledger: BuildLedger,
    leader: String,
    clock: u64,
    journal: Vec<ActivationRecord>,
    notifications: VecDeque<String>,
    started: bool,
}

impl Session {
    pub fn new(host: impl PluginHost + 'static) -> Self {
        Self {
            registry: Registry::new(),
            triggers: TriggerIndex::default(),
            keymap: Keymap::new(),
            commands: CommandTable::new(),
            overrides: HashMap::new(),
            host: Box::new(host),
            credentials: Credentials::from_env(),
            ledger: BuildLedger::in_memory(),
            leader: " ".to_string(),
            clock: 0,
            journal: Vec::new(),
            notifications: VecDeque::new(),
            started: false,
        }
    }

    pub fn with_leader(mut self, leader: impl Into<String>) -> Self {
        self.leader = leader.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_ledger(mut self, ledger: BuildLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Registers every enabled plugin, override and keymap from `config`.
    pub fn from_config(config: &AppConfig, host: impl PluginHost + 'static) -> Result<Self> {
        let leader = config.general.leader.clone();
        let mut session = Session::new(host).with_leader(leader.clone());

        for spec in config.plugins.iter().filter(|spec| spec.enabled) {
            session.register(spec.descriptor(&leader)?)?;
        }
        for (id, options) in &config.overrides {
            session.set_override(PluginId::new(id.as_str()), options.clone());
        }
        for keymap in &config.keymaps {
            let options = BindOptions {
                owner: keymap.owner.as_deref().map(PluginId::new),
                desc: keymap.desc.clone(),
            };
            session.bind(keymap.mode, &keymap.lhs, Action::command(keymap.rhs.clone()), options)?;
        }

        Ok(session)
    }

    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted(descriptor.id));
        }
        self.registry.register(descriptor).map(|_| ())
    }

    /// User options for a plugin, merged over its defaults at setup.
    pub fn set_override(&mut self, id: PluginId, options: Options) {
        self.overrides.insert(id, options);
    }

    /// Binds keys, replacing any binding for the same mode and sequence.
    pub fn bind(
        &mut self,
        mode: Mode,
        notation: &str,
        action: Action,
        options: BindOptions,
    ) -> Result<()> {
        let sequence = KeySequence::parse(notation, &self.leader)?;
        self.keymap.bind(mode, sequence, Some(action), options);
        Ok(())
    }

    /// Defines a command that belongs to no plugin.
    pub fn define_command(&mut self, name: impl Into<String>, handler: Handler) {
        self.commands.define(name, None, handler, None);
    }

    /// Resolves plugin order, runs pending build steps, installs command and
    /// key placeholders, and loads every non-lazy plugin. Configuration errors
    /// abort before anything loads.
    pub fn startup(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let order = self.registry.resolve_order()?;
        self.triggers = TriggerIndex::build(self.registry.iter());
        self.install_placeholders();
        self.run_builds(&order);
        self.started = true;

        let started = Instant::now();
        for id in &order {
            let lazy = self
                .registry
                .get(id)
                .is_some_and(|plugin| plugin.activation.is_lazy());
            if lazy {
                continue;
            }
            if let Err(err) = self.materialize(id, &Trigger::Startup) {
                self.report(err);
            }
        }

        info!(
            plugins = self.registry.len(),
            active = self.count_in(|state| *state == PluginState::Active),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "startup complete"
        );
        Ok(())
    }

    /// Loads plugins waiting on `event`. Later firings are no-ops for them.
    pub fn fire_event(&mut self, event: &str) -> Result<Vec<PluginId>> {
        self.ensure_started()?;
        let waiting = self.triggers.for_event(event).to_vec();
        Ok(self.activate_all(waiting, &Trigger::Event(event.to_string())))
    }

    /// Loads plugins waiting on a buffer of `filetype`.
    pub fn filetype_opened(&mut self, filetype: &str) -> Result<Vec<PluginId>> {
        self.ensure_started()?;
        let waiting = self.triggers.for_filetype(filetype).to_vec();
        Ok(self.activate_all(waiting, &Trigger::Filetype(filetype.to_string())))
    }

    /// A buffer was opened: loads filetype plugins, then fires `BufReadPost`.
    pub fn open_buffer(&mut self, path: &Path) -> Result<Vec<PluginId>> {
        let mut activated = match detect_filetype(path) {
            Some(filetype) => self.filetype_opened(filetype)?,
            None => {
                self.ensure_started()?;
                Vec::new()
            }
        };
        activated.extend(self.fire_event("BufReadPost")?);
        Ok(activated)
    }

    /// Explicit load, as if something had triggered the plugin.
    pub fn load(&mut self, id: &PluginId) -> Result<()> {
        self.ensure_started()?;
        self.materialize(id, &Trigger::Manual).inspect_err(|err| {
            self.notifications.push_back(err.to_string());
        })
    }

    /// Runs a command line. A placeholder command first loads its plugin, then
    /// the invocation is forwarded to the real handler.
    pub fn execute(&mut self, line: &str) -> Result<Dispatch> {
        self.ensure_started()?;
        let Some(invocation) = Invocation::parse(line) else {
            return Ok(Dispatch::NotFound);
        };
        Ok(self.run_invocation(&invocation))
    }

    /// Runs the binding for exactly `sequence` in `mode`, loading its owner first.
    pub fn dispatch_keys(&mut self, mode: Mode, sequence: &KeySequence) -> Result<Dispatch> {
        self.ensure_started()?;
        let Some(binding) = self.keymap.get(mode, sequence) else {
            return Ok(Dispatch::NotFound);
        };

        let label = format!("keys {sequence}");
        if let Some(owner) = binding.owner.clone()
            && !self.is_active(&owner)
            && let Err(err) = self.materialize(&owner, &Trigger::Keys(sequence.to_string()))
        {
            self.report(Error::activation(label, err));
            return Ok(Dispatch::Failed);
        }

        // Setup may have replaced the placeholder with the real binding.
        let Some(binding) = self.keymap.get(mode, sequence) else {
            return Ok(Dispatch::NotFound);
        };
        let owner = binding.owner.clone();
        let dispatch = match binding.action.clone() {
            Some(Action::Command(line)) => match Invocation::parse(&line) {
                Some(invocation) => self.run_invocation(&invocation),
                None => Dispatch::NotFound,
            },
            Some(Action::Callback(handler)) => {
                let invocation = Invocation::new(sequence.to_string(), Vec::new());
                self.call(owner.as_ref(), &handler, &invocation)
            }
            None => {
                let owner = owner.map(|id| id.to_string()).unwrap_or_default();
                self.notifications
                    .push_back(format!("{label}: {owner} did not bind these keys"));
                Dispatch::Failed
            }
        };
        Ok(dispatch)
    }

    /// Parses `notation` with the session leader and dispatches it.
    pub fn feed_keys(&mut self, mode: Mode, notation: &str) -> Result<Dispatch> {
        let sequence = KeySequence::parse(notation, &self.leader)?;
        self.dispatch_keys(mode, &sequence)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    pub fn state(&self, id: &PluginId) -> Option<&PluginState> {
        self.registry.get(id).map(|plugin| &plugin.state)
    }

    pub fn is_active(&self, id: &PluginId) -> bool {
        self.state(id) == Some(&PluginState::Active)
    }

    pub fn descriptor(&self, id: &PluginId) -> Option<&PluginDescriptor> {
        self.registry.get(id)
    }

    /// Plugins in declaration order.
    pub fn plugins(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.registry.iter()
    }

    /// Every materialization so far, in order.
    pub fn journal(&self) -> &[ActivationRecord] {
        &self.journal
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn notifications(&self) -> &VecDeque<String> {
        &self.notifications
    }

    pub fn drain_notifications(&mut self) -> Vec<String> {
        self.notifications.drain(..).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "plugins: {} registered, {} active, {} failed",
            self.registry.len(),
            self.count_in(|state| *state == PluginState::Active),
            self.count_in(|state| matches!(state, PluginState::Failed(_)))
        )
    }

    pub fn list_rows(&self) -> Vec<String> {
        if self.registry.is_empty() {
            return vec!["plugins: none configured".to_string()];
        }

        self.registry
            .iter()
            .map(|plugin| {
                format!(
                    "plugin {} [{}] ({})",
                    plugin.id,
                    plugin.state.label(),
                    plugin.activation
                )
            })
            .collect()
    }

    pub fn error_rows(&self) -> Vec<String> {
        self.registry
            .iter()
            .filter_map(|plugin| match &plugin.state {
                PluginState::Failed(reason) => Some(format!("plugin {}: {reason}", plugin.id)),
                _ => None,
            })
            .collect()
    }

    fn count_in(&self, pred: impl Fn(&PluginState) -> bool) -> usize {
        self.registry.iter().filter(|plugin| pred(&plugin.state)).count()
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(Error::NotStarted)
        }
    }

    fn report(&mut self, err: Error) {
        warn!(error = %err, "plugin error");
        self.notifications.push_back(err.to_string());
    }

    fn install_placeholders(&mut self) {
        for plugin in self.registry.iter() {
            match &plugin.activation {
                Activation::OnCommand(names) => {
                    for name in names {
                        self.commands.placeholder(name.clone(), plugin.id.clone());
                    }
                }
                Activation::OnKeys(keys) => {
                    for key in keys {
                        self.keymap.bind(
                            key.mode,
                            key.sequence.clone(),
                            key.action.clone(),
                            BindOptions {
                                owner: Some(plugin.id.clone()),
                                desc: key.desc.clone(),
                            },
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn run_builds(&mut self, order: &[PluginId]) {
        for id in order {
            let Some(key) = self.registry.key(id) else {
                continue;
            };
            let plugin = self.registry.by_key(key);
            if plugin.build.is_none() || !self.ledger.needs_build(id, plugin.revision.as_deref()) {
                continue;
            }

            let root_dir = self.host.root_dir(plugin);
            let revision = plugin.revision.clone();
            let plugin = self.registry.by_key_mut(key);
            let Some(step) = plugin.build.as_mut() else {
                continue;
            };
            let cx = BuildContext {
                plugin: &plugin.id,
                root_dir: root_dir.as_deref(),
                revision: revision.as_deref(),
            };

            let started = Instant::now();
            match step.run(&cx) {
                Ok(()) => {
                    info!(
                        plugin = %id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "build step finished"
                    );
                    if let Err(err) = self.ledger.record(id, revision.as_deref()) {
                        warn!(plugin = %id, error = %err, "failed to record build");
                    }
                }
                Err(err) => {
                    warn!(plugin = %id, error = %err, "build step failed");
                    self.notifications
                        .push_back(format!("build for {id} failed: {err:#}"));
                }
            }
        }
    }

    fn activate_all(&mut self, waiting: Vec<PluginId>, trigger: &Trigger) -> Vec<PluginId> {
        let mut activated = Vec::new();
        for id in waiting {
            if self.state(&id) != Some(&PluginState::Registered) {
                continue;
            }
            match self.materialize(&id, trigger) {
                Ok(()) => activated.push(id),
                Err(err) => self.report(err),
            }
        }
        debug!(trigger = %trigger, count = activated.len(), "trigger handled");
        activated
    }

    /// Loads `id` after its dependencies. Every plugin goes through setup at
    /// most once; a failure is final for the session.
    fn materialize(&mut self, id: &PluginId, trigger: &Trigger) -> Result<()> {
        let key = self
            .registry
            .key(id)
            .ok_or_else(|| Error::UnknownPlugin(id.clone()))?;

        match &self.registry.by_key(key).state {
            PluginState::Active => return Ok(()),
            PluginState::Failed(_) => return Err(Error::PreviouslyFailed(id.clone())),
            PluginState::Materializing => return Err(Error::CyclicDependency(vec![id.clone()])),
            PluginState::Registered => {}
        }

        let started = Instant::now();
        let plugin = self.registry.by_key_mut(key);
        plugin.state = PluginState::Materializing;
        let dependencies = plugin.dependencies.clone();

        for dependency in &dependencies {
            if let Err(err) = self.materialize(dependency, &Trigger::Dependency(id.clone())) {
                let err = Error::DependencyFailed {
                    plugin: id.clone(),
                    dependency: dependency.clone(),
                    source: Box::new(err),
                };
                self.fail(key, &err);
                return Err(err);
            }
        }

        if let Err(err) = self.run_setup(key) {
            self.fail(key, &err);
            return Err(err);
        }

        self.clock += 1;
        let plugin = self.registry.by_key_mut(key);
        plugin.state = PluginState::Active;
        plugin.activated_at = Some(self.clock);
        self.journal.push(ActivationRecord {
            plugin: id.clone(),
            trigger: trigger.clone(),
            at: self.clock,
        });

        info!(
            plugin = %id,
            trigger = %trigger,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plugin loaded"
        );
        Ok(())
    }

    fn run_setup(&mut self, key: PluginKey) -> Result<()> {
        let Session {
            registry,
            keymap,
            commands,
            overrides,
            host,
            notifications,
            leader,
            clock,
            ..
        } = self;

        let plugin = registry.by_key_mut(key);
        host.load(plugin).map_err(|err| Error::setup(&plugin.id, &err))?;

        *clock += 1;
        plugin.setup_at = Some(*clock);

        let id = plugin.id.clone();
        let mut cx = SetupContext::new(&id, leader.as_str(), keymap, commands, notifications);
        setup::apply(plugin, overrides.get(&id), &mut **host, &mut cx)?;
        Ok(())
    }

    fn fail(&mut self, key: PluginKey, err: &Error) {
        let plugin = self.registry.by_key_mut(key);
        warn!(plugin = %plugin.id, error = %err, "plugin failed");
        plugin.state = PluginState::Failed(err.to_string());
    }

    fn run_invocation(&mut self, invocation: &Invocation) -> Dispatch {
        let Some(entry) = self.commands.get(&invocation.name) else {
            self.notifications
                .push_back(format!("command not found: {}", invocation.name));
            return Dispatch::NotFound;
        };

        if let Some(owner) = entry.owner.clone()
            && !self.is_active(&owner)
            && let Err(err) = self.materialize(&owner, &Trigger::Command(invocation.name.clone()))
        {
            self.report(Error::activation(format!("command {}", invocation.name), err));
            return Dispatch::Failed;
        }

        let Some(entry) = self.commands.get(&invocation.name) else {
            return Dispatch::NotFound;
        };
        let owner = entry.owner.clone();
        let Some(handler) = entry.handler.clone() else {
            let owner = owner.map(|id| id.to_string()).unwrap_or_default();
            self.notifications.push_back(format!(
                "command {}: {owner} did not define it",
                invocation.name
            ));
            return Dispatch::Failed;
        };

        self.call(owner.as_ref(), &handler, invocation)
    }

    fn call(
        &mut self,
        owner: Option<&PluginId>,
        handler: &Handler,
        invocation: &Invocation,
    ) -> Dispatch {
        if let Some(plugin) = owner.and_then(|id| self.registry.get(id))
            && let Err(err) = self.credentials.require_all(&plugin.credentials)
        {
            self.report(err);
            return Dispatch::Failed;
        }

        let result = (&mut *handler.borrow_mut())(invocation);
        match result {
            Ok(Some(message)) => {
                self.notifications.push_back(message);
                Dispatch::Handled
            }
            Ok(None) => Dispatch::Handled,
            Err(err) => {
                warn!(command = %invocation.name, error = %err, "handler failed");
                self.notifications
                    .push_back(format!("{}: {err:#}", invocation.name));
                Dispatch::Failed
            }
        }
    }
}
