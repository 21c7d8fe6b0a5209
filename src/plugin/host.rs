use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, bail};

use crate::command::handler;
use crate::keymap::{Action, BindOptions};
use crate::model::config::expand_tilde;
use crate::plugin::descriptor::{Options, PluginDescriptor, PluginId, PluginSource};
use crate::plugin::manifest::PluginManifest;
use crate::plugin::setup::SetupContext;

/// The editor side of plugin loading: brings plugin code in and runs its
/// generic setup entry point.
pub trait PluginHost {
    /// Makes the plugin's code available. Called once, right before setup.
    fn load(&mut self, _plugin: &PluginDescriptor) -> anyhow::Result<()> {
        Ok(())
    }

    /// Generic setup entry point for plugins configured with static options.
    fn setup(
        &mut self,
        plugin: &PluginId,
        options: &Options,
        cx: &mut SetupContext<'_>,
    ) -> anyhow::Result<()>;

    /// Where the plugin lives on disk, if anywhere. Build steps run there.
    fn root_dir(&self, _plugin: &PluginDescriptor) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone)]
struct LoadedPlugin {
    root_dir: PathBuf,
    manifest: PluginManifest,
    options: Option<Options>,
}

/// Loads plugins from directories that carry a `plugin.toml` manifest.
///
/// Repo sources live under `<base_dir>/<repo slug>`; plugins without a
/// source use the last segment of their id.
#[derive(Debug)]
pub struct DirectoryHost {
    base_dir: PathBuf,
    loaded: HashMap<PluginId, LoadedPlugin>,
}

impl DirectoryHost {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            loaded: HashMap::new(),
        }
    }

    pub fn resolve_root(&self, plugin: &PluginDescriptor) -> PathBuf {
        match plugin.source.as_ref() {
            Some(PluginSource::Path(path)) => expand_tilde(path),
            Some(PluginSource::Repo(repo)) => self.base_dir.join(repo_slug(repo)),
            None => self.base_dir.join(plugin.id.short_name()),
        }
    }

    pub fn manifest(&self, plugin: &PluginId) -> Option<&PluginManifest> {
        self.loaded.get(plugin).map(|loaded| &loaded.manifest)
    }

    /// Options the plugin was set up with.
    pub fn options(&self, plugin: &PluginId) -> Option<&Options> {
        self.loaded.get(plugin).and_then(|loaded| loaded.options.as_ref())
    }
}

impl PluginHost for DirectoryHost {
    fn load(&mut self, plugin: &PluginDescriptor) -> anyhow::Result<()> {
        let root_dir = self.resolve_root(plugin);
        if !root_dir.is_dir() {
            bail!("plugin directory not found: {}", root_dir.display());
        }

        let manifest = PluginManifest::read(&root_dir)
            .with_context(|| format!("loading {}", plugin.id))?;
        tracing::debug!(
            plugin = %plugin.id,
            name = %manifest.name,
            version = %manifest.version,
            "manifest read"
        );

        self.loaded.insert(
            plugin.id.clone(),
            LoadedPlugin {
                root_dir,
                manifest,
                options: None,
            },
        );
        Ok(())
    }

    fn setup(
        &mut self,
        plugin: &PluginId,
        options: &Options,
        cx: &mut SetupContext<'_>,
    ) -> anyhow::Result<()> {
        let Some(loaded) = self.loaded.get_mut(plugin) else {
            bail!("plugin {plugin} was set up before it was loaded");
        };

        for command in &loaded.manifest.commands {
            let display_name = loaded.manifest.name.clone();
            cx.commands.define(
                command.name.clone(),
                Some(plugin.clone()),
                handler(move |invocation| {
                    let mut message =
                        format!("plugin {display_name} handled command: {}", invocation.name);
                    if !invocation.args.is_empty() {
                        message.push_str(&format!(" {}", invocation.args.join(" ")));
                    }
                    Ok(Some(message))
                }),
                command.description.clone(),
            );
        }

        for binding in &loaded.manifest.keybindings {
            let mut bind_options = BindOptions::owned_by(plugin.clone());
            bind_options.desc = binding.description.clone();
            cx.bind_with(
                binding.mode,
                &binding.keys,
                Action::command(binding.action.clone()),
                bind_options,
            )
            .with_context(|| format!("{} keybinding {}", loaded.manifest.name, binding.keys))?;
        }

        loaded.options = Some(options.clone());
        Ok(())
    }

    fn root_dir(&self, plugin: &PluginDescriptor) -> Option<PathBuf> {
        let root = self
            .loaded
            .get(&plugin.id)
            .map(|loaded| loaded.root_dir.clone())
            .unwrap_or_else(|| self.resolve_root(plugin));
        root.is_dir().then_some(root)
    }
}

fn repo_slug(repo: &str) -> String {
    let trimmed = repo.trim_end_matches('/').trim_end_matches(".git");
    trimmed
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("plugin")
        .to_string()
}
