use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::plugin::descriptor::PluginId;

pub type BuildRoutine = Box<dyn FnMut(&BuildContext<'_>) -> Result<()>>;

/// Post-install action, e.g. regenerating helptags or compiling a native part.
pub enum BuildStep {
    /// Run through `sh -c` inside the plugin directory.
    Shell(String),
    Callback(BuildRoutine),
}

impl BuildStep {
    pub fn shell(command: impl Into<String>) -> Self {
        BuildStep::Shell(command.into())
    }

    pub fn callback<F>(routine: F) -> Self
    where
        F: FnMut(&BuildContext<'_>) -> Result<()> + 'static,
    {
        BuildStep::Callback(Box::new(routine))
    }

    pub fn run(&mut self, cx: &BuildContext<'_>) -> Result<()> {
        match self {
            BuildStep::Shell(command) => run_shell(command, cx),
            BuildStep::Callback(routine) => routine(cx),
        }
    }
}

impl fmt::Debug for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Shell(command) => f.debug_tuple("Shell").field(command).finish(),
            BuildStep::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub plugin: &'a PluginId,
    pub root_dir: Option<&'a Path>,
    pub revision: Option<&'a str>,
}

fn run_shell(command: &str, cx: &BuildContext<'_>) -> Result<()> {
    let mut process = Command::new("sh");
    process.arg("-c").arg(command);
    if let Some(root) = cx.root_dir {
        process.current_dir(root);
    }

    let output = process
        .output()
        .with_context(|| format!("spawning build `{command}` for {}", cx.plugin))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "build `{command}` exited with {}: {}",
            output.status,
            stderr.trim()
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    builds: BTreeMap<String, LedgerEntry>,
}

/// Remembers which build steps completed, so they run once per install or
/// revision change rather than on every startup.
#[derive(Debug, Default)]
pub struct BuildLedger {
    path: Option<PathBuf>,
    builds: BTreeMap<String, LedgerEntry>,
}

impl BuildLedger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builds = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<LedgerFile>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
                .builds
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            builds,
        })
    }

    pub fn needs_build(&self, plugin: &PluginId, revision: Option<&str>) -> bool {
        match self.builds.get(plugin.as_str()) {
            Some(entry) => entry.revision.as_deref() != revision,
            None => true,
        }
    }

    /// Records a completed build and writes the ledger back, if it has a file.
    pub fn record(&mut self, plugin: &PluginId, revision: Option<&str>) -> Result<()> {
        self.builds.insert(
            plugin.as_str().to_string(),
            LedgerEntry {
                revision: revision.map(str::to_string),
            },
        );
        self.save()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = LedgerFile {
            builds: self.builds.clone(),
        };
        let raw = toml::to_string(&file)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
