use thiserror::Error;

use crate::plugin::descriptor::PluginId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while loading or driving plugins.
///
/// Configuration-time variants abort the whole load (see [`Error::is_fatal`]);
/// runtime variants are caught by the session and surfaced as notifications.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("plugin {0} is registered more than once")]
    DuplicateIdentifier(PluginId),

    #[error("cyclic dependency between {}", join_ids(.0))]
    CyclicDependency(Vec<PluginId>),

    #[error("plugin {plugin} depends on unknown plugin {dependency}")]
    UnknownDependency {
        plugin: PluginId,
        dependency: PluginId,
    },

    #[error("plugin {0} declares more than one kind of load trigger")]
    ConflictingTriggers(PluginId),

    #[error("invalid key sequence {sequence:?}: {reason}")]
    InvalidKeySequence { sequence: String, reason: String },

    #[error("unknown mode {0:?}")]
    UnknownMode(String),

    #[error("setup of {plugin} failed: {reason}")]
    SetupFailure { plugin: PluginId, reason: String },

    #[error("plugin {plugin} not loaded: dependency {dependency} failed: {source}")]
    DependencyFailed {
        plugin: PluginId,
        dependency: PluginId,
        #[source]
        source: Box<Error>,
    },

    #[error("missing credential: environment variable {variable} is not set")]
    MissingCredential { variable: String },

    #[error("{trigger}: {source}")]
    ActivationFailure {
        trigger: String,
        #[source]
        source: Box<Error>,
    },

    #[error("plugin {0} failed earlier in this session")]
    PreviouslyFailed(PluginId),

    #[error("plugins have not been started yet")]
    NotStarted,

    #[error("cannot register {0}: plugins have already been started")]
    AlreadyStarted(PluginId),

    #[error("unknown plugin {0}")]
    UnknownPlugin(PluginId),
}

impl Error {
    /// Configuration errors make the plugin order undecidable; nothing loads.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateIdentifier(_)
                | Error::CyclicDependency(_)
                | Error::UnknownDependency { .. }
                | Error::ConflictingTriggers(_)
                | Error::InvalidKeySequence { .. }
                | Error::UnknownMode(_)
        )
    }

    pub(crate) fn setup(plugin: &PluginId, err: &anyhow::Error) -> Self {
        Error::SetupFailure {
            plugin: plugin.clone(),
            reason: format!("{err:#}"),
        }
    }

    pub(crate) fn activation(trigger: impl Into<String>, source: Error) -> Self {
        Error::ActivationFailure {
            trigger: trigger.into(),
            source: Box::new(source),
        }
    }
}

fn join_ids(ids: &[PluginId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
