//! Declarative lazy plugin loading and key binding for modal terminal editors.
//!
//! Plugins are described up front as [`PluginDescriptor`]s. A [`Session`]
//! orders them by dependency, loads the eager ones at startup, and loads the
//! rest the first time one of their triggers fires: an editor event, a
//! command, a filetype, or a key sequence.

pub mod command;
pub mod error;
pub mod keymap;
pub mod model;
pub mod plugin;
pub mod session;

pub use error::{Error, Result};
pub use keymap::{Action, BindOptions, Keymap};
pub use model::keys::{Key, KeySequence};
pub use model::mode::Mode;
pub use plugin::{Activation, KeyTrigger, Options, PluginDescriptor, PluginId, PluginState};
pub use session::{Dispatch, Session};
