pub mod credentials;
pub mod descriptor;
pub mod host;
pub mod installer;
pub mod manifest;
pub mod registry;
pub mod setup;
pub mod trigger;

pub use descriptor::{Activation, KeyTrigger, Options, PluginDescriptor, PluginId, PluginState};
pub use host::{DirectoryHost, PluginHost};
pub use registry::Registry;
