use crossterm::event::KeyEvent;
use lazydeck::command::Invocation;
use std::path::PathBuf;

/// All possible messages that drive state transitions.
#[derive(Debug)]
pub enum Msg {
    // -- Input events (raw)
    Key(KeyEvent),
    Resize(u16, u16),

    // -- Editor events
    /// Fire a named editor event (`VimEnter`, `UIEnter`, ...).
    Event(String),
    OpenFile(PathBuf),
    /// A command line, without the leading `:`.
    Command(String),
    /// A host command reached through the session, e.g. from a key mapping.
    Builtin(Invocation),

    // -- System
    Tick,
}
