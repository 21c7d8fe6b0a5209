use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::command::Handler;
use crate::model::keys::{Key, KeySequence};
use crate::model::mode::Mode;
use crate::plugin::descriptor::PluginId;

/// What a binding does once its owner is loaded.
#[derive(Clone)]
pub enum Action {
    /// An editor command line, e.g. `:Neotree toggle<CR>`.
    Command(String),
    Callback(Handler),
}

impl Action {
    pub fn command(line: impl Into<String>) -> Self {
        Action::Command(line.into())
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command(line) => f.debug_tuple("Command").field(line).finish(),
            Action::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    /// Plugin that must be active before the action runs.
    pub owner: Option<PluginId>,
    pub desc: Option<String>,
}

impl BindOptions {
    pub fn owned_by(owner: PluginId) -> Self {
        Self {
            owner: Some(owner),
            desc: None,
        }
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub mode: Mode,
    pub sequence: KeySequence,
    /// `None` for a lazy-key placeholder: after its owner loads, whatever the
    /// owner bound to the same keys runs instead.
    pub action: Option<Action>,
    pub owner: Option<PluginId>,
    pub desc: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    None,
    /// Keys so far start a longer binding.
    Prefix,
    Exact,
    /// Bound as-is, but also the start of a longer binding.
    ExactOrLonger,
}

/// Mode-scoped key bindings. One binding per `(mode, sequence)`; the last bind wins.
#[derive(Debug, Default)]
pub struct Keymap {
    bindings: HashMap<(Mode, KeySequence), Binding>,
}

impl Keymap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binding and returns the one it replaced, if any.
    pub fn bind(
        &mut self,
        mode: Mode,
        sequence: KeySequence,
        action: Option<Action>,
        options: BindOptions,
    ) -> Option<Binding> {
        let binding = Binding {
            mode,
            sequence: sequence.clone(),
            action,
            owner: options.owner,
            desc: options.desc,
        };
        let previous = self.bindings.insert((mode, sequence), binding);
        if let Some(previous) = previous.as_ref() {
            tracing::debug!(mode = %mode, keys = %previous.sequence, "binding replaced");
        }
        previous
    }

    pub fn unbind(&mut self, mode: Mode, sequence: &KeySequence) -> Option<Binding> {
        self.bindings.remove(&(mode, sequence.clone()))
    }

    pub fn get(&self, mode: Mode, sequence: &KeySequence) -> Option<&Binding> {
        self.bindings.get(&(mode, sequence.clone()))
    }

    pub fn lookup(&self, mode: Mode, pending: &KeySequence) -> Lookup {
        let exact = self.get(mode, pending).is_some();
        let longer = self
            .bindings
            .keys()
            .any(|(m, seq)| *m == mode && pending.is_prefix_of(seq));

        match (exact, longer) {
            (true, true) => Lookup::ExactOrLonger,
            (true, false) => Lookup::Exact,
            (false, true) => Lookup::Prefix,
            (false, false) => Lookup::None,
        }
    }

    /// Bindings for one mode, ordered by key notation.
    pub fn bindings(&self, mode: Mode) -> Vec<&Binding> {
        let mut list: Vec<&Binding> = self
            .bindings
            .values()
            .filter(|binding| binding.mode == mode)
            .collect();
        list.sort_by_cached_key(|binding| binding.sequence.to_string());
        list
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// A bound sequence is ready to dispatch.
    Complete(KeySequence),
    /// Nothing is bound to this key, alone or as the start of a sequence.
    Unbound(Key),
}

/// Accumulates multi-key sequences until they resolve or time out.
#[derive(Debug)]
pub struct KeyDispatcher {
    pending: KeySequence,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl KeyDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: KeySequence::new(),
            deadline: None,
            timeout,
        }
    }

    pub fn pending(&self) -> &KeySequence {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.deadline = None;
    }

    /// Adds one key. An empty result means more keys may follow.
    ///
    /// When the pending keys stop matching anything, the longest bound prefix
    /// fires and the keys after it are fed again.
    pub fn feed(&mut self, keymap: &Keymap, mode: Mode, key: Key, now: Instant) -> Vec<Feed> {
        let mut feeds = Vec::new();
        self.advance(keymap, mode, VecDeque::from([key]), now, &mut feeds);
        feeds
    }

    /// Called on every tick. When the wait runs out, the pending keys resolve
    /// as if nothing longer could follow.
    pub fn expire(&mut self, keymap: &Keymap, mode: Mode, now: Instant) -> Vec<Feed> {
        let mut feeds = Vec::new();
        if self.deadline.is_none_or(|deadline| now < deadline) {
            return feeds;
        }

        let pending = self.take();
        let rest = split_longest_bound(keymap, mode, &pending, &mut feeds);
        self.advance(keymap, mode, rest, now, &mut feeds);
        feeds
    }

    fn advance(
        &mut self,
        keymap: &Keymap,
        mode: Mode,
        mut queue: VecDeque<Key>,
        now: Instant,
        feeds: &mut Vec<Feed>,
    ) {
        while let Some(key) = queue.pop_front() {
            self.pending.push(key);
            match keymap.lookup(mode, &self.pending) {
                Lookup::Exact => feeds.push(Feed::Complete(self.take())),
                Lookup::Prefix | Lookup::ExactOrLonger => {
                    self.deadline = Some(now + self.timeout);
                }
                Lookup::None => {
                    let pending = self.take();
                    let mut rest = split_longest_bound(keymap, mode, &pending, feeds);
                    rest.extend(queue.drain(..));
                    queue = rest;
                }
            }
        }
    }

    fn take(&mut self) -> KeySequence {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }
}

/// Emits the longest bound prefix of `keys`, or the first key as unbound, and
/// returns the keys left over.
fn split_longest_bound(
    keymap: &Keymap,
    mode: Mode,
    keys: &KeySequence,
    feeds: &mut Vec<Feed>,
) -> VecDeque<Key> {
    let keys = keys.keys();
    let Some(&first) = keys.first() else {
        return VecDeque::new();
    };

    let bound = (1..=keys.len())
        .rev()
        .find(|&n| keymap.get(mode, &KeySequence::from(&keys[..n])).is_some());
    let used = match bound {
        Some(n) => {
            feeds.push(Feed::Complete(KeySequence::from(&keys[..n])));
            n
        }
        None => {
            feeds.push(Feed::Unbound(first));
            1
        }
    };
    keys[used..].iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(notation: &str) -> KeySequence {
        KeySequence::parse(notation, " ").unwrap()
    }

    fn command(line: &str) -> Option<Action> {
        Some(Action::command(line))
    }

    #[test]
    fn last_binding_wins() {
        let mut keymap = Keymap::new();
        let first = keymap.bind(
            Mode::Normal,
            seq("<leader>e"),
            command("First"),
            BindOptions::default(),
        );
        assert!(first.is_none());
        let previous = keymap.bind(
            Mode::Normal,
            seq("<leader>e"),
            Some(Action::command("Second")),
            BindOptions::default(),
        );

        let previous = previous.and_then(|b| b.action);
        assert!(matches!(previous, Some(Action::Command(line)) if line == "First"));
        let current = keymap.get(Mode::Normal, &seq("<leader>e")).unwrap();
        assert!(matches!(&current.action, Some(Action::Command(line)) if line == "Second"));
        assert_eq!(keymap.len(), 1);
    }

    #[test]
    fn modes_are_separate_scopes() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("gc"), command("A"), BindOptions::default());
        keymap.bind(Mode::Visual, seq("gc"), command("B"), BindOptions::default());

        assert_eq!(keymap.len(), 2);
        assert_eq!(keymap.bindings(Mode::Visual).len(), 1);
        assert_eq!(keymap.lookup(Mode::Insert, &seq("gc")), Lookup::None);
    }

    #[test]
    fn lookup_reports_prefixes() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("gd"), command("Def"), BindOptions::default());
        keymap.bind(Mode::Normal, seq("g"), command("G"), BindOptions::default());

        assert_eq!(keymap.lookup(Mode::Normal, &seq("gd")), Lookup::Exact);
        assert_eq!(keymap.lookup(Mode::Normal, &seq("g")), Lookup::ExactOrLonger);
        keymap.unbind(Mode::Normal, &seq("g"));
        assert_eq!(keymap.lookup(Mode::Normal, &seq("g")), Lookup::Prefix);
        assert_eq!(keymap.lookup(Mode::Normal, &seq("x")), Lookup::None);
    }

    #[test]
    fn dispatcher_waits_for_complete_sequence() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("<leader>ff"), command("Find"), BindOptions::default());
        let mut dispatcher = KeyDispatcher::new(Duration::from_millis(500));
        let now = Instant::now();

        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char(' '), now).is_empty());
        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char('f'), now).is_empty());
        assert_eq!(
            dispatcher.feed(&keymap, Mode::Normal, Key::char('f'), now),
            vec![Feed::Complete(seq("<leader>ff"))]
        );
        assert!(dispatcher.pending().is_empty());

        assert_eq!(
            dispatcher.feed(&keymap, Mode::Normal, Key::char('x'), now),
            vec![Feed::Unbound(Key::char('x'))]
        );
    }

    #[test]
    fn mismatch_fires_longest_bound_prefix_and_keeps_the_key() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("g"), command("G"), BindOptions::default());
        keymap.bind(Mode::Normal, seq("gd"), command("Def"), BindOptions::default());
        let mut dispatcher = KeyDispatcher::new(Duration::from_millis(500));
        let now = Instant::now();

        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char('g'), now).is_empty());
        assert_eq!(
            dispatcher.feed(&keymap, Mode::Normal, Key::char('x'), now),
            vec![Feed::Complete(seq("g")), Feed::Unbound(Key::char('x'))]
        );
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn unmatched_prefix_releases_every_key() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("<leader>e"), command("Tree"), BindOptions::default());
        let mut dispatcher = KeyDispatcher::new(Duration::from_millis(500));
        let now = Instant::now();

        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char(' '), now).is_empty());
        assert_eq!(
            dispatcher.feed(&keymap, Mode::Normal, Key::char(':'), now),
            vec![Feed::Unbound(Key::char(' ')), Feed::Unbound(Key::char(':'))]
        );
    }

    #[test]
    fn leftover_keys_can_start_a_new_sequence() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("g"), command("G"), BindOptions::default());
        keymap.bind(Mode::Normal, seq("gx"), command("Open"), BindOptions::default());
        keymap.bind(Mode::Normal, seq("dd"), command("Delete"), BindOptions::default());
        let mut dispatcher = KeyDispatcher::new(Duration::from_millis(500));
        let now = Instant::now();

        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char('g'), now).is_empty());
        assert_eq!(
            dispatcher.feed(&keymap, Mode::Normal, Key::char('d'), now),
            vec![Feed::Complete(seq("g"))]
        );
        assert_eq!(dispatcher.pending(), &seq("d"));
        assert_eq!(
            dispatcher.feed(&keymap, Mode::Normal, Key::char('d'), now),
            vec![Feed::Complete(seq("dd"))]
        );
    }

    #[test]
    fn timeout_fires_shorter_binding() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("g"), command("G"), BindOptions::default());
        keymap.bind(Mode::Normal, seq("gd"), command("Def"), BindOptions::default());
        let mut dispatcher = KeyDispatcher::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char('g'), start).is_empty());
        assert!(dispatcher.expire(&keymap, Mode::Normal, start).is_empty());
        assert_eq!(
            dispatcher.expire(&keymap, Mode::Normal, start + Duration::from_millis(150)),
            vec![Feed::Complete(seq("g"))]
        );
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn reset_drops_pending_keys() {
        let mut keymap = Keymap::new();
        keymap.bind(Mode::Normal, seq("gd"), command("Def"), BindOptions::default());
        let mut dispatcher = KeyDispatcher::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(dispatcher.feed(&keymap, Mode::Normal, Key::char('g'), start).is_empty());
        dispatcher.reset();
        assert!(dispatcher.pending().is_empty());
        let later = start + Duration::from_millis(150);
        assert!(dispatcher.expire(&keymap, Mode::Normal, later).is_empty());
    }
}
