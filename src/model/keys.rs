use std::fmt;
use std::sync::LazyLock;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use regex::Regex;
use smallvec::SmallVec;

use crate::error::{Error, Result};

static KEY_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<([^<>\s]+)>|.").expect("valid key token regex"));

/// A single key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl Key {
    pub fn new(code: KeyCode, modifiers: KeyModifiers) -> Self {
        Self { code, modifiers }
    }

    pub fn char(ch: char) -> Self {
        Self::new(KeyCode::Char(ch), KeyModifiers::NONE)
    }

    /// Normalizes a terminal event so it compares equal to parsed notation.
    /// Shift is already folded into the character for printable keys.
    pub fn from_event(event: KeyEvent) -> Self {
        let mut modifiers =
            event.modifiers & (KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SHIFT);
        if matches!(event.code, KeyCode::Char(_)) {
            modifiers.remove(KeyModifiers::SHIFT);
        }
        Self::new(event.code, modifiers)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.code {
            KeyCode::Char(' ') => "Space".to_string(),
            KeyCode::Char('<') => "lt".to_string(),
            KeyCode::Char(ch) => ch.to_string(),
            KeyCode::Enter => "CR".to_string(),
            KeyCode::Esc => "Esc".to_string(),
            KeyCode::Tab | KeyCode::BackTab => "Tab".to_string(),
            KeyCode::Backspace => "BS".to_string(),
            KeyCode::Delete => "Del".to_string(),
            KeyCode::Up => "Up".to_string(),
            KeyCode::Down => "Down".to_string(),
            KeyCode::Left => "Left".to_string(),
            KeyCode::Right => "Right".to_string(),
            KeyCode::Home => "Home".to_string(),
            KeyCode::End => "End".to_string(),
            KeyCode::PageUp => "PageUp".to_string(),
            KeyCode::PageDown => "PageDown".to_string(),
            KeyCode::F(n) => format!("F{n}"),
            other => format!("{other:?}"),
        };

        let mut prefix = String::new();
        if self.modifiers.contains(KeyModifiers::CONTROL) {
            prefix.push_str("C-");
        }
        if self.modifiers.contains(KeyModifiers::ALT) {
            prefix.push_str("A-");
        }
        if self.modifiers.contains(KeyModifiers::SHIFT) || self.code == KeyCode::BackTab {
            prefix.push_str("S-");
        }

        let plain_char = matches!(self.code, KeyCode::Char(ch) if ch != ' ' && ch != '<');
        if prefix.is_empty() && plain_char {
            write!(f, "{name}")
        } else {
            write!(f, "<{prefix}{name}>")
        }
    }
}

/// An ordered run of key presses, e.g. `<leader>ff` or `gd`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeySequence(SmallVec<[Key; 4]>);

impl KeySequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses vim-style key notation, expanding `<leader>` to `leader`
    /// (itself given in key notation, e.g. `" "` or `"<Space>"` or `","`).
    pub fn parse(notation: &str, leader: &str) -> Result<Self> {
        let mut keys = SmallVec::new();
        for token in KEY_TOKEN_RE.captures_iter(notation) {
            let Some(inner) = token.get(1) else {
                let ch = token[0].chars().next().unwrap_or(' ');
                keys.push(Key::char(ch));
                continue;
            };

            if inner.as_str().eq_ignore_ascii_case("leader") {
                if leader.to_ascii_lowercase().contains("<leader>") {
                    return Err(invalid(notation, "leader is defined in terms of itself"));
                }
                keys.extend(Self::parse(leader, "")?.0);
                continue;
            }

            keys.push(parse_special(inner.as_str()).map_err(|reason| invalid(notation, &reason))?);
        }

        if keys.is_empty() {
            return Err(invalid(notation, "empty sequence"));
        }
        Ok(Self(keys))
    }

    pub fn push(&mut self, key: Key) {
        self.0.push(key);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_prefix_of(&self, other: &KeySequence) -> bool {
        self.len() < other.len() && other.0.starts_with(&self.0)
    }
}

impl From<&[Key]> for KeySequence {
    fn from(keys: &[Key]) -> Self {
        Self(keys.iter().copied().collect())
    }
}

impl fmt::Display for KeySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.0 {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

fn invalid(notation: &str, reason: &str) -> Error {
    Error::InvalidKeySequence {
        sequence: notation.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_special(token: &str) -> std::result::Result<Key, String> {
    let mut modifiers = KeyModifiers::NONE;
    let mut name = token;

    // Modifier prefixes: C-, A-, M-, S- (any order, case-insensitive).
    while name.len() > 2 && name.as_bytes()[1] == b'-' {
        match name.as_bytes()[0].to_ascii_uppercase() {
            b'C' => modifiers |= KeyModifiers::CONTROL,
            b'A' | b'M' => modifiers |= KeyModifiers::ALT,
            b'S' => modifiers |= KeyModifiers::SHIFT,
            _ => return Err(format!("unknown modifier in <{token}>")),
        }
        name = &name[2..];
    }

    let code = match name.to_ascii_lowercase().as_str() {
        "space" => KeyCode::Char(' '),
        "cr" | "enter" | "return" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" if modifiers.contains(KeyModifiers::SHIFT) => {
            modifiers.remove(KeyModifiers::SHIFT);
            KeyCode::BackTab
        }
        "tab" => KeyCode::Tab,
        "bs" | "backspace" => KeyCode::Backspace,
        "del" | "delete" => KeyCode::Delete,
        "lt" => KeyCode::Char('<'),
        "bar" => KeyCode::Char('|'),
        "bslash" => KeyCode::Char('\\'),
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        lower => {
            if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok())
                && (1..=12).contains(&n)
            {
                KeyCode::F(n)
            } else {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) if modifiers.is_empty() => {
                        return Err(format!("<{ch}> needs a modifier"));
                    }
                    (Some(ch), None) => {
                        // <C-S> means the same as <C-s> in vim.
                        if modifiers.contains(KeyModifiers::CONTROL) {
                            KeyCode::Char(ch.to_ascii_lowercase())
                        } else {
                            KeyCode::Char(ch)
                        }
                    }
                    _ => return Err(format!("unknown key <{token}>")),
                }
            }
        }
    };

    if let KeyCode::Char(_) = code {
        modifiers.remove(KeyModifiers::SHIFT);
    }

    Ok(Key::new(code, modifiers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_leader_and_plain_chars() {
        let seq = KeySequence::parse("<leader>ff", " ").unwrap();
        assert_eq!(seq.keys(), &[Key::char(' '), Key::char('f'), Key::char('f')]);
        assert_eq!(seq.to_string(), "<Space>ff");

        let seq = KeySequence::parse("<Leader>e", "<Space>").unwrap();
        assert_eq!(seq.keys(), &[Key::char(' '), Key::char('e')]);
    }

    #[test]
    fn parses_modifiers_and_named_keys() {
        let seq = KeySequence::parse("<C-s><A-x><CR><S-Tab>", "\\").unwrap();
        assert_eq!(
            seq.keys(),
            &[
                Key::new(KeyCode::Char('s'), KeyModifiers::CONTROL),
                Key::new(KeyCode::Char('x'), KeyModifiers::ALT),
                Key::new(KeyCode::Enter, KeyModifiers::NONE),
                Key::new(KeyCode::BackTab, KeyModifiers::NONE),
            ]
        );
        assert_eq!(seq.to_string(), "<C-s><A-x><CR><S-Tab>");
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!(matches!(
            KeySequence::parse("<Hyper-k>", " "),
            Err(Error::InvalidKeySequence { .. })
        ));
        assert!(KeySequence::parse("<nope>", " ").is_err());
        assert!(KeySequence::parse("", " ").is_err());
        assert!(KeySequence::parse("<leader>", "<leader>").is_err());
    }

    #[test]
    fn terminal_events_match_notation() {
        let event = KeyEvent::new(KeyCode::Char('G'), KeyModifiers::SHIFT);
        assert_eq!(Key::from_event(event), Key::char('G'));

        let event = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        let parsed = KeySequence::parse("<C-S>", " ").unwrap();
        assert_eq!(parsed.keys(), &[Key::from_event(event)]);
    }

    #[test]
    fn prefix_detection() {
        let g = KeySequence::parse("g", " ").unwrap();
        let gd = KeySequence::parse("gd", " ").unwrap();
        assert!(g.is_prefix_of(&gd));
        assert!(!gd.is_prefix_of(&g));
        assert!(!gd.is_prefix_of(&gd));
    }
}
