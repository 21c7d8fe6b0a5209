use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use lazydeck::command::{Invocation, handler};
use lazydeck::keymap::{Action, Feed, KeyDispatcher};
use lazydeck::model::config::expand_tilde;
use lazydeck::model::keys::{Key, KeySequence};
use lazydeck::model::mode::Mode;
use lazydeck::plugin::PluginState;
use lazydeck::session::Session;

use crate::msg::Msg;

const MAX_NOTIFICATIONS: usize = 8;

/// Host commands. They are also defined on the session so key mappings reach them.
const BUILTINS: &[&str] = &[
    "help",
    "plugins",
    "pl",
    "plugins.list",
    "pl.list",
    "plugins.errors",
    "pl.errors",
    "e",
    "edit",
    "doautocmd",
    "q",
    "quit",
];

pub struct App {
    pub mode: Mode,
    pub session: Session,
    dispatcher: KeyDispatcher,
    command_input: String,
    pub should_quit: bool,
    pub event_tx: mpsc::Sender<Msg>,
    pub notifications: VecDeque<String>,
    current_file: Option<PathBuf>,
    ui_entered: bool,
    very_lazy_fired: bool,
}

impl App {
    /// `session` must already be started.
    pub fn new(mut session: Session, key_timeout: Duration, event_tx: mpsc::Sender<Msg>) -> Self {
        let notifications = VecDeque::from(session.drain_notifications());

        for &name in BUILTINS {
            let tx = event_tx.clone();
            session.define_command(
                name,
                handler(move |invocation| {
                    tx.send(Msg::Builtin(invocation.clone()))
                        .map_err(|_| anyhow::anyhow!("host event loop closed"))?;
                    Ok(None)
                }),
            );
        }

        let mut app = Self {
            mode: Mode::Normal,
            session,
            dispatcher: KeyDispatcher::new(key_timeout),
            command_input: String::new(),
            should_quit: false,
            event_tx,
            notifications,
            current_file: None,
            ui_entered: false,
            very_lazy_fired: false,
        };
        app.trim_notifications();
        app
    }

    // ── MVU: Update ──────────────────────────────────────────────

    pub fn update(&mut self, msg: Msg) -> Result<()> {
        match msg {
            Msg::Key(key) => self.handle_key(key),
            Msg::Event(name) => {
                if name == "UIEnter" {
                    self.ui_entered = true;
                }
                self.fire(&name);
            }
            Msg::OpenFile(path) => self.open_file(path),
            Msg::Command(line) => self.handle_command(&line),
            Msg::Builtin(invocation) => self.run_builtin(&invocation),
            Msg::Tick => self.handle_tick(),
            Msg::Resize(_w, _h) => {}
        }

        self.sync_notifications();
        Ok(())
    }

    fn handle_command(&mut self, line: &str) {
        let Some(invocation) = Invocation::parse(line) else {
            return;
        };

        if BUILTINS.contains(&invocation.name.as_str()) {
            self.run_builtin(&invocation);
        } else if let Err(err) = self.session.execute(line) {
            self.push_notification(err.to_string());
        }
    }

    fn run_builtin(&mut self, invocation: &Invocation) {
        let rest = invocation.args.join(" ");
        match invocation.name.as_str() {
            "help" => {
                let mut notes = vec!["built-ins:".to_string()];
                notes.push("  help".to_string());
                notes.push("  plugins (alias: pl)".to_string());
                notes.push("  plugins.list (alias: pl.list)".to_string());
                notes.push("  plugins.errors (alias: pl.errors)".to_string());
                notes.push("  e <path>".to_string());
                notes.push("  doautocmd <Event>".to_string());
                notes.push("  q / quit".to_string());
                let names: Vec<&str> = self
                    .session
                    .commands()
                    .names()
                    .into_iter()
                    .filter(|name| !BUILTINS.contains(name))
                    .collect();
                if !names.is_empty() {
                    notes.push(format!("commands: {}", names.join(", ")));
                }
                self.push_all(notes);
            }
            "plugins" | "pl" => {
                let summary = self.session.summary();
                self.push_notification(summary);
            }
            "plugins.list" | "pl.list" => {
                let rows = self.session.list_rows();
                self.push_all(rows);
            }
            "plugins.errors" | "pl.errors" => {
                let errors = self.session.error_rows();
                if errors.is_empty() {
                    self.push_notification("plugins: no errors".to_string());
                } else {
                    self.push_all(errors);
                }
            }
            "e" | "edit" => {
                if rest.is_empty() {
                    self.push_notification("usage: e <path>".to_string());
                } else {
                    self.open_file(expand_tilde(std::path::Path::new(&rest)));
                }
            }
            "doautocmd" => {
                if rest.is_empty() {
                    self.push_notification("usage: doautocmd <Event>".to_string());
                } else {
                    self.fire(&rest);
                }
            }
            "q" | "quit" => self.should_quit = true,
            other => tracing::warn!(command = other, "not a built-in command"),
        }
    }

    fn fire(&mut self, event: &str) {
        match self.session.fire_event(event) {
            Ok(activated) => {
                tracing::debug!(event, activated = activated.len(), "event fired");
            }
            Err(err) => self.push_notification(err.to_string()),
        }
    }

    fn open_file(&mut self, path: PathBuf) {
        match self.session.open_buffer(&path) {
            Ok(_) => {
                self.push_notification(format!("opened {}", path.display()));
                self.current_file = Some(path);
            }
            Err(err) => self.push_notification(err.to_string()),
        }
    }

    fn handle_tick(&mut self) {
        let mode = self.mode;
        let feeds = self
            .dispatcher
            .expire(self.session.keymap(), mode, Instant::now());
        self.run_feeds(mode, feeds);

        // VeryLazy waits until the UI has been drawn once.
        if self.ui_entered && !self.very_lazy_fired {
            self.very_lazy_fired = true;
            self.fire("VeryLazy");
        }
    }

    fn sync_notifications(&mut self) {
        for message in self.session.drain_notifications() {
            self.push_notification(message);
        }
    }

    fn push_all(&mut self, messages: Vec<String>) {
        for message in messages {
            self.push_notification(message);
        }
    }

    fn push_notification(&mut self, message: String) {
        self.notifications.push_back(message);
        self.trim_notifications();
    }

    fn trim_notifications(&mut self) {
        while self.notifications.len() > MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if self.mode == Mode::Command {
            self.handle_key_command(key);
            return;
        }

        let mode = self.mode;
        let feeds = self.dispatcher.feed(
            self.session.keymap(),
            mode,
            Key::from_event(key),
            Instant::now(),
        );
        self.run_feeds(mode, feeds);
    }

    /// Bound sequences run in the mode they were typed in. Unbound keys fall
    /// through to the built-in keys of the current mode.
    fn run_feeds(&mut self, mode: Mode, feeds: Vec<Feed>) {
        for feed in feeds {
            match feed {
                Feed::Complete(sequence) => self.dispatch(mode, sequence),
                Feed::Unbound(key) if self.mode == Mode::Command => {
                    self.handle_key_command(KeyEvent::new(key.code, key.modifiers));
                }
                Feed::Unbound(key) => self.handle_builtin_key(key),
            }
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            self.mode = mode;
            self.dispatcher.reset();
        }
    }

    /// Mode switches for keys the user has not mapped.
    fn handle_builtin_key(&mut self, key: Key) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if key.code == KeyCode::Char('c') {
                self.should_quit = true;
            }
            return;
        }

        match (self.mode, key.code) {
            (_, KeyCode::Esc) => self.set_mode(Mode::Normal),
            (Mode::Normal, KeyCode::Char(':')) => {
                self.set_mode(Mode::Command);
                self.command_input.clear();
            }
            (Mode::Normal, KeyCode::Char('i')) => self.set_mode(Mode::Insert),
            (Mode::Normal, KeyCode::Char('v')) => self.set_mode(Mode::Visual),
            _ => {}
        }
    }

    fn dispatch(&mut self, mode: Mode, sequence: KeySequence) {
        if let Err(err) = self.session.dispatch_keys(mode, &sequence) {
            self.push_notification(err.to_string());
        }
    }

    fn handle_key_command(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.set_mode(Mode::Normal);
                self.command_input.clear();
            }
            KeyCode::Enter => {
                let command = self.command_input.trim().to_string();
                self.set_mode(Mode::Normal);
                self.command_input.clear();

                if !command.is_empty() {
                    let _ = self.event_tx.send(Msg::Command(command));
                }
            }
            KeyCode::Tab => {
                if let Some(completed) = self.complete_command() {
                    self.command_input = completed;
                }
            }
            KeyCode::Backspace => {
                self.command_input.pop();
            }
            KeyCode::Char(ch)
                if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT =>
            {
                self.command_input.push(ch);
            }
            _ => {}
        }
    }

    /// Fuzzy-completes the command name under the cursor.
    fn complete_command(&self) -> Option<String> {
        let input = self.command_input.trim_start();
        if input.is_empty() || input.contains(char::is_whitespace) {
            return None;
        }

        let matcher = SkimMatcherV2::default();
        self.session
            .commands()
            .names()
            .into_iter()
            .filter_map(|name| matcher.fuzzy_match(name, input).map(|score| (score, name)))
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.len().cmp(&a.1.len())))
            .map(|(_, name)| format!("{name} "))
    }

    // ── MVU: View ────────────────────────────────────────────────

    pub fn view(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // body
                Constraint::Length(1), // status bar
            ])
            .split(frame.area());

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[0]);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(body[1]);

        self.render_plugins(frame, body[0]);
        self.render_keymaps(frame, right[0]);
        self.render_notifications(frame, right[1]);
        self.render_status_bar(frame, chunks[1]);

        if self.mode == Mode::Command {
            self.render_command_overlay(frame);
        }
    }

    fn render_plugins(&self, frame: &mut Frame, area: Rect) {
        let lines: Vec<Line> = if self.session.plugins().next().is_none() {
            vec![Line::from(Span::styled(
                "No plugins configured",
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            self.session
                .plugins()
                .map(|plugin| {
                    let color = match plugin.state {
                        PluginState::Active => Color::Green,
                        PluginState::Materializing => Color::Yellow,
                        PluginState::Failed(_) => Color::Red,
                        PluginState::Registered => Color::DarkGray,
                    };
                    Line::from(vec![
                        Span::styled("● ", Style::default().fg(color)),
                        Span::styled(
                            plugin.id.to_string(),
                            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(
                            format!("  {}  ", plugin.state.label()),
                            Style::default().fg(color),
                        ),
                        Span::styled(
                            plugin.activation.to_string(),
                            Style::default().fg(Color::Gray),
                        ),
                    ])
                })
                .collect()
        };

        let panel = Paragraph::new(lines).block(
            Block::default()
                .title(" Plugins ")
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Rgb(15, 15, 24))),
        );
        frame.render_widget(panel, area);
    }

    fn render_keymaps(&self, frame: &mut Frame, area: Rect) {
        let lines: Vec<Line> = self
            .session
            .keymap()
            .bindings(self.mode)
            .into_iter()
            .map(|binding| {
                let target = match (&binding.desc, &binding.action) {
                    (Some(desc), _) => desc.clone(),
                    (None, Some(Action::Command(line))) => line.clone(),
                    (None, Some(Action::Callback(_))) => "<callback>".to_string(),
                    (None, None) => "<lazy>".to_string(),
                };
                let owner = binding
                    .owner
                    .as_ref()
                    .map(|id| format!("  ({})", id.short_name()))
                    .unwrap_or_default();
                Line::from(vec![
                    Span::styled(
                        format!("{:<12}", binding.sequence.to_string()),
                        Style::default().fg(Color::Cyan),
                    ),
                    Span::raw(target),
                    Span::styled(owner, Style::default().fg(Color::DarkGray)),
                ])
            })
            .collect();

        let panel = Paragraph::new(lines).block(
            Block::default()
                .title(format!(" Keymaps ({}) ", self.mode.label().to_lowercase()))
                .borders(Borders::ALL),
        );
        frame.render_widget(panel, area);
    }

    fn render_notifications(&self, frame: &mut Frame, area: Rect) {
        let lines: Vec<Line> = self
            .notifications
            .iter()
            .map(|message| {
                Line::from(Span::styled(message.clone(), Style::default().fg(Color::Gray)))
            })
            .collect();

        let panel = Paragraph::new(lines)
            .block(Block::default().title(" Messages ").borders(Borders::ALL));
        frame.render_widget(panel, area);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let mode_style = match self.mode {
            Mode::Normal => Style::default()
                .fg(Color::Black)
                .bg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
            Mode::Insert => Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
            _ => Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        };

        let mode_span = Span::styled(format!(" {} ", self.mode.label()), mode_style);

        let file_name = self
            .current_file
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "[no file]".to_string());

        let pending = self.dispatcher.pending();
        let pending = if pending.is_empty() {
            String::new()
        } else {
            format!(" | {pending}")
        };

        let info = Span::styled(
            format!(" {file_name}  {}{pending} ", self.session.summary()),
            Style::default().fg(Color::Gray).bg(Color::DarkGray),
        );

        let bar = Line::from(vec![mode_span, info]);
        let status = Paragraph::new(bar).style(Style::default().bg(Color::DarkGray));
        frame.render_widget(status, area);
    }

    fn render_command_overlay(&self, frame: &mut Frame) {
        let area = centered_rect(70, 20, frame.area());
        frame.render_widget(Clear, area);

        let prompt = Paragraph::new(format!(":{}", self.command_input)).block(
            Block::default()
                .title(" Command ")
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Rgb(15, 15, 24))),
        );
        frame.render_widget(prompt, area);

        let cursor_x = area.x + 2 + self.command_input.len() as u16;
        let cursor_y = area.y + 1;
        frame.set_cursor_position((cursor_x, cursor_y));
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
