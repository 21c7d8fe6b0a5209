mod app;
mod msg;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing_subscriber::EnvFilter;

use app::App;
use lazydeck::model::config::AppConfig;
use lazydeck::plugin::DirectoryHost;
use lazydeck::plugin::installer::BuildLedger;
use lazydeck::session::Session;
use msg::Msg;

fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize logging to file (never stdout)
    let log_dir = config.state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "lazydeck.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_filter));
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    tracing::info!("lazydeck starting");

    // Configuration errors abort before the terminal is touched.
    let ledger = BuildLedger::open(config.ledger_path()).context("opening build ledger")?;
    let host = DirectoryHost::new(config.plugin_dir());
    let mut session = Session::from_config(&config, host)?.with_ledger(ledger);
    session.startup()?;

    let initial_file = std::env::args_os().nth(1).map(PathBuf::from);

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, session, &config, initial_file);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        tracing::error!("fatal: {e:?}");
        eprintln!("lazydeck error: {e:?}");
    }

    Ok(())
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: Session,
    config: &AppConfig,
    initial_file: Option<PathBuf>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Msg>();
    let key_timeout = Duration::from_millis(config.general.timeout_ms);
    let mut app = App::new(session, key_timeout, tx.clone());

    app.update(Msg::Event("VimEnter".to_string()))?;
    if let Some(path) = initial_file {
        app.update(Msg::OpenFile(path))?;
    }

    // Input thread: reads terminal events and forwards as Msg
    let tx_input = tx.clone();
    thread::spawn(move || {
        loop {
            if let Ok(event) = event::read() {
                let msg = match event {
                    Event::Key(k) => Msg::Key(k),
                    Event::Resize(w, h) => Msg::Resize(w, h),
                    _ => continue,
                };
                if tx_input.send(msg).is_err() {
                    break;
                }
            }
        }
    });

    // Tick thread: drives key-sequence timeouts and deferred events
    let tx_tick = tx.clone();
    thread::spawn(move || {
        loop {
            thread::sleep(Duration::from_millis(50));
            if tx_tick.send(Msg::Tick).is_err() {
                break;
            }
        }
    });

    terminal.draw(|f| app.view(f))?;
    app.update(Msg::Event("UIEnter".to_string()))?;

    // ── Main event loop ──
    loop {
        // Batch-drain all pending messages
        let first = rx.recv()?;
        app.update(first)?;

        while let Ok(msg) = rx.try_recv() {
            app.update(msg)?;
        }

        if app.should_quit {
            break;
        }

        terminal.draw(|f| app.view(f))?;
    }

    tracing::info!("lazydeck exiting");
    Ok(())
}
