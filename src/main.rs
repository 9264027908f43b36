//! Vitaltone - audio alarm engine for a simulated patient monitor.

mod app;
mod audio;
mod channel;
mod cli;
mod config;
mod engine;
mod export;
mod logging;
mod mode;
mod models;
mod modulation;
#[cfg(feature = "playback")]
mod playback;
mod scenario;
mod scheduler;
mod ui;

use anyhow::{Context, Result, bail};
use app::App;
use cli::Args;
use config::Config;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use export::{LoggedEvent, RunSummary};
use logging::LogTarget;
use ratatui::{Terminal, backend::CrosstermBackend};
use scenario::{Drift, PatientState, Scenario};
use std::io;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if args.init_config {
        return init_config(&args);
    }

    let target = if args.batch {
        LogTarget::Stderr
    } else {
        LogTarget::File
    };
    let _log_guard = logging::init(target, args.verbose);

    let mut config = if let Some(ref path) = args.config {
        Config::load(path)?
    } else {
        Config::load_or_default()
    };
    args.apply_overrides(&mut config);

    if args.batch {
        run_batch(&args, &config).await
    } else {
        run_interactive(&args, &config).await
    }
}

/// Write the sample configuration file and exit.
fn init_config(args: &Args) -> Result<()> {
    let path = args
        .config
        .clone()
        .or_else(Config::default_config_path)
        .context("No configuration directory on this platform; pass --config")?;

    if path.exists() {
        bail!("{} already exists, not overwriting", path.display());
    }

    Config::write_sample(&path)?;
    println!("Wrote sample configuration to {}", path.display());
    Ok(())
}

/// Run headless for a fixed time, then print the event log.
async fn run_batch(args: &Args, config: &Config) -> Result<()> {
    let scenario = match args.script {
        Some(ref path) => Some(Scenario::load(path)?),
        None => None,
    };
    let duration = scenario
        .as_ref()
        .and_then(|s| s.duration)
        .unwrap_or(args.duration);

    let options = args.engine_options(config);
    let state = PatientState {
        vitals: options.vitals,
        rhythm: options.rhythm.clone(),
        muted: options.muted,
        settings: options.settings,
    };
    let bank = audio::build_bank(args.backend, false, config.timing.channel_timeout())?;

    let start = Instant::now();
    let until = start + duration;
    let (engine, mut events) = engine::spawn(options, bank, None);
    info!(duration = %humantime::format_duration(duration), "batch run started");

    let mut log = Vec::new();
    {
        let driver = async {
            match scenario {
                Some(ref scenario) => scenario.play(&engine, state, start).await,
                None if args.jitter > 0.0 => Drift::new(state.vitals, args.jitter).run(&engine, until).await,
                None => {}
            }
        };
        let deadline = time::sleep_until(until);
        tokio::pin!(driver, deadline);
        let mut driven = false;

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break,
                Some(event) = events.recv() => log.push(LoggedEvent::new(event, start.elapsed())),
                _ = &mut driver, if !driven => driven = true,
            }
        }
    }

    let final_mode = engine.mode();
    engine.shutdown().await;
    while let Ok(event) = events.try_recv() {
        log.push(LoggedEvent::new(event, start.elapsed()));
    }

    let summary = RunSummary::from_events(&log, duration, final_mode);
    print!("{}", export::export_events(&log, &summary, args.export));
    Ok(())
}

/// Run in interactive mode with TUI.
async fn run_interactive(args: &Args, config: &Config) -> Result<()> {
    let mut app = App::new(args, config)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    app.shutdown().await;
    result
}

/// Main application loop.
fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    // Short enough to show the beep flash
    let tick_rate = Duration::from_millis(30);

    loop {
        app.poll();
        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key_event(app, key.code, key.modifiers);
                }
            }
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Handle keyboard input.
fn handle_key_event(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
    // Close help overlay on any key
    if app.show_help {
        app.show_help = false;
        return;
    }

    match code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => app.quit(),

        // Vitals
        KeyCode::Up | KeyCode::Char('k') => app.heart_rate_up(),
        KeyCode::Down | KeyCode::Char('j') => app.heart_rate_down(),
        KeyCode::Right | KeyCode::Char('l') => app.spo2_up(),
        KeyCode::Left | KeyCode::Char('h') => app.spo2_down(),
        KeyCode::Char('0') => app.toggle_asystole(),
        KeyCode::Char('r') => app.next_rhythm(),
        KeyCode::Char('p') => app.drop_beats(),

        // Audio
        KeyCode::Char('m') => app.toggle_mute(),
        KeyCode::Char('s') => app.toggle_silence(),
        KeyCode::Char('t') => app.toggle_tone(),
        KeyCode::Char('b') => app.toggle_beeps(),
        KeyCode::Char(' ') => app.manual_beep(),
        KeyCode::Char('o') => app.manual_pulse_tone(),

        KeyCode::Char('?') => app.toggle_help(),

        _ => {}
    }
}
