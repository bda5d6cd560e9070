//! framekeeperd - interactive camera capture session
//!
//! Drives the session workflow from a terminal:
//! 1. Sign up or log in against the credential store
//! 2. Open the configured camera (pull or push, by URL scheme)
//! 3. Run the live feed, capture stills, browse and delete the gallery
//!
//! The live feed loop runs until the stream ends or Ctrl-C; the camera
//! stays marked open afterwards until `close` or `logout`.

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use framekeeper::{App, Delivery, FramekeeperConfig, Session, SessionError};

#[derive(Parser)]
#[command(
    name = "framekeeperd",
    version,
    about = "Authenticated camera capture with a local image catalog"
)]
struct Args {
    /// Path to a JSON config file (defaults to $FRAMEKEEPER_CONFIG).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = FramekeeperConfig::load(args.config.as_deref())?;
    log::info!(
        "catalog db at {}, captures under {}",
        config.db_path,
        config.capture_dir.display()
    );
    log::info!("camera endpoint: {}", config.camera.url);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let app = App::open(config)?;
    run(&app, &interrupted)
}

fn run(app: &App, interrupted: &Arc<AtomicBool>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut session: Option<Session> = None;

    println!("framekeeperd ready; type 'help' for commands");
    loop {
        match &session {
            Some(s) => prompt(&format!("{}> ", s.username()))?,
            None => prompt("framekeeper> ")?,
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let argument = words.next();

        match command {
            "help" => print_help(session.is_some()),
            "quit" => break,
            "signup" => {
                if session.is_some() {
                    println!("already logged in; logout first");
                    continue;
                }
                let Some(username) = argument else {
                    println!("usage: signup <username>");
                    continue;
                };
                let mut password = read_password(&mut lines)?;
                report(
                    app.sign_up(username, &password)
                        .map(|_| "account created; log in to continue".to_string()),
                );
                password.zeroize();
            }
            "login" => {
                if session.is_some() {
                    println!("already logged in; logout first");
                    continue;
                }
                let Some(username) = argument else {
                    println!("usage: login <username>");
                    continue;
                };
                let mut password = read_password(&mut lines)?;
                match app.login(username, &password) {
                    Ok(s) => {
                        println!(
                            "logged in as '{}'; {} captured image(s)",
                            s.username(),
                            s.entries().len()
                        );
                        session = Some(s);
                    }
                    Err(e) => println!("{}", e),
                }
                password.zeroize();
            }
            "logout" => match session.take() {
                Some(s) => {
                    s.logout();
                    println!("logged out");
                }
                None => println!("not logged in"),
            },
            "open" | "feed" | "capture" | "list" | "delete" | "close" => {
                let Some(s) = session.as_mut() else {
                    println!("log in first; type 'help'");
                    continue;
                };
                dispatch(s, command, argument, interrupted);
            }
            _ => println!("unknown command '{}'; type 'help'", command),
        }
    }

    if let Some(s) = session.take() {
        s.logout();
    }
    Ok(())
}

fn dispatch(session: &mut Session, command: &str, argument: Option<&str>, interrupted: &Arc<AtomicBool>) {
    match command {
        "open" => report(session.open_camera().map(|_| "camera open".to_string())),
        "feed" => run_feed(session, interrupted),
        "capture" => report(
            session
                .capture()
                .map(|path| format!("captured {}", path.display())),
        ),
        "list" => {
            if session.entries().is_empty() {
                println!("no captured images");
            }
            for entry in session.entries() {
                println!("  [{}] {}", entry.id, entry.file_path);
            }
        }
        "delete" => {
            let Some(id) = argument.and_then(|raw| raw.parse::<i64>().ok()) else {
                println!("usage: delete <id>");
                return;
            };
            match session.delete(id) {
                Ok(true) => println!("deleted [{}]", id),
                Ok(false) => println!("no image [{}] in your catalog", id),
                Err(e) => println!("{}", e),
            }
        }
        "close" => {
            session.close_camera();
            println!("camera closed");
        }
        _ => unreachable!("dispatch called with unhandled command"),
    }
}

/// Blocking read-publish-report loop for the pull variant; passive watch
/// loop for the push variant. Both end on Ctrl-C; the pull loop also ends
/// when the stream fails, leaving the camera marked open.
fn run_feed(session: &mut Session, interrupted: &Arc<AtomicBool>) {
    let Some(delivery) = session.delivery() else {
        println!("open the camera first");
        return;
    };
    interrupted.store(false, Ordering::SeqCst);
    println!("live feed running; press Ctrl-C to return to the prompt");

    let mut last_report = Instant::now();
    match delivery {
        Delivery::Pull => loop {
            if interrupted.load(Ordering::SeqCst) {
                break;
            }
            match session.read_live_frame() {
                Ok(frame) => {
                    if last_report.elapsed() >= Duration::from_secs(1) {
                        let frames = session
                            .camera_stats()
                            .map(|stats| stats.frames_captured)
                            .unwrap_or(0);
                        println!(
                            "live {}x{} ({} frames)",
                            frame.width(),
                            frame.height(),
                            frames
                        );
                        last_report = Instant::now();
                    }
                }
                Err(SessionError::Stream(message)) => {
                    log::warn!("{}", message);
                    break;
                }
                Err(e) => {
                    log::warn!("{}", e);
                    break;
                }
            }
        },
        Delivery::Push => {
            let mut seen = 0u64;
            loop {
                if interrupted.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
                let frames = session
                    .camera_stats()
                    .map(|stats| stats.frames_captured)
                    .unwrap_or(0);
                if frames != seen {
                    seen = frames;
                    if let Some(frame) = session.current_frame() {
                        println!(
                            "live {}x{} ({} frames)",
                            frame.width(),
                            frame.height(),
                            frames
                        );
                    }
                }
            }
        }
    }
}

fn read_password(lines: &mut impl Iterator<Item = std::io::Result<String>>) -> Result<String> {
    prompt("password: ")?;
    match lines.next() {
        Some(line) => Ok(line?),
        None => Ok(String::new()),
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(())
}

fn report(result: Result<String, SessionError>) {
    match result {
        Ok(message) => println!("{}", message),
        Err(e) => println!("{}", e),
    }
}

fn print_help(logged_in: bool) {
    if logged_in {
        println!("commands: open feed capture list delete <id> close logout quit");
    } else {
        println!("commands: signup <username>, login <username>, quit");
    }
}
