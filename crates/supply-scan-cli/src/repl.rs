//! Interactive REPL driving a live scan session.
//!
//! Launch with `supply-scan repl [--frames DIR]`.
//! Type `/help` for available commands, Tab for completion.

use std::path::Path;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};

use tokio::sync::watch;

use supply_scan::frame::is_supported_format;
use supply_scan::{Artifact, Command, ControllerHandle, SessionSnapshot};

use crate::runner::render_snapshot;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/activate", "Start the camera"),
    ("/pause", "Pause the camera and release it"),
    ("/resume", "Resume a paused camera"),
    ("/toggle", "Camera button: start, pause, resume or retry"),
    ("/retry", "Retry after a camera failure"),
    ("/upload", "Attach a label image for verification"),
    ("/clear", "Remove the attached image"),
    ("/verify", "Verify the scanned code or attached image"),
    ("/reset", "Start a fresh session"),
    ("/status", "Show the current session"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion.
#[derive(Default)]
struct ScanHelper;

impl Completer for ScanHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        // The rest of the line is one path, spaces included.
        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        if cmd == "/upload" {
            let start = input.len() - args.trim_start().len();
            let matches = complete_image_path(args.trim_start())
                .into_iter()
                .map(|path| {
                    let name = path.trim_end_matches('/');
                    let display = name.rsplit('/').next().unwrap_or(name).to_string();
                    Pair {
                        display,
                        replacement: path,
                    }
                })
                .collect();
            return Ok((start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

/// Complete a partially typed image path.
///
/// Directories come back with a trailing `/` so completion can descend.
pub fn complete_image_path(partial: &str) -> Vec<String> {
    let (dir, prefix) = match partial.rfind('/') {
        Some(idx) => (&partial[..=idx], &partial[idx + 1..]),
        None => ("", partial),
    };
    let read_from = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
    let Ok(entries) = std::fs::read_dir(read_from) else {
        return Vec::new();
    };

    let mut found: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            if !name.starts_with(prefix) || (prefix.is_empty() && name.starts_with('.')) {
                return None;
            }
            let path = entry.path();
            if path.is_dir() {
                Some(format!("{dir}{name}/"))
            } else if is_supported_format(&path) {
                Some(format!("{dir}{name}"))
            } else {
                None
            }
        })
        .collect();
    found.sort();
    found
}

impl Hinter for ScanHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for ScanHelper {}
impl Validator for ScanHelper {}
impl Helper for ScanHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Map a REPL line to a controller command.
///
/// `Ok(None)` means the line is not a controller command.
pub fn parse_command(cmd: &str, args: &str) -> Result<Option<Command>, String> {
    let command = match cmd {
        "activate" | "start" => Command::Activate,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "toggle" => Command::ToggleCamera,
        "retry" => Command::Retry,
        "clear" => Command::ClearArtifact,
        "verify" => Command::Verify,
        "reset" => Command::Reset,
        "upload" => {
            let path = args.trim().trim_matches(|c| c == '"' || c == '\'');
            if path.is_empty() {
                return Err("Usage: /upload <image file>".to_string());
            }
            let artifact = Artifact::from_file(Path::new(path))
                .map_err(|e| format!("Cannot read {path}: {e}"))?;
            Command::SupplyArtifact(artifact)
        }
        _ => return Ok(None),
    };
    Ok(Some(command))
}

/// Run the interactive REPL against a spawned controller.
///
/// Blocks the calling thread; run it off the async runtime.
pub fn run(handle: ControllerHandle, camera_name: &str) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1msupply-scan v{}\x1b[0m \x1b[90m({camera_name})\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<ScanHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(ScanHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let hist_path = crate::config::home_dir().join(".supply_scan_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mscan>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                match cmd {
                    "exit" | "quit" => break,
                    "help" | "h" | "?" => cmd_help(),
                    "status" => cmd_status(&handle.snapshot()),
                    _ => match parse_command(cmd, args.trim()) {
                        Ok(Some(command)) => {
                            if handle.send_blocking(command).is_err() {
                                eprintln!("  Session ended.");
                                break;
                            }
                        }
                        Ok(None) => {
                            eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                        }
                        Err(msg) => eprintln!("  {msg}"),
                    },
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    eprintln!("  Goodbye!");
    let _ = handle.send_blocking(Command::Unmount);

    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

/// Print camera and verification changes as they happen.
pub async fn watch_transitions(mut rx: watch::Receiver<SessionSnapshot>) {
    let mut last = rx.borrow_and_update().clone();
    while rx.changed().await.is_ok() {
        let next = rx.borrow_and_update().clone();
        if next.camera != last.camera {
            eprintln!("\r  \x1b[90mcamera\x1b[0m {} -> {}", last.camera, next.camera);
        }
        if next.decoded_payload != last.decoded_payload {
            if let Some(payload) = &next.decoded_payload {
                eprintln!("\r  \x1b[90mscanned\x1b[0m {payload}");
            }
        }
        if next.verification != last.verification {
            eprintln!(
                "\r  \x1b[90mverification\x1b[0m {} -> {}",
                last.verification, next.verification
            );
        }
        if next.last_error != last.last_error {
            if let Some(err) = &next.last_error {
                eprintln!("\r  \x1b[31merror\x1b[0m {err}");
            }
        }
        last = next;
    }
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands and image files.");
    eprintln!();
}

fn cmd_status(snapshot: &SessionSnapshot) {
    eprintln!();
    for line in render_snapshot(snapshot).lines() {
        eprintln!("  {line}");
    }
    eprintln!("  Can verify:   {}", if snapshot.can_verify { "yes" } else { "no" });
    eprintln!();
}
