//! CLI command handling
//!
//! Runs the interactive debugging loop and formats model notifications.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::Commands;
use crate::common::{config::Config, logging, paths, Error, Result};
use crate::dap::{Event, EventMessage, StackFrame};
use crate::model::{DebuggerModel, ScopeSnapshot};
use crate::service::{ControlOutcome, DebugService};
use crate::session::{AdapterSession, Session};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            file,
            adapter,
            breakpoints,
        } => run(&file, adapter.as_deref(), &breakpoints).await,
        Commands::Config => show_config(),
    }
}

/// A line typed at the debugger prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplCommand {
    Continue,
    Next,
    Step,
    Frames,
    Vars,
    Frame(i64),
    Break(u32),
    Clear(u32),
    Threads,
    Quit,
}

impl ReplCommand {
    fn parse(input: &str) -> std::result::Result<Self, String> {
        let mut words = input.split_whitespace();
        let command = words.next().unwrap_or_default();
        let arg = words.next();

        let parsed = match command {
            "continue" | "c" => Self::Continue,
            "next" | "n" => Self::Next,
            "step" | "s" => Self::Step,
            "frames" | "bt" => Self::Frames,
            "vars" | "v" => Self::Vars,
            "threads" => Self::Threads,
            "quit" | "q" => Self::Quit,
            "frame" => Self::Frame(number(arg, "frame id")?),
            "break" | "b" => Self::Break(number(arg, "line")?),
            "clear" => Self::Clear(number(arg, "line")?),
            other => return Err(format!("Unknown command '{}'", other)),
        };

        if words.next().is_some() {
            return Err(format!("Too many arguments to '{}'", command));
        }
        Ok(parsed)
    }
}

fn number<T: FromStr>(arg: Option<&str>, what: &str) -> std::result::Result<T, String> {
    let arg = arg.ok_or_else(|| format!("Missing {}", what))?;
    arg.parse()
        .map_err(|_| format!("Invalid {}: '{}'", what, arg))
}

async fn run(file: &Path, adapter: Option<&str>, breakpoints: &[u32]) -> Result<()> {
    let config = Config::load()?;
    let code = std::fs::read_to_string(file).map_err(|e| Error::FileRead {
        path: file.display().to_string(),
        error: e.to_string(),
    })?;

    let model = Arc::new(DebuggerModel::new());
    model.set_code(code.clone());
    for &line in breakpoints {
        model.breakpoints.add(line);
    }

    let session = Arc::new(AdapterSession::spawn(&config, adapter).await?);
    session.start().await?;

    let service = DebugService::new(model.clone(), config.threads.sentinel_thread_id);
    service.set_session(session.clone());

    let mut current_line = model.current_line_changed().subscribe();
    let mut lines_cleared = model.lines_cleared().subscribe();
    let mut events = service.event_message();

    println!("{} {}", "Debugging".green().bold(), file.display());
    match tokio::time::timeout(config.timeouts.event_wait(), service.launch(&code)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => println!("{} {}", "Launch:".red(), e),
        Err(_) => tracing::warn!(
            secs = config.timeouts.event_wait_secs,
            "Cell did not stop before the event wait elapsed"
        ),
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        tokio::select! {
            input = stdin.next_line() => {
                let Some(input) = input? else {
                    break;
                };
                let input = input.trim();
                if !input.is_empty() {
                    match ReplCommand::parse(input) {
                        Ok(ReplCommand::Quit) => break,
                        Ok(command) => execute(&service, &session, command).await,
                        Err(message) => println!("{}", message.red()),
                    }
                }
                prompt();
            }
            line = current_line.recv() => match line {
                Ok(line) => print_current_line(&model.code(), line),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            cleared = lines_cleared.recv() => match cleared {
                Ok(()) => println!("{}", "Running...".dimmed()),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(message) => {
                    if !print_event(&message) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Err(e) = session.client().disconnect(true).await {
        tracing::debug!(error = %e, "Disconnect failed");
    }
    service.dispose();
    Ok(())
}

async fn execute(service: &DebugService, session: &AdapterSession, command: ReplCommand) {
    let model = service.model();
    match command {
        ReplCommand::Continue => report(service.continue_thread(None).await),
        ReplCommand::Next => report(service.next(None).await),
        ReplCommand::Step => report(service.step_in(None).await),
        ReplCommand::Frames => {
            print_frames(&model.callstack.frames(), model.callstack.current_frame())
        }
        ReplCommand::Vars => print_scopes(&model.variables.scopes()),
        ReplCommand::Frame(id) => match model.callstack.select_frame(id) {
            Some(frame) => println!("Selected frame {} {} line {}", frame.id, frame.name, frame.line),
            None => println!("{}", format!("No frame {} on the stack", id).red()),
        },
        ReplCommand::Break(line) => {
            if model.breakpoints.add(line) {
                sync_breakpoints(service).await;
                println!("Breakpoint set at line {}", line);
            } else {
                println!("Breakpoint already set at line {}", line);
            }
        }
        ReplCommand::Clear(line) => {
            if model.breakpoints.remove(line) {
                sync_breakpoints(service).await;
                println!("Breakpoint at line {} removed", line);
            } else {
                println!("No breakpoint at line {}", line);
            }
        }
        ReplCommand::Threads => match session.client().threads().await {
            Ok(threads) => {
                let current = service.current_thread();
                let stopped = service.stopped_threads();
                for thread in threads {
                    let marker = if thread.id == current { "*" } else { " " };
                    let state = if stopped.contains(&thread.id) {
                        "stopped".yellow()
                    } else {
                        "running".green()
                    };
                    println!("{} {} {} ({})", marker, thread.id, thread.name, state);
                }
            }
            Err(e) => println!("{} {}", "Threads:".red(), e),
        },
        ReplCommand::Quit => {}
    }
}

async fn sync_breakpoints(service: &DebugService) {
    if let Err(e) = service.update_breakpoints().await {
        println!("{} {}", "Breakpoint sync failed:".red(), e);
    }
}

fn report(outcome: ControlOutcome) {
    if let ControlOutcome::Failed(e) = outcome {
        println!("{} {}", "Request failed:".red(), e);
    }
}

fn prompt() {
    print!("{} ", "(cell)".cyan());
    let _ = std::io::stdout().flush();
}

/// Source text of a 1-based line
fn line_text(code: &str, line: u32) -> &str {
    line.checked_sub(1)
        .and_then(|index| code.lines().nth(index as usize))
        .unwrap_or("")
}

fn print_current_line(code: &str, line: u32) {
    println!("{} {:>4} | {}", "→".yellow().bold(), line, line_text(code, line));
}

fn print_frames(frames: &[StackFrame], selected: Option<StackFrame>) {
    if frames.is_empty() {
        println!("No stack frames (not stopped)");
        return;
    }
    let selected_id = selected.map(|f| f.id).unwrap_or(frames[0].id);
    for (index, frame) in frames.iter().enumerate() {
        let marker = if frame.id == selected_id { "→" } else { " " };
        println!(
            "{} #{} [{}] {} line {}",
            marker, index, frame.id, frame.name, frame.line
        );
    }
}

fn print_scopes(scopes: &[ScopeSnapshot]) {
    if scopes.is_empty() {
        println!("No variables (not stopped)");
        return;
    }
    for scope in scopes {
        println!("{}:", scope.name.bold());
        if scope.variables.is_empty() {
            println!("  {}", "(not loaded)".dimmed());
        }
        for var in &scope.variables {
            match &var.type_name {
                Some(ty) => println!("  {} ({}) = {}", var.name, ty.dimmed(), var.value),
                None => println!("  {} = {}", var.name, var.value),
            }
        }
    }
}

/// Print an adapter event. Returns false once the cell has finished.
fn print_event(message: &EventMessage) -> bool {
    match Event::from_message(message) {
        Event::Stopped(body) => {
            let thread = body
                .thread_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{} ({}) on thread {}",
                "Stopped".yellow().bold(),
                body.description.as_deref().unwrap_or(&body.reason),
                thread
            );
        }
        Event::Output(body) => match body.category.as_deref() {
            Some("stderr") => print!("{}", body.output.red()),
            _ => print!("{}", body.output),
        },
        Event::Exited(body) => println!("Cell exited with code {}", body.exit_code),
        Event::Terminated => {
            println!("{}", "Cell finished".green().bold());
            return false;
        }
        _ => {}
    }
    true
}

fn show_config() -> Result<()> {
    let config = Config::load()?;

    match paths::config_path() {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not found, using defaults)", path.display()),
        None => println!("Config file: unavailable (no home directory)"),
    }
    if let Some(log) = logging::session_log_path() {
        println!("Log file: {}", log.display());
    }

    let mut names: Vec<&str> = config.adapters.keys().map(String::as_str).collect();
    names.push(&config.defaults.adapter);
    names.sort_unstable();
    names.dedup();

    println!("Adapters:");
    for name in names {
        let default = if name == config.defaults.adapter { " (default)" } else { "" };
        match config.get_adapter(name) {
            Some(adapter) => println!(
                "  {} {}{} {}",
                "✓".green(),
                name,
                default,
                adapter.path.display().to_string().dimmed()
            ),
            None => println!("  {} {}{} {}", "✗".red(), name, default, "not found".dimmed()),
        }
    }

    println!(
        "Timeouts: request {}s, event wait {}s",
        config.timeouts.dap_request_secs, config.timeouts.event_wait_secs
    );
    Ok(())
}
