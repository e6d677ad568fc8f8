//! Terminal front end for the wren chat client.
//!
//! A line-oriented REPL: plain input is sent to the selected model,
//! `/commands` drive model management, settings, and export. The
//! connection monitor runs in the background; its episode notifications
//! are surfaced between prompts.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use wren::chat::default_history_path;
use wren::install::{InstallOutcome, InstallUpdate, Installer};
use wren::{
    ChatController, ConnectionMonitor, ExportFormat, FileAttachment, MonitorEvent,
    MonitorHandle, Role, ServerClient, Settings,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_path = Settings::default_path();
    let mut settings = match &settings_path {
        Some(path) => Settings::load_from(path).context("loading settings")?,
        None => Settings::default(),
    };

    let (monitor, mut handle) = ConnectionMonitor::new(&settings);
    let monitor_cancel = monitor.spawn();

    let mut chat = ChatController::new(
        &settings,
        handle.state.clone(),
        default_history_path(),
    );
    let mut pending_attachment: Option<FileAttachment> = None;

    println!("wren — chatting with {}", settings.base_url_trimmed());
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        drain_events(&mut handle);
        prompt(&chat).await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let name = parts.next().unwrap_or_default();
            let arg = parts.next().unwrap_or("").trim();
            match name {
                "quit" | "exit" => break,
                "help" => print_help(),
                "models" => list_models(&settings).await,
                "model" => {
                    if arg.is_empty() {
                        println!("usage: /model <name>");
                    } else {
                        chat.select_model(arg);
                        println!("model set to {arg}");
                    }
                }
                "pull" => {
                    if arg.is_empty() {
                        println!("usage: /pull <model>");
                    } else {
                        run_pull(&settings, arg).await;
                    }
                }
                "rm" => {
                    if arg.is_empty() {
                        println!("usage: /rm <model>");
                    } else {
                        match ServerClient::new(&settings).delete_model(arg).await {
                            Ok(()) => println!("removed {arg}"),
                            Err(e) => println!("error: {e}"),
                        }
                    }
                }
                "url" => {
                    if arg.is_empty() {
                        println!("server: {}", settings.base_url_trimmed());
                    } else {
                        update_url(&mut settings, settings_path.as_deref(), arg).await;
                    }
                }
                "attach" => {
                    if arg.is_empty() {
                        println!("usage: /attach <path>");
                    } else {
                        match FileAttachment::read_from(&PathBuf::from(arg)) {
                            Ok(file) => {
                                println!("attached {} ({} bytes)", file.name, file.content.len());
                                pending_attachment = Some(file);
                            }
                            Err(e) => println!("error: {e}"),
                        }
                    }
                }
                "export" => export_transcript(&chat, arg),
                "clear" => {
                    chat.clear();
                    println!("transcript cleared");
                }
                _ => println!("unknown command: /{name} (try /help)"),
            }
            continue;
        }

        let appended = chat.send(line, pending_attachment.take()).await;
        for message in appended.iter().skip(1) {
            match message.role {
                Role::Assistant => println!("\n{}\n", message.content),
                Role::Error => println!("\n! {}\n", message.content),
                Role::User => {}
            }
        }
    }

    monitor_cancel.cancel();
    Ok(())
}

fn print_help() {
    println!("  /models            list installed models");
    println!("  /model <name>      select the model to chat with");
    println!("  /pull <model>      download and install a model");
    println!("  /rm <model>        remove an installed model");
    println!("  /url [<url>]       show or change the server URL");
    println!("  /attach <path>     attach a text file to the next message");
    println!("  /export <fmt> <path>   export the transcript (md|json|txt)");
    println!("  /clear             clear the transcript");
    println!("  /quit              exit");
}

/// Print episode notifications that arrived since the last prompt.
fn drain_events(handle: &mut MonitorHandle) {
    while let Ok(event) = handle.events.try_recv() {
        match event {
            MonitorEvent::Disconnected(kind) => println!("! connection lost: {kind}"),
            MonitorEvent::Reconnected => println!("* connection restored"),
        }
    }
}

async fn prompt(chat: &ChatController) -> Result<()> {
    let model = chat.model().unwrap_or("no model");
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("[{model}]> ").as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn list_models(settings: &Settings) {
    match ServerClient::new(settings).list_models().await {
        Ok(models) if models.is_empty() => println!("no models installed"),
        Ok(models) => {
            for model in models {
                match model.size {
                    Some(size) => println!("  {}  ({:.1} GB)", model.name, size as f64 / 1e9),
                    None => println!("  {}", model.name),
                }
            }
        }
        Err(e) => println!("error: {e}"),
    }
}

/// Drive one installation to its terminal outcome, Ctrl-C cancels.
async fn run_pull(settings: &Settings, model_id: &str) {
    let installer = Installer::new(settings);
    let mut job = installer.start(model_id);

    let bar = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40} {pos:>3}%  {msg}")
    {
        bar.set_style(style);
    }
    bar.set_message("requesting");

    loop {
        let update = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                job.cancel.cancel();
                continue;
            }
            update = job.updates.recv() => update,
        };
        match update {
            Some(InstallUpdate::Status(status)) => bar.set_message(status),
            Some(InstallUpdate::Progress(percent)) => bar.set_position(percent as u64),
            Some(InstallUpdate::Done(InstallOutcome::Success)) => {
                bar.finish_with_message("installed");
                return;
            }
            Some(InstallUpdate::Done(InstallOutcome::Failure(reason))) => {
                bar.abandon_with_message(format!("failed: {reason}"));
                return;
            }
            None => return,
        }
    }
}

async fn update_url(settings: &mut Settings, path: Option<&std::path::Path>, url: &str) {
    match settings.update_base_url(url).await {
        Ok(()) => {
            println!("server set to {}", settings.base_url_trimmed());
            println!("restart to re-point the background monitor");
            if let Some(path) = path
                && let Err(e) = settings.save_to(path)
            {
                println!("warning: could not persist settings: {e}");
            }
        }
        Err(e) => println!("error: {e} (URL unchanged)"),
    }
}

fn export_transcript(chat: &ChatController, arg: &str) {
    let mut parts = arg.splitn(2, ' ');
    let format = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or("").trim();
    let Some(format) = ExportFormat::parse(format) else {
        println!("usage: /export <md|json|txt> <path>");
        return;
    };
    if path.is_empty() {
        println!("usage: /export <md|json|txt> <path>");
        return;
    }
    match wren::export::render(format, chat.messages())
        .and_then(|rendered| std::fs::write(path, rendered).map_err(Into::into))
    {
        Ok(()) => println!("exported to {path}"),
        Err(e) => println!("error: {e}"),
    }
}
