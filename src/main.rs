#![deny(dead_code)]
use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::env;
use std::path::PathBuf;
use tokio::sync::mpsc;

mod utils;

use colloquy::credentials::{load_credentials, save_credentials, set_config_path_override, Credentials};
use colloquy::ws::protocol::Envelope;
use colloquy::{ChatClient, ClientConfig, MessageKind, Notice};

/// Command line arguments for Colloquy
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Colloquy: a terminal chat client with live message sync.",
    long_about = "Colloquy is a command-line chat client that keeps a resilient \
    WebSocket connection to the chat server and reconciles live events against \
    paginated history.\n\n\
    Credentials are read from COLLOQUY_SERVER, COLLOQUY_USER_ID and COLLOQUY_TOKEN, \
    falling back to the saved credentials file, then to a prompt."
)]
struct Args {
    /// Chat server address, e.g. http://localhost:8080 (overrides saved credentials)
    #[arg(long)]
    server: Option<String>,

    /// Room to open on startup (defaults to the first room in the list)
    #[arg(long)]
    room: Option<u64>,

    /// Override the directory for the credentials file and log file
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,
}

/// Resolve session credentials: environment first, then the saved file,
/// then an interactive prompt (saved for next time).
fn resolve_credentials(server_override: Option<&str>) -> Result<(String, u64, String)> {
    if let (Ok(server), Ok(user_id), Ok(token)) = (
        env::var("COLLOQUY_SERVER"),
        env::var("COLLOQUY_USER_ID"),
        env::var("COLLOQUY_TOKEN"),
    ) {
        let user_id = user_id
            .parse::<u64>()
            .map_err(|_| anyhow!("COLLOQUY_USER_ID must be numeric"))?;
        return Ok((
            server_override.map(str::to_string).unwrap_or(server),
            user_id,
            token,
        ));
    }

    if let Some(saved) = load_credentials()? {
        if let Some(token) = saved.get_token() {
            let server = server_override
                .map(str::to_string)
                .unwrap_or_else(|| saved.server.clone());
            info!("Using cached credentials for {}", saved.username);
            return Ok((server, saved.user_id, token));
        }
    }

    let server = match server_override {
        Some(server) => server.to_string(),
        None => {
            eprintln!("Enter chat server address (e.g. http://localhost:8080):");
            utils::read_line()?
        }
    };
    eprintln!("Enter your numeric user id:");
    let user_id = utils::read_line()?
        .parse::<u64>()
        .map_err(|_| anyhow!("user id must be numeric"))?;
    eprintln!("Enter username:");
    let username = utils::read_line()?;
    eprintln!("Enter auth token:");
    let token = utils::read_line()?;

    if let Err(e) = save_credentials(&Credentials::new(&server, user_id, &username, &token)) {
        warn!("Could not save credentials: {}", e);
    }

    Ok((server, user_id, token))
}

fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Connected => "connected".to_string(),
        Notice::Reconnecting { attempt, delay } => {
            format!("connection lost, retrying in {:?} (attempt {})", delay, attempt + 1)
        }
        Notice::Disconnected => "disconnected".to_string(),
        Notice::SendFailed => "message not sent: not connected".to_string(),
        Notice::FetchFailed { room_id } => {
            format!("could not load history for room {}", room_id)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_file_path = match &args.config_dir {
        Some(dir) => {
            if !dir.exists() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    eprintln!(
                        "Warning: Failed to create config directory {}: {}",
                        dir.display(),
                        e
                    );
                    PathBuf::from("colloquy.log")
                } else {
                    dir.join("colloquy.log")
                }
            } else {
                dir.join("colloquy.log")
            }
        }
        None => PathBuf::from("colloquy.log"),
    };

    utils::setup_logging(log_file_path.to_str(), LevelFilter::Debug)?;
    info!("Colloquy chat client starting up");
    info!("Logging to file: {}", log_file_path.display());

    if let Some(dir) = &args.config_dir {
        set_config_path_override(dir.join("credentials.json"));
    }

    let (server, user_id, token) = resolve_credentials(args.server.as_deref())?;
    println!("Connecting to chat server at {}...\n", server);

    let config = ClientConfig::from_server(&server, user_id, &token);
    let (client, mut notices) = ChatClient::new(config);
    client.connect().await?;

    // Bootstrap rooms and open one
    match client.load_rooms().await {
        Ok(rooms) => {
            for room in &rooms {
                println!(
                    "  [{}] {} ({} unread)",
                    room.id, room.name, room.unread_count
                );
            }
            let open = args.room.or_else(|| rooms.first().map(|r| r.id));
            if let Some(room_id) = open {
                if let Err(e) = client.activate_room(room_id).await {
                    warn!("Could not open room {}: {}", room_id, e);
                } else {
                    println!("-- room {} --", room_id);
                    for msg in client.messages().await {
                        println!("{}: {}", msg.sender.username, msg.content);
                    }
                }
            }
        }
        Err(e) => error!("Failed to load room list: {}", e),
    }

    // Feed stdin lines into the event loop
    let (line_tx, mut line_rx) = mpsc::channel::<String>(8);
    std::thread::spawn(move || loop {
        match utils::read_line() {
            Ok(line) => {
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    let mut updates = client.updates();
    println!("Type to send, /quit to exit.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(notice) = notices.recv() => {
                println!("* {}", render_notice(&notice));
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = updates.borrow_and_update().clone();
                if let Some(Envelope::Message { data, .. }) = latest {
                    let msg = data.message;
                    if Some(msg.room_id) == client.active_room().await {
                        println!("{}: {}", msg.sender.username, msg.content);
                    }
                }
            }
            Some(line) = line_rx.recv() => {
                if line == "/quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                let Some(room_id) = client.active_room().await else {
                    println!("* no room open");
                    continue;
                };
                if client
                    .send_chat_message(room_id, &line, MessageKind::Text, None)
                    .await
                    .is_err()
                {
                    // The notice channel already carries the user-facing error
                    continue;
                }
            }
        }
    }

    client.disconnect().await;
    info!("Colloquy shut down cleanly");
    Ok(())
}
