use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

use chatterbox::server::{AdminCommand, CommandError, Moderator};
use chatterbox::{ChatServer, Config, ServerEvent, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "chatterbox chat server with operator console")]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the database path.
    #[arg(long)]
    db: Option<String>,
}

fn load_config(args: &Args) -> Config {
    let mut config = match Config::load_with_env(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config.display());
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    config
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(&args);

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    if let Err(e) = chatterbox::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        chatterbox::logging::init_console_only(&config.logging.level);
    }

    info!("chatterbox server starting");

    let store = match SqliteStore::open(&config.database.path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let server = match ChatServer::bind(&config.server, store.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}:{}: {}", config.server.host, config.server.port, e);
            std::process::exit(1);
        }
    };

    tokio::spawn(print_events(server.subscribe()));
    tokio::spawn(run_console(server.moderator()));

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
    }

    store.database().close().await;
    info!("chatterbox server stopped");

    // The console task is parked in a blocking stdin read that cannot be
    // cancelled, so leave without waiting for it.
    std::process::exit(0);
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ServerEvent>) {
    loop {
        match events.recv().await {
            Ok(ServerEvent::SessionJoined {
                username, peer_addr, ..
            }) => println!("New connection: {username} from {peer_addr}"),
            Ok(ServerEvent::SessionLeft { username, .. }) => println!("{username} disconnected"),
            Ok(ServerEvent::MessageReceived {
                username,
                channel,
                content,
            }) => {
                let time = Local::now().format("%H:%M");
                println!("{time} [{channel}] {username}: {content}");
            }
            Err(RecvError::Lagged(skipped)) => println!("({skipped} events skipped)"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_console(moderator: Moderator) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let command = match AdminCommand::parse(&line) {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                println!("{e} (try /help)");
                continue;
            }
        };

        let is_shutdown = command == AdminCommand::Shutdown;
        match moderator.execute(command).await {
            Ok(outcome) => println!("{outcome}"),
            Err(e) => println!("command failed: {e}"),
        }
        if is_shutdown {
            break;
        }
    }
}
