use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chatterbox::auth::validation::validate_registration;
use chatterbox::{Channel, ChatStore, Client, ClientEvent, Config, DisplayLine, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "chatterbox line-mode chat client")]
struct Args {
    /// Account name.
    username: String,

    /// Password; prompted for when omitted.
    #[arg(long)]
    password: Option<String>,

    /// Create the account before connecting.
    #[arg(long)]
    register: bool,

    /// Configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the server host.
    #[arg(long)]
    host: Option<String>,

    /// Override the server port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Channel to start in.
    #[arg(long, default_value = "General")]
    channel: String,
}

fn prompt_password(label: &str) -> std::io::Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = Config::load_with_env(&args.config).unwrap_or_else(|_| {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    });
    if let Some(host) = &args.host {
        config.client.host = host.clone();
    }
    if let Some(port) = args.port {
        config.client.port = port;
    }

    chatterbox::logging::init_console_only("warn");

    let mut channel: Channel = args.channel.parse().unwrap_or_else(|e| fail(e));

    let password = match args.password.clone() {
        Some(password) => password,
        None => prompt_password("Password").unwrap_or_else(|e| fail(e)),
    };
    if args.register {
        // A password given on the command line needs no confirmation.
        let confirm = match &args.password {
            Some(password) => password.clone(),
            None => prompt_password("Confirm password").unwrap_or_else(|e| fail(e)),
        };
        if let Err(e) = validate_registration(&args.username, &password, &confirm) {
            fail(format!("registration failed: {e}"));
        }
    }

    let store = SqliteStore::open(&config.database.path)
        .await
        .unwrap_or_else(|e| fail(format!("cannot open account database: {e}")));
    if args.register {
        if let Err(e) = store.create_account(&args.username, &password).await {
            fail(format!("registration failed: {e}"));
        }
        println!("Account {} created.", args.username);
    }
    match store.verify_credentials(&args.username, &password).await {
        Ok(true) => {}
        Ok(false) => fail("invalid username or password"),
        Err(e) => fail(format!("cannot check credentials: {e}")),
    }
    store.database().close().await;

    let (client, events) = Client::new(config.client.clone(), args.username.clone());
    tokio::spawn(print_events(events));

    if client.connect().await.is_err() {
        // The failure was already reported as an event.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::process::exit(1);
    }

    println!("Type a message, /channel <name> to switch, /quit to leave.");
    println!("Channel: {channel}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if let Some(name) = line.strip_prefix("/channel ") {
            match name.parse() {
                Ok(next) => {
                    channel = next;
                    println!("Channel: {channel}");
                }
                Err(e) => println!("{e}"),
            }
            continue;
        }
        if let Err(e) = client.send(channel, line).await {
            println!("send failed: {e}");
            break;
        }
    }

    client.close().await;
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            ClientEvent::Connected => println!("Connected."),
            ClientEvent::ConnectionFailed(reason) => eprintln!("Connection failed: {reason}"),
            ClientEvent::ConnectionClosed => {
                println!("Connection closed.");
                std::process::exit(0);
            }
            ClientEvent::MessageReceived(_) | ClientEvent::HistoryLineReceived(_) => {
                if let Some(line) = DisplayLine::from_event(&event) {
                    match line.channel {
                        Some(channel) => println!("[{channel}] {}", line.text),
                        None => println!("[*] {}", line.text),
                    }
                }
            }
        }
    }
}
