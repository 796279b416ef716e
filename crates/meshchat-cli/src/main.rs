//! meshchat CLI
//!
//! Thin wrapper around meshchat-core for command-line usage. Every invocation
//! opens the engine on the data directory, resumes the recalled session and
//! tears down again, so state lives in the redb disk cache between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Create an account and log in
//! meshchat account create alice --password hunter2
//! meshchat login alice --password hunter2
//!
//! # Find someone and open a chat with them
//! meshchat search bob
//! meshchat chat create <public_key> bob
//!
//! # Talk
//! meshchat chat send <chat_id> "Hello!"
//! meshchat chat show <chat_id>
//! meshchat chat list
//!
//! # Check that the counterpart copy of a chat exists
//! meshchat chat check <chat_id> --repair
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meshchat_core::logging::LoggingBuilder;
use meshchat_core::{ChatConfig, ChatEngine, ChatKind};
use tokio::io::AsyncBufReadExt;

/// meshchat - end-to-end encrypted chat over a replicated graph
#[derive(Parser)]
#[command(name = "meshchat")]
#[command(version)]
#[command(about = "meshchat - end-to-end encrypted chat over a replicated graph")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: ~/.meshchat/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Relay peer endpoint; repeat for several (adds to MESHCHAT_PEERS)
    #[arg(long = "peer", global = true)]
    peers: Vec<String>,

    /// Also write JSONL logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connection and session information
    Info,

    /// Account management
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Log in and remember the session for later commands
    Login {
        username: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// End the session and forget it locally
    Logout,

    /// Show the logged-in identity
    Whoami,

    /// Chat management and messaging
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Search discoverable users (at least 3 characters)
    Search {
        query: String,
        /// How long to collect matches, in milliseconds (default: search window)
        #[arg(long)]
        wait_ms: Option<u64>,
    },

    /// Publish presence
    Presence {
        #[arg(value_parser = ["online", "offline"])]
        status: String,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Create an account (does not log in)
    Create {
        username: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// List chats, most recent first
    List,
    /// Open (or reopen) a private chat
    Create {
        /// Counterpart public key
        public_key: String,
        /// Counterpart username, used as the chat name
        username: String,
    },
    /// Create a group chat
    Group {
        name: String,
        /// Participant public keys
        participants: Vec<String>,
    },
    /// Send a message
    Send {
        chat_id: String,
        message: String,
        /// Message id this replies to
        #[arg(long)]
        reply_to: Option<String>,
    },
    /// Print the messages of a chat and clear its unread counter
    Show {
        chat_id: String,
        /// Only the last N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Report counterpart copies of a chat that are missing
    Check {
        chat_id: String,
        /// Rewrite the missing copies
        #[arg(long)]
        repair: bool,
    },
}

fn setup_logging(verbosity: u8, log_dir: Option<PathBuf>) -> Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = LoggingBuilder::new(level);
    if let Some(dir) = log_dir {
        builder = builder.with_jsonl(dir, "cli");
    }
    builder.init().context("Failed to open log directory")?;
    Ok(())
}

/// Get the default data directory (~/.meshchat/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".meshchat")
        .join("data")
}

/// Use the given password or read one line from stdin.
async fn password_or_stdin(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("No password given");
    }
    Ok(password)
}

fn require_login(engine: &ChatEngine) -> Result<()> {
    if !engine.is_authenticated() {
        bail!("Not logged in. Run `meshchat login <username>` first.");
    }
    Ok(())
}

/// Shorten a public key for display
fn short_key(key: &str) -> String {
    if key.chars().count() > 12 {
        format!("{}…", key.chars().take(12).collect::<String>())
    } else {
        key.to_string()
    }
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir)?;

    let mut config = ChatConfig::from_env()?;
    config.peers.extend(cli.peers);
    let search_window = config.search_window;

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    tracing::debug!(?data_dir, peers = config.peers.len(), "Starting meshchat");
    let engine = ChatEngine::new(config, &data_dir).await?;
    engine.initialize().await?;

    let result = run(&engine, cli.command, &data_dir, search_window).await;
    engine.teardown().await;
    result
}

async fn run(
    engine: &ChatEngine,
    command: Commands,
    data_dir: &std::path::Path,
    search_window: Duration,
) -> Result<()> {
    match command {
        Commands::Info => {
            let state = engine.connection_state();

            println!("meshchat v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Session:");
            match engine.session() {
                Some(session) => {
                    println!("  Alias: {}", session.alias());
                    println!("  Public key: {}", session.public_key());
                }
                None => println!("  (not logged in)"),
            }
            println!();
            println!("Graph:");
            if state.peers.is_empty() {
                println!("  Peers: (none, local replica only)");
            } else {
                println!("  Peers: {}", state.peers.join(", "));
                println!("  Reachable: {}", state.reachable);
            }
            println!("  Peer discovery: {}", state.peer_discovery);
            println!();
            println!("Data directory: {}", data_dir.display());
        }

        Commands::Account { action } => match action {
            AccountAction::Create { username, password } => {
                let password = password_or_stdin(password).await?;
                let public_key = engine.create_account(&username, &password).await?;
                println!("Account created!");
                println!("  Alias: {}", username.trim());
                println!("  Public key: {}", public_key);
                println!();
                println!("Log in with: meshchat login {}", username.trim());
            }
        },

        Commands::Login { username, password } => {
            let password = password_or_stdin(password).await?;
            let session = engine.login(&username, &password).await?;
            println!("Logged in as {}", session.alias());
            println!("  Public key: {}", session.public_key());
        }

        Commands::Logout => {
            let alias = engine.session().map(|s| s.alias().to_string());
            engine.logout().await;
            match alias {
                Some(alias) => println!("Logged out {}", alias),
                None => println!("Not logged in."),
            }
        }

        Commands::Whoami => {
            require_login(engine)?;
            if let Some(session) = engine.session() {
                println!("{}", session.alias());
                println!("  Public key: {}", session.public_key());
                println!("  Encryption key: {}", session.encryption_public_key());
            }
        }

        Commands::Chat { action } => {
            require_login(engine)?;
            run_chat(engine, action).await?;
        }

        Commands::Search { query, wait_ms } => {
            require_login(engine)?;
            let handle = engine.search_users(&query).await?;
            if !handle.is_active() {
                println!("Queries need at least 3 characters.");
                return Ok(());
            }

            let wait = wait_ms.map(Duration::from_millis).unwrap_or(search_window);
            tokio::time::sleep(wait).await;
            handle.cancel().await;

            let results = engine.store().search_results.get();
            if results.is_empty() {
                println!("No users matching \"{}\".", query);
            } else {
                println!("Users matching \"{}\":", query);
                for contact in results {
                    let status = if contact.online { "online" } else { "offline" };
                    println!("  {} ({})", contact.username, status);
                    println!("    Public key: {}", contact.public_key);
                }
            }
        }

        Commands::Presence { status } => {
            require_login(engine)?;
            engine.publish_presence(status == "online").await?;
            println!("Presence: {}", status);
        }
    }

    Ok(())
}

async fn run_chat(engine: &ChatEngine, action: ChatAction) -> Result<()> {
    match action {
        ChatAction::List => {
            let chats = engine.store().sorted_chats.get();
            println!("Chats:");
            println!();
            if chats.is_empty() {
                println!("  (no chats yet)");
                println!();
                println!("  Find someone with: meshchat search <name>");
                return Ok(());
            }
            for chat in chats {
                let badge = if chat.unread_count > 0 {
                    format!(" [{}]", chat.unread_count)
                } else {
                    String::new()
                };
                let kind = match chat.kind {
                    ChatKind::Private => "private",
                    ChatKind::Group => "group",
                };
                println!(
                    "  {} ({}, {}){}",
                    chat.name,
                    kind,
                    format_time(chat.last_message_timestamp),
                    badge
                );
                println!("    ID: {}", chat.id);
                if !chat.last_message_preview.is_empty() {
                    println!("    \"{}\"", chat.last_message_preview);
                }
            }
        }

        ChatAction::Create {
            public_key,
            username,
        } => {
            let chat_id = engine.create_private_chat(&public_key, &username).await?;
            println!("Chat with {} ready.", username);
            println!("  ID: {}", chat_id);
        }

        ChatAction::Group { name, participants } => {
            let chat_id = engine.create_group_chat(&name, &participants).await?;
            println!("Group \"{}\" created.", name);
            println!("  ID: {}", chat_id);
            println!("  Members: {}", participants.len() + 1);
        }

        ChatAction::Send {
            chat_id,
            message,
            reply_to,
        } => {
            if !engine
                .send_message(&chat_id, &message, reply_to.as_deref())
                .await
            {
                bail!("Message not sent. Run with -v for details.");
            }
            println!("Message sent.");
        }

        ChatAction::Show { chat_id, limit } => {
            let chat = engine.select_chat(&chat_id)?;
            engine.load_messages(&chat_id).await?;
            let me = engine.session().map(|s| s.public_key()).unwrap_or_default();

            let messages = engine.store().sorted_messages.get();
            let start = limit.map_or(0, |n| messages.len().saturating_sub(n));

            println!("{} ({} messages)", chat.name, messages.len());
            println!();
            if messages.is_empty() {
                println!("  (no messages)");
            }
            for message in &messages[start..] {
                let sender = if message.sender == me {
                    "You".to_string()
                } else {
                    short_key(&message.sender)
                };
                let ticks = match (message.delivered, message.read) {
                    (_, true) => " ✓✓",
                    (true, false) => " ✓",
                    _ => "",
                };
                println!("  [{} - {}]{}", sender, format_time(message.timestamp), ticks);
                println!("    {}", message.content);
                println!();
            }

            if chat.unread_count > 0 {
                engine.clear_unread(&chat_id).await?;
            }
        }

        ChatAction::Check { chat_id, repair } => {
            let report = engine.check_mirror(&chat_id).await?;
            if report.is_complete() {
                println!("Mirror complete.");
                return Ok(());
            }
            println!("Missing copies:");
            for key in &report.missing {
                println!("  {}", key);
            }
            if repair {
                let repaired = engine.repair_mirror(&chat_id).await?;
                println!("Repaired {} copies.", repaired);
            }
        }
    }

    Ok(())
}
