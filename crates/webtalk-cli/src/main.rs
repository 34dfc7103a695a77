//! WebTalk CLI
//!
//! Thin wrapper around webtalk-core for simulations and local data.
//!
//! ## Usage
//!
//! ```bash
//! # Room id for a page host
//! webtalk room-id example.com
//!
//! # Rejoin catch-up walkthrough on an in-memory network
//! webtalk demo
//!
//! # One writer, several late joiners
//! webtalk simulate --messages 200 --peers 4
//!
//! # Persisted identity and history
//! webtalk identity --name alice
//! webtalk say --host example.com "hello"
//! webtalk history
//!
//! # Merged JSONL timeline of earlier runs
//! webtalk --log-dir ./logs -v demo
//! webtalk --log-dir ./logs logs --quiet
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::{sleep, Instant};
use tracing::info;
use webtalk_core::logging::{generate_timeline, LoggingBuilder, TimelineOptions};
use webtalk_core::{
    MemoryMessageStore, MemoryNetwork, MessageStore, NormalMessage, Room, RoomConfig, RoomHandle,
    RoomId, StaticIdentity, Storage, UserInfo,
};

/// Time allowed for handshakes between demo steps
const SETTLE: Duration = Duration::from_millis(100);

const DB_FILE: &str = "webtalk.redb";

/// WebTalk - site-scoped P2P chat rooms
#[derive(Parser)]
#[command(name = "webtalk")]
#[command(version = "0.1.0")]
#[command(about = "WebTalk - site-scoped P2P chat rooms")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Room settings as JSON (missing fields use defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Data directory (default: ~/.webtalk/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the room id for a page host
    RoomId {
        /// Host name, e.g. example.com
        host: String,
    },

    /// Walk through a leave / rejoin catch-up on an in-memory network
    Demo,

    /// One peer writes messages, the others join later and catch up
    Simulate {
        /// Messages written by the first peer
        #[arg(short, long, default_value_t = 100)]
        messages: usize,

        /// Total peers, including the writer
        #[arg(short, long, default_value_t = 3)]
        peers: usize,
    },

    /// Send a message from the persisted identity into its local history
    Say {
        /// Page host whose room to post in
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Message body
        text: String,
    },

    /// List persisted messages
    History,

    /// Show, create or rename the persisted local identity
    Identity {
        /// Display name to set
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print the merged timeline from --log-dir
    Logs {
        /// Show only the last N entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only entries for this room id
        #[arg(short, long)]
        room: Option<String>,

        /// Hide debug and trace entries
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_deref())?;

    let config = match &cli.config {
        Some(path) => RoomConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RoomConfig::default(),
    };
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::RoomId { host } => {
            println!("{}", RoomId::from_host(&host));
        }

        Commands::Demo => run_demo(config).await?,

        Commands::Simulate { messages, peers } => run_simulation(config, messages, peers).await?,

        Commands::Say { host, text } => {
            let storage = open_storage(&data_dir)?;
            let user = storage.load_or_create_identity(&default_name())?;
            let network = MemoryNetwork::new();
            let room_id = RoomId::from_host(&host);
            let room = spawn_room(&network, &room_id, user.clone(), storage, config);

            room.join()?;
            room.send_text(text.as_str())?;
            let (handle, body) = (&room, text.as_str());
            let sent = wait_until(SETTLE * 10, || async move {
                let messages = handle.messages().await?;
                Ok::<_, anyhow::Error>(messages.iter().any(|m| m.body == body))
            })
            .await?;
            room.shutdown().await;

            if !sent {
                anyhow::bail!("Message was not recorded");
            }
            println!("Sent as {} in room {}", user.name, room_id);
        }

        Commands::History => {
            let storage = open_storage(&data_dir)?;
            let messages = storage.list()?;
            if messages.is_empty() {
                println!("No messages.");
            } else {
                println!("Messages ({}):", messages.len());
                for message in &messages {
                    print_message(message);
                }
            }
        }

        Commands::Identity { name } => {
            let storage = open_storage(&data_dir)?;
            let fallback = name.clone().unwrap_or_else(default_name);
            let mut user = storage.load_or_create_identity(&fallback)?;
            if let Some(name) = name {
                if user.name != name {
                    user.name = name;
                    storage.save_identity(&user)?;
                }
            }
            println!("Identity:");
            println!("  User ID: {}", user.id);
            println!("  Name: {}", user.name);
            if !user.avatar.is_empty() {
                println!("  Avatar: {}", user.avatar);
            }
            println!();
            println!("Data directory: {}", data_dir.display());
        }

        Commands::Logs { limit, room, quiet } => {
            let log_dir = cli
                .log_dir
                .context("--log-dir is required to read logs")?;
            let options = TimelineOptions { limit, room, quiet };
            let timeline = generate_timeline(&log_dir, &options)?;
            if timeline.is_empty() {
                println!("No log entries.");
            } else {
                print!("{}", timeline);
            }
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Simulations
// ═══════════════════════════════════════════════════════════════════════════

async fn run_demo(config: RoomConfig) -> Result<()> {
    let network = MemoryNetwork::new();
    let room_id = RoomId::from_host("example.com");
    println!("Room: {} (example.com)", room_id);

    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::generate("alice"),
        MemoryMessageStore::new(),
        config.clone(),
    );
    let bob = spawn_room(
        &network,
        &room_id,
        UserInfo::generate("bob"),
        MemoryMessageStore::new(),
        config,
    );
    let peers = [("alice", &alice), ("bob", &bob)];

    println!();
    println!("Step 1: alice joins and sends m1");
    alice.join()?;
    alice.send_text("m1")?;
    sleep(SETTLE).await;
    print_state(&peers).await?;

    println!();
    println!("Step 2: alice leaves");
    alice.leave()?;
    sleep(SETTLE).await;
    print_state(&peers).await?;

    println!();
    println!("Step 3: bob joins an empty room");
    bob.join()?;
    sleep(SETTLE).await;
    print_state(&peers).await?;

    println!();
    println!("Step 4: alice rejoins and catches bob up");
    alice.join()?;
    let bob_ref = &bob;
    let caught_up = wait_until(Duration::from_secs(5), || async move {
        Ok::<_, anyhow::Error>(!bob_ref.messages().await?.is_empty())
    })
    .await?;
    print_state(&peers).await?;

    alice.shutdown().await;
    bob.shutdown().await;

    println!();
    if caught_up {
        println!("bob caught up");
        Ok(())
    } else {
        anyhow::bail!("bob did not receive history")
    }
}

async fn run_simulation(config: RoomConfig, messages: usize, peers: usize) -> Result<()> {
    anyhow::ensure!(peers >= 2, "Need at least two peers");

    let network = MemoryNetwork::new();
    let room_id = RoomId::from_host("simulation.local");
    let rooms: Vec<(String, RoomHandle)> = (0..peers)
        .map(|i| {
            let name = format!("peer{}", i);
            let room = spawn_room(
                &network,
                &room_id,
                UserInfo::generate(name.clone()),
                MemoryMessageStore::new(),
                config.clone(),
            );
            (name, room)
        })
        .collect();

    let (writer_name, writer) = &rooms[0];
    writer.join()?;
    for i in 0..messages {
        writer.send_text(format!("message {}", i + 1))?;
    }
    let written = wait_until(Duration::from_secs(10), || async move {
        Ok::<_, anyhow::Error>(writer.messages().await?.len() >= messages)
    })
    .await?;
    anyhow::ensure!(written, "{} did not record its messages", writer_name);
    info!(count = messages, "Writer finished");

    let started = Instant::now();
    for (_, room) in &rooms[1..] {
        room.join()?;
    }

    // Batches are paced, so allow a generous budget per batch.
    let batches = messages.div_ceil(config.batch_size()).max(1) as u32;
    let budget = Duration::from_secs(5) + (config.batch_delay() + config.message_delay()) * batches;
    let joiners = &rooms[1..];
    let converged = wait_until(budget, || async move {
        for (_, room) in joiners {
            if room.messages().await?.len() < messages {
                return Ok(false);
            }
        }
        Ok::<_, anyhow::Error>(true)
    })
    .await?;
    let elapsed = started.elapsed();

    println!("Room: {}", room_id);
    println!("Peers: {}", peers);
    for (name, room) in &rooms {
        let count = room.messages().await?.len();
        let users = room.users().await?.len();
        println!("  {}: {} messages, sees {} users", name, count, users);
    }
    println!(
        "{} after {} ms",
        if converged { "Converged" } else { "Not converged" },
        elapsed.as_millis()
    );

    for (_, room) in &rooms {
        room.shutdown().await;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn spawn_room<S: MessageStore>(
    network: &MemoryNetwork,
    room_id: &RoomId,
    user: UserInfo,
    store: S,
    config: RoomConfig,
) -> RoomHandle {
    let (transport, events) = network.connect(room_id);
    Room::new(room_id.clone(), transport, events, store, StaticIdentity::new(user))
        .with_config(config)
        .spawn()
}

/// Poll `check` every 20 ms until it holds or `budget` runs out.
async fn wait_until<F, Fut>(budget: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + budget;
    loop {
        if check().await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

async fn print_state(peers: &[(&str, &RoomHandle)]) -> Result<()> {
    for (name, room) in peers {
        let status = if room.is_joined().await? { "joined" } else { "away" };
        let users: Vec<String> = room
            .users()
            .await?
            .into_iter()
            .map(|u| format!("{}x{}", u.username, u.connection_count()))
            .collect();
        let bodies: Vec<String> = room
            .messages()
            .await?
            .into_iter()
            .map(|m| m.body)
            .collect();
        println!(
            "  {} ({}): users [{}], history [{}]",
            name,
            status,
            users.join(", "),
            bodies.join(", ")
        );
    }
    Ok(())
}

fn print_message(message: &NormalMessage) {
    let time = chrono::DateTime::from_timestamp_millis(message.send_time)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| message.send_time.to_string());
    print!("  [{}] {}: {}", time, message.username, message.body);
    if !message.like_users.is_empty() || !message.hate_users.is_empty() {
        print!(
            " (+{} -{})",
            message.like_users.len(),
            message.hate_users.len()
        );
    }
    println!();
}

fn open_storage(data_dir: &Path) -> Result<Storage> {
    let path = data_dir.join(DB_FILE);
    Storage::new(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn default_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = LoggingBuilder::new(filter);
    if let Some(dir) = log_dir {
        builder = builder.with_jsonl(dir, "webtalk");
    }
    builder.init().context("Failed to initialise logging")?;
    Ok(())
}

/// Get the default data directory (~/.webtalk/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".webtalk")
        .join("data")
}
