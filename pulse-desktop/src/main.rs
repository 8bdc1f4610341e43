//! Pulse Desktop host: seeds an in-memory chat store, runs the simulation
//! server, attaches a reconnecting client and exposes the control surface as
//! a line-oriented console on stdin.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use pulse_core::seed::{DEFAULT_CHAT_COUNT, DEFAULT_MESSAGES_PER_CHAT};
use pulse_core::{seed_store, ChatStore, MemoryChatStore, PassthroughSecurity};
use pulse_live::client::{ClientConfig, ClientEvent, SimulationClient};
use pulse_live::control::{dispatch, ControlCommand, ControlReply, USAGE};
use pulse_live::feed::PAGE_SIZE;
use pulse_live::protocol::SimulationEvent;
use pulse_live::server::{ServerConfig, SimulationServer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

#[derive(Debug, Parser)]
#[command(name = "pulse-desktop", about = "Live chat simulation host")]
struct Args {
    /// WebSocket port on 127.0.0.1 (0 picks a free one)
    #[arg(long, env = "PULSE_PORT", default_value_t = 8080)]
    port: u16,

    /// Liveness sweep period in milliseconds
    #[arg(long, env = "PULSE_HEARTBEAT_MS", default_value_t = 10_000)]
    heartbeat_ms: u64,

    #[arg(long, env = "PULSE_SIM_MIN_MS", default_value_t = 1000)]
    sim_min_ms: u64,

    #[arg(long, env = "PULSE_SIM_MAX_MS", default_value_t = 3000)]
    sim_max_ms: u64,

    /// Number of demo chats to seed
    #[arg(long, env = "PULSE_CHATS", default_value_t = DEFAULT_CHAT_COUNT)]
    chats: usize,

    #[arg(long, default_value_t = DEFAULT_MESSAGES_PER_CHAT)]
    messages_per_chat: usize,

    /// Do not start generating messages on launch
    #[arg(long)]
    paused: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            simulation_interval: (
                Duration::from_millis(self.sim_min_ms),
                Duration::from_millis(self.sim_max_ms),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();
    let args = Args::parse();

    log::info!("Starting Pulse Desktop...");

    let store = Arc::new(MemoryChatStore::new(Arc::new(PassthroughSecurity::new())));
    seed_store(&store, args.chats, args.messages_per_chat)?;

    let server = SimulationServer::bind(args.server_config(), store.clone()).await?;
    if !args.paused {
        server.start().await?;
    }

    let client = Arc::new(SimulationClient::new(server.url(), ClientConfig::default()));
    let first_page = store.get_chats(PAGE_SIZE, 0)?;
    client
        .update_feed(|feed| feed.load_chats(first_page, 0, PAGE_SIZE))
        .await;
    let watcher = tokio::spawn(log_client_events(client.clone()));
    client.connect().await;

    println!("{USAGE}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if matches!(line.trim(), "quit" | "exit") {
                    break;
                }
                run_command(&server, &store, &client, &line).await;
            }
            _ = signal::ctrl_c() => {
                log::info!("Received shutdown signal");
                break;
            }
        }
    }

    client.disconnect().await;
    watcher.abort();
    server.shutdown().await;
    log::info!("Pulse Desktop stopped");
    Ok(())
}

async fn run_command(server: &SimulationServer, store: &MemoryChatStore, client: &SimulationClient, line: &str) {
    let command: ControlCommand = match line.parse() {
        Ok(command) => command,
        Err(e) => {
            println!("error: {e}\n{USAGE}");
            return;
        }
    };

    match dispatch(server, store, command).await {
        Ok(reply) => {
            mirror_into_feed(client, store, command, &reply).await;
            print_reply(reply);
        }
        Err(e) => println!("error: {e}"),
    }
}

/// Keep the client's local feed in step with what the console just did.
async fn mirror_into_feed(client: &SimulationClient, store: &MemoryChatStore, command: ControlCommand, reply: &ControlReply) {
    match (command, reply) {
        (ControlCommand::Reseed { .. }, ControlReply::Ok) => match store.get_chats(PAGE_SIZE, 0) {
            Ok(first_page) => {
                client
                    .update_feed(|feed| {
                        feed.select_chat(None);
                        feed.load_chats(first_page, 0, PAGE_SIZE);
                    })
                    .await;
            }
            Err(e) => log::warn!("Could not reload chats after reseed: {e}"),
        },
        (ControlCommand::GetChats { limit, offset }, ControlReply::Chats(chats)) => {
            let chats = chats.clone();
            client.update_feed(|feed| feed.load_chats(chats, offset, limit)).await;
        }
        (ControlCommand::GetMessages { chat_id, limit, offset }, ControlReply::Messages(messages)) => {
            let messages = messages.clone();
            client
                .update_feed(|feed| {
                    feed.select_chat(Some(chat_id));
                    feed.load_messages(chat_id, messages, offset, limit);
                })
                .await;
        }
        (ControlCommand::MarkAsRead { chat_id }, ControlReply::Ok) => {
            client.update_feed(|feed| feed.mark_read(chat_id)).await;
        }
        _ => {}
    }
}

fn print_reply(reply: ControlReply) {
    match reply {
        ControlReply::Ok => println!("ok"),
        ControlReply::Message(None) => println!("no chats to post into"),
        ControlReply::Message(Some(message)) => {
            println!("#{} [{}] {}: {}", message.id, message.chat_id, message.sender, message.body)
        }
        ControlReply::Status(status) => println!(
            "running={} clients={} port={}",
            status.running, status.client_count, status.port
        ),
        ControlReply::Chats(chats) => {
            for chat in chats {
                println!(
                    "{:>5}  {:<28} unread={:<4} last={}",
                    chat.id, chat.title, chat.unread_count, chat.last_message_at
                );
            }
        }
        ControlReply::Messages(messages) => {
            for message in messages {
                println!("{:>7}  {}  {}: {}", message.id, message.ts, message.sender, message.body);
            }
        }
    }
}

async fn log_client_events(client: Arc<SimulationClient>) {
    let mut events = client.subscribe();
    loop {
        match events.recv().await {
            Ok(ClientEvent::Connected) => log::info!("Client connected to {}", client.url()),
            Ok(ClientEvent::Disconnected { reason }) => {
                log::info!("Client disconnected: {}", reason.as_deref().unwrap_or("requested"))
            }
            Ok(ClientEvent::Reconnecting { attempt, delay }) => {
                log::info!("Client reconnecting in {delay:?} (attempt {attempt})")
            }
            Ok(ClientEvent::Simulation(SimulationEvent::NewMessage { message, chat_title })) => {
                let unread = client
                    .feed()
                    .await
                    .chat(message.chat_id)
                    .map_or(0, |chat| chat.unread_count);
                log::debug!("New message in {chat_title} from {} (unread {unread})", message.sender);
            }
            Ok(ClientEvent::Simulation(event)) => log::debug!("Server event: {}", event.kind()),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Client event log skipped {skipped} events")
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
