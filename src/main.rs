use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bihttp::{BiHttpClient, ClientConfig, ClientError, ClientId, ServerConfig, SessionRegistry, server};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Parser, Debug)]
#[command(name = "bihttp", about = "Full-duplex JSON messaging over an HTTP GET/POST pair")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the echo + broadcast demo server.
    Serve(ServeArgs),
    /// Connect, send a few greetings, print what comes back.
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "PORT", default_value_t = bihttp::config::DEFAULT_PORT)]
    port: u16,
}

#[derive(Args, Debug)]
struct ClientArgs {
    #[arg(long, env = "BIHTTP_URL", default_value = "http://127.0.0.1:8080/")]
    url: String,

    #[arg(long, default_value_t = 5, help = "Number of greetings to send")]
    count: u32,

    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Client(args) => run_client(args).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// =============================================================================
// SERVE
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), CliError> {
    let registry = SessionRegistry::new(ServerConfig::from_env());

    let replies = registry.clone();
    registry.on_message(move |message: &Value, client_id: &ClientId| {
        tracing::info!(%client_id, %message, "received");

        let echo = json!({
            "type": "echo",
            "originalMessage": message,
            "timestamp": now_millis(),
        });
        replies.send_message(client_id, &echo);

        let broadcast = json!({
            "type": "broadcast",
            "from": client_id,
            "content": message,
        });
        replies.broadcast_message(&broadcast);
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| CliError::Bind { addr, source })?;

    tracing::info!(%addr, endpoint = %registry.config().endpoint, "bihttp listening");
    server::serve(listener, registry, async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("failed to listen for ctrl-c; serving until killed");
            std::future::pending::<()>().await;
        }
    })
    .await
    .map_err(CliError::Serve)
}

// =============================================================================
// CLIENT
// =============================================================================

async fn run_client(args: ClientArgs) -> Result<(), CliError> {
    let client = BiHttpClient::with_config(&args.url, ClientConfig::from_env())?;
    client.on_message(|message| println!("{message}"));

    client.connect().await?;
    tracing::info!(client_id = ?client.client_id(), "connected");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    for counter in 1..=args.count {
        ticker.tick().await;
        if !client.is_connected() {
            tracing::warn!("connection lost");
            break;
        }
        let greeting = json!({
            "type": "greeting",
            "message": "Hello from client",
            "counter": counter,
            "timestamp": now_millis(),
        });
        if !client.send_message(&greeting) {
            tracing::warn!(counter, "send failed");
        }
    }

    // Give the last echo time to arrive.
    tokio::time::sleep(Duration::from_millis(args.interval_ms.min(1000))).await;
    client.disconnect();
    Ok(())
}
