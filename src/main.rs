//! `courier`: send, stream and receive envelopes with the delivery-resilience core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

use a2a_courier::config::{load_config, CourierConfig};
use a2a_courier::envelope::Envelope;
use a2a_courier::http::{InboundServer, InboundState};
use a2a_courier::lifecycle::{spawn_signal_listener, Shutdown};
use a2a_courier::observability::{logging, metrics};
use a2a_courier::replay::{InMemoryNonceStore, ReplayValidator};
use a2a_courier::resilience::{destination_key, CircuitBreakerRegistry, RetrySender};
use a2a_courier::transport::{AckAwareTransport, ReqwestTransport};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Resilient agent-to-agent envelope delivery", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// POST one envelope with retries and circuit breaking
    Send(EnvelopeArgs),
    /// Send one envelope over WebSocket and wait for its ack
    Stream {
        #[command(flatten)]
        envelope: EnvelopeArgs,
        /// Give up waiting for the ack after this many seconds
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,
    },
    /// Run the inbound endpoint and log accepted envelopes
    Listen {
        /// Override `listener.bind_address`
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[derive(Args)]
struct EnvelopeArgs {
    /// Peer URL (http(s):// for send, ws(s):// for stream)
    #[arg(short, long)]
    url: Url,
    #[arg(long, default_value = "courier-cli")]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long = "type", default_value = "task.request")]
    payload_type: String,
    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,
    /// Attach a single-use nonce
    #[arg(long)]
    nonce: bool,
}

impl EnvelopeArgs {
    fn build(&self) -> Result<Envelope, serde_json::Error> {
        let payload: Value = serde_json::from_str(&self.payload)?;
        let envelope = Envelope::new(&self.from, &self.to, &self.payload_type, payload);
        Ok(if self.nonce { envelope.with_nonce() } else { envelope })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => CourierConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    match cli.command {
        Commands::Send(args) => send(&config, &args, &shutdown).await,
        Commands::Stream { envelope, wait_secs } => {
            stream(&config, &envelope, Duration::from_secs(wait_secs), &shutdown).await
        }
        Commands::Listen { bind } => listen(&config, bind, &shutdown).await,
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn send(
    config: &CourierConfig,
    args: &EnvelopeArgs,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let envelope = args.build()?;
    let sender = RetrySender::from_config(
        Arc::new(ReqwestTransport::default()),
        &config.retry,
        &config.circuit_breaker,
        Arc::new(CircuitBreakerRegistry::new()),
    )
    .with_cancellation(shutdown.token());

    let response = sender.send_envelope(args.url.clone(), &envelope).await?;
    tracing::info!(message_id = %envelope.id, status = %response.status, "Delivered");
    println!("{} {}", response.status, response.text());
    Ok(())
}

async fn stream(
    config: &CourierConfig,
    args: &EnvelopeArgs,
    wait: Duration,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let envelope = args.build()?;
    let message_id = envelope.id.clone();

    let registry = CircuitBreakerRegistry::new();
    let breaker = config
        .circuit_breaker
        .enabled
        .then(|| registry.breaker_for(&destination_key(&args.url), &config.circuit_breaker));

    let (transport, mut inbound) = AckAwareTransport::connect(&args.url, &config.ack, breaker).await?;
    transport.send(envelope).await?;

    let token = shutdown.token();
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    let acked = loop {
        tokio::select! {
            _ = poll.tick() => {
                if !transport.is_pending(&message_id) {
                    break true;
                }
            }
            Some(reply) = inbound.recv() => {
                println!("{}", serde_json::to_string(&reply)?);
            }
            _ = &mut deadline => break false,
            _ = token.cancelled() => break false,
        }
    };

    transport.close().await;
    if acked {
        tracing::info!(message_id = %message_id, "Acknowledged");
        Ok(())
    } else {
        Err(format!("no ack for {message_id}").into())
    }
}

async fn listen(
    config: &CourierConfig,
    bind: Option<String>,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut listener_config = config.listener.clone();
    if let Some(bind) = bind {
        listener_config.bind_address = bind;
    }

    let listener = TcpListener::bind(&listener_config.bind_address).await?;
    let (tx, mut rx) = mpsc::channel(listener_config.delivery_buffer);
    let validator = ReplayValidator::from_config(&config.replay, Arc::new(InMemoryNonceStore::new()));
    let server = InboundServer::new(listener_config, InboundState::new(validator, tx));

    let consumer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            tracing::info!(
                message_id = %envelope.id,
                sender = %envelope.sender,
                payload_type = %envelope.payload_type,
                "Received envelope"
            );
            match serde_json::to_string(&envelope) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "Failed to encode envelope"),
            }
        }
    });

    server.run(listener, shutdown.token()).await?;
    // Upgraded sockets can outlive graceful shutdown and keep the channel open.
    if tokio::time::timeout(Duration::from_secs(5), consumer).await.is_err() {
        tracing::warn!("Consumer did not drain in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
