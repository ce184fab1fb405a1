use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stun_trace::correlator::describe_attributes;
use stun_trace::stun::DEFAULT_PORT;
use stun_trace::{
    decode_session, init_logging, AuditSink, BindingServer, ClientMetadata, CorrelationStore,
    Correlator, CsvAuditLog, IceConfiguration, MemoryAuditLog, Message, ServerConfig, VERSION,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "STUN binding responder with SDP candidate tracing", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the responder and the expiry sweep until Ctrl-C
    Serve(ServeArgs),
    /// Decode a base64 payload from a report or the audit log
    Decode {
        /// Standard base64 of the raw STUN message
        payload: String,
    },
    /// Print the iceServers JSON a browser on ORIGIN should use
    IceConfig {
        /// Value of the Origin header, e.g. https://example.org:8443
        #[arg(long)]
        origin: Option<String>,

        #[arg(long, default_value_t = DEFAULT_PORT)]
        stun_port: u16,

        /// Used when the origin is missing or unusable
        #[arg(long)]
        fallback: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address (IP:port)
    #[arg(short, long, default_value = "0.0.0.0:3478")]
    listen: SocketAddr,

    /// Seconds an unclaimed request is kept
    #[arg(long, default_value_t = 60)]
    ttl: u64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 2)]
    collect_interval: u64,

    /// Append matched requests to this CSV file
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// SOFTWARE attribute sent in responses
    #[arg(long)]
    software: Option<String>,

    /// Read SDP sessions from stdin (separated by blank lines) and correlate them
    #[arg(long)]
    sdp_stdin: bool,

    /// User-Agent recorded for sessions read from stdin
    #[arg(long, default_value = "")]
    user_agent: String,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,
}

impl ServeArgs {
    fn config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            listen_addr: self.listen,
            entry_ttl: Duration::from_secs(self.ttl),
            collect_interval: Duration::from_secs(self.collect_interval),
            audit_log: self.audit_log.clone(),
            software: self.software.clone().unwrap_or(defaults.software),
            ice_fallback: defaults.ice_fallback,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Decode { payload } => decode(&payload),
        Command::IceConfig {
            origin,
            stun_port,
            fallback,
        } => {
            let fallback = fallback.unwrap_or_else(|| ServerConfig::default().ice_fallback);
            let config = IceConfiguration::for_origin(origin.as_deref(), stun_port, &fallback);
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.config();
    config.validate()?;

    info!("stun-trace v{}", VERSION);

    let store = Arc::new(CorrelationStore::new(config.entry_ttl));
    let audit: Arc<dyn AuditSink> = match &config.audit_log {
        Some(path) => Arc::new(
            CsvAuditLog::open(path).with_context(|| format!("Failed to open log {}", path.display()))?,
        ),
        None => Arc::new(MemoryAuditLog::new()),
    };

    let server = BindingServer::bind(config.listen_addr, Arc::clone(&store))
        .await
        .with_context(|| format!("Failed to bind udp on {}", config.listen_addr))?
        .with_software(config.software.clone());
    let server = Arc::new(server);

    let token = CancellationToken::new();
    let collector = store.spawn_collector(config.collect_interval, token.clone());

    let mut server_task = {
        let server = Arc::clone(&server);
        let token = token.clone();
        tokio::spawn(async move { server.run(token).await })
    };

    if args.sdp_stdin {
        let correlator = Correlator::new(Arc::clone(&store), audit);
        let client = ClientMetadata::from_user_agent(&args.user_agent);
        let token = token.clone();
        let json = args.json;
        tokio::spawn(async move {
            if let Err(e) = correlate_stdin(correlator, client, json, token).await {
                error!("stdin: {}", e);
            }
        });
    }

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        joined = &mut server_task => Some(joined),
    };

    let result = match finished {
        Some(joined) => joined?,
        None => {
            info!("Shutting down");
            token.cancel();
            server_task.await?
        }
    };

    token.cancel();
    collector.await?;

    info!("server stats: {:?}", server.stats().snapshot());
    info!("store stats: {:?}", store.stats().snapshot());

    result?;
    Ok(())
}

/// Blank-line separated SDP bodies from stdin, one report each
async fn correlate_stdin(
    correlator: Correlator,
    client: ClientMetadata,
    json: bool,
    token: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut body = Vec::new();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let eof = line.is_none();

        if let Some(line) = line {
            if !line.trim().is_empty() {
                body.extend_from_slice(line.as_bytes());
                body.extend_from_slice(b"\r\n");
                continue;
            }
        }

        if !body.is_empty() {
            match decode_session(&body) {
                Ok(session) => {
                    let report = correlator.correlate(&session, &client);
                    if json {
                        println!("{}", report.to_json()?);
                    } else {
                        print!("{}", report);
                    }
                }
                Err(e) => warn!("stdin: failed to decode sdp session: {}", e),
            }
            body.clear();
        }

        if eof {
            break;
        }
    }

    Ok(())
}

fn decode(payload: &str) -> Result<()> {
    let raw = STANDARD
        .decode(payload.trim())
        .context("payload is not valid base64")?;
    let message = Message::decode(&raw).context("payload is not a STUN message")?;

    println!("{}", message);
    for attr in describe_attributes(&message) {
        println!("  {}: {} (len={})", attr.attr_type, attr.value, attr.length);
    }
    match message.verify_fingerprint() {
        Some(true) => println!("fingerprint: valid"),
        Some(false) => println!("fingerprint: MISMATCH"),
        None => {}
    }
    println!("crc64: {}", stun_trace::audit::crc64(message.raw()));

    Ok(())
}
