use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use airshare::error::Error;
use airshare::transfer::crypto::generate_passphrase;
use airshare::webrtc::Phase;
use airshare::{
    normalize_session_code, run_session, AirshareServer, Config, DirectorySink, OutgoingFile, ReceivedFile,
    RouterConfig, SessionEvent, SessionIntent, SessionOptions, WebRTCConfig,
};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "airshare")]
#[command(about = "Share files directly between two peers", long_about = None)]
struct Cli {
    /// Config file (default: ~/.airshare/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling relay and serve the web client
    Serve {
        #[arg(long)]
        addr: Option<String>,
        /// Directory with the web client's static files
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Host a session and send files to whoever joins it
    Send {
        /// Files to send, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Signaling server URL
        #[arg(long)]
        server: Option<String>,
        /// Session code to use instead of a generated one
        #[arg(long)]
        code: Option<String>,
        /// Encrypt files with a generated passphrase
        #[arg(long)]
        encrypt: bool,
        /// Encrypt files with this passphrase
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Join a session and save the files it receives
    Receive {
        /// Session code shown by the sender
        code: String,
        #[arg(long)]
        server: Option<String>,
        /// Download directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Passphrase for encrypted files
        #[arg(long)]
        passphrase: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "airshare=debug,airshare_relay=debug,webrtc=warn"
    } else {
        "airshare=info,airshare_relay=info,webrtc=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { addr, static_dir } => {
            let addr = addr.unwrap_or_else(|| config.server.effective_bind_address());
            let static_dir = static_dir.or_else(|| config.server.static_dir.as_ref().map(PathBuf::from));

            let mut server = AirshareServer::new(addr.clone()).with_router_config(RouterConfig {
                retention: config.server.retention(),
                sweep_interval: config.server.sweep_interval(),
            });
            if let Some(dir) = static_dir {
                server = server.with_static_dir(dir);
            }

            println!("Starting airshare relay on {}", addr);
            println!("Signaling: ws://{}", addr);
            println!("Health: http://{}/health", addr);
            server.run().await?;
        }
        Commands::Send { files, server, code, encrypt, passphrase } => {
            let mut outgoing = Vec::with_capacity(files.len());
            for path in &files {
                let file = OutgoingFile::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                outgoing.push(file);
            }

            let passphrase = match passphrase {
                Some(p) => Some(p),
                None if encrypt => Some(generate_passphrase()),
                None => None,
            };
            if let Some(p) = &passphrase {
                println!("Passphrase: {}", p);
            }

            let webrtc_config = client_config(&config, server);
            let intent = SessionIntent::Host { code: code.map(|c| normalize_session_code(&c)) };
            let options = SessionOptions { passphrase, ..Default::default() };
            run_cli_session(webrtc_config, intent, outgoing, options, None, None).await?;
        }
        Commands::Receive { code, server, output, passphrase } => {
            let code = normalize_session_code(&code);
            if !airshare_relay::is_valid_session_code(&code) {
                bail!("Invalid session code: {}", code);
            }

            let dir = output.unwrap_or_else(|| PathBuf::from(&config.transfer.download_dir));
            let webrtc_config = client_config(&config, server);
            run_cli_session(
                webrtc_config,
                SessionIntent::Join { code },
                Vec::new(),
                SessionOptions::default(),
                Some(DirectorySink::new(dir)),
                passphrase,
            )
            .await?;
        }
    }

    Ok(())
}

fn client_config(config: &Config, server: Option<String>) -> WebRTCConfig {
    let mut webrtc_config = WebRTCConfig::from(&config.client);
    if let Some(url) = server {
        webrtc_config.signaling_url = url;
    }
    webrtc_config
}

async fn run_cli_session(
    config: WebRTCConfig,
    intent: SessionIntent,
    outgoing: Vec<OutgoingFile>,
    options: SessionOptions,
    sink: Option<DirectorySink>,
    mut passphrase: Option<String>,
) -> Result<()> {
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let session = tokio::spawn(async move { run_session(&config, intent, outgoing, options, event_tx).await });

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::SessionCreated { code } => {
                println!("Session code: {}", code);
                println!("Waiting for a peer to join...");
            }
            SessionEvent::SessionJoined { code, .. } => println!("Joined session {}", code),
            SessionEvent::PeerJoined { .. } => println!("Peer joined, connecting..."),
            SessionEvent::PhaseChanged(Phase::Connected) => println!("Connected"),
            SessionEvent::PhaseChanged(_) => {}
            SessionEvent::PeerLeft { .. } => println!("Peer left"),
            SessionEvent::SendProgress { name, sent, total } => progress(&name, sent, total),
            SessionEvent::FileSent(meta) => {
                eprintln!();
                println!("Sent {} ({} bytes)", meta.name, meta.size);
            }
            SessionEvent::ReceiveStarted(meta) => println!("Receiving {} ({} bytes)", meta.name, meta.size),
            SessionEvent::ReceiveProgress { name, received, total } => progress(&name, received, total),
            SessionEvent::FileReceived(file) => {
                eprintln!();
                if let Some(sink) = &sink {
                    save_received(sink, file, &mut passphrase).await?;
                }
            }
            SessionEvent::SessionLost => eprintln!("Lost connection to the signaling server"),
            SessionEvent::Warning(msg) => eprintln!("Warning: {}", msg),
            SessionEvent::Failed(msg) => eprintln!("Failed: {}", msg),
        }
    }

    session.await.context("Session task panicked")??;
    println!("Done");
    Ok(())
}

fn progress(name: &str, done: u64, total: u64) {
    let percent = if total == 0 { 100 } else { done * 100 / total };
    eprint!("\r{}: {}% ({}/{} bytes)", name, percent, done, total);
    let _ = std::io::stderr().flush();
}

/// Decrypt if needed, asking again on a wrong passphrase, then write to disk
async fn save_received(sink: &DirectorySink, file: ReceivedFile, passphrase: &mut Option<String>) -> Result<()> {
    let name = file.metadata.name.clone();
    if !file.metadata.encrypted {
        let path = sink.store(&name, &file.data).await?;
        println!("Saved {}", path.display());
        return Ok(());
    }

    loop {
        let candidate = match passphrase.take() {
            Some(p) => p,
            None => match prompt(&format!("Passphrase for {} (empty to skip): ", name)).await? {
                Some(p) => p,
                None => {
                    println!("Skipped {}", name);
                    return Ok(());
                }
            },
        };

        match file.open(Some(&candidate)) {
            Ok(data) => {
                let path = sink.store(&name, &data).await?;
                println!("Saved {}", path.display());
                *passphrase = Some(candidate);
                return Ok(());
            }
            Err(Error::InvalidPassphrase) => eprintln!("Invalid passphrase"),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn prompt(message: &str) -> Result<Option<String>> {
    print!("{}", message);
    std::io::stdout().flush()?;
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    let line = line.trim().to_string();
    Ok((!line.is_empty()).then_some(line))
}
