//! pathwarp binary
//!
//! Runs the control daemon or talks to a running one.
//!
//! ## Usage
//!
//! ```bash
//! # Run the daemon
//! pathwarp serve [--debug 2] [--admin-uid 0] [--config engine.toml]
//!
//! # Administer it
//! pathwarp add /system/xbin/su /data/adb/su
//! pathwarp add --dir /vendor/overlay /data/adb/overlay
//! pathwarp del /system/xbin/su
//! pathwarp block 10123
//! pathwarp list
//! pathwarp enable
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pathwarp_engine::Engine;
use pathwarp_server::constants::{DEFAULT_ADMIN_UID, DEFAULT_SOCKET_PATH};
use pathwarp_server::{ControlClient, ControlServer, ServerConfig};
use pathwarp_types::RuleFlags;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Path redirection control.
#[derive(Parser, Debug)]
#[command(name = "pathwarp")]
#[command(about = "Path redirection and virtual directory injection control")]
struct Args {
    /// Control socket
    #[arg(long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control daemon
    Serve {
        /// Verbosity 0..=2, used when RUST_LOG is unset
        #[arg(long)]
        debug: Option<u8>,

        /// Uid allowed on the socket besides root
        #[arg(long, default_value_t = DEFAULT_ADMIN_UID)]
        admin_uid: u32,

        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where to persist the enable switch
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Do not persist the enable switch
        #[arg(long, conflicts_with = "state_file")]
        no_state: bool,
    },
    /// Redirect a virtual path to a real one
    Add {
        virtual_path: String,
        real_path: String,
        /// The virtual path is a directory
        #[arg(long)]
        dir: bool,
        /// Raw flag bits
        #[arg(long, default_value_t = 0)]
        flags: u32,
    },
    /// Remove a redirection
    Del { virtual_path: String },
    /// Remove every rule, blocked uid, and injected entry
    Clear,
    /// Make the engine ignore a uid
    Block { uid: u32 },
    /// Stop ignoring a uid
    Unblock { uid: u32 },
    /// Print rules as real->virtual
    List,
    Enable,
    Disable,
    /// Invalidate cached resolution for every rule
    Refresh,
    /// Print 1 if enabled, 0 otherwise
    Status,
    Version,
}

fn default_level(debug: Option<u8>) -> &'static str {
    match debug {
        None => "info",
        Some(0) => "warn",
        Some(1) => "info",
        Some(_) => "debug",
    }
}

fn init_tracing(debug: Option<u8>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(debug)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Serve {
            debug,
            admin_uid,
            config,
            state_file,
            no_state,
        } => {
            init_tracing(debug);
            let mut server_config = ServerConfig::production();
            server_config.socket_path = args.socket;
            server_config.admin_uid = admin_uid;
            if config.is_some() {
                server_config.engine_config = config;
            }
            if no_state {
                server_config.state_file = None;
            } else if state_file.is_some() {
                server_config.state_file = state_file;
            }
            run_server(server_config).await
        }
        command => {
            init_tracing(Some(0));
            let mut client = ControlClient::connect(&args.socket)
                .await
                .with_context(|| format!("connecting to {}", args.socket.display()))?;
            run_command(&mut client, command).await
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let engine_config = config
        .load_engine_config()
        .context("loading engine config")?;
    let engine = Arc::new(Engine::with_local_host(engine_config));
    let socket_path = config.socket_path.clone();
    let server = ControlServer::new(config, engine);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting pathwarp");
    let result = tokio::select! {
        result = server.run() => result.context("control server failed"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };
    let _ = std::fs::remove_file(&socket_path);
    result
}

async fn run_command(client: &mut ControlClient, command: Command) -> Result<()> {
    match command {
        Command::Serve { .. } => anyhow::bail!("serve is not a client command"),
        Command::Add {
            virtual_path,
            real_path,
            dir,
            flags,
        } => {
            let mut flags = RuleFlags::from_bits_retain(flags);
            if dir {
                flags |= RuleFlags::DIRECTORY;
            }
            client.add_rule(&virtual_path, &real_path, flags.bits()).await?;
        }
        Command::Del { virtual_path } => client.del_rule(&virtual_path).await?,
        Command::Clear => client.clear().await?,
        Command::Block { uid } => client.block_uid(uid).await?,
        Command::Unblock { uid } => client.unblock_uid(uid).await?,
        Command::List => {
            let (records, truncated) = client.list().await?;
            for record in records {
                println!("{}", record);
            }
            if truncated {
                eprintln!("(listing truncated)");
            }
        }
        Command::Enable => client.enable().await?,
        Command::Disable => client.disable().await?,
        Command::Refresh => client.refresh().await?,
        Command::Status => println!("{}", u8::from(client.status().await?)),
        Command::Version => println!("{}", client.version().await?),
    }
    Ok(())
}
