//! FlexDB server entry point.
//!
//! Parses the command line, recovers state (snapshot first, then AOF
//! replay), starts the background tasks, and runs the accept loop until a
//! shutdown signal arrives.

use flexdb::commands::{CommandRegistry, ServerContext};
use flexdb::connection::{handle_connection, ConnectionStats};
use flexdb::persistence::{snapshot, AofLog, SnapshotWriter, SyncPolicy, SIGNAL_QUEUE_SIZE};
use flexdb::storage::{ExpirySweeper, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration.
struct Config {
    /// Port to listen on
    port: u16,
    /// Snapshot file path
    db_file: PathBuf,
    /// Whether the append-only log is enabled
    aof_enabled: bool,
    /// Append-only log path
    aof_file: PathBuf,
    /// AOF fsync policy
    aof_sync: SyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: flexdb::DEFAULT_PORT,
            db_file: PathBuf::from(flexdb::DEFAULT_DB_FILE),
            aof_enabled: false,
            aof_file: PathBuf::from(flexdb::DEFAULT_AOF_FILE),
            aof_sync: SyncPolicy::EverySecond,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments.
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--db" => {
                    if i + 1 < args.len() {
                        config.db_file = PathBuf::from(&args[i + 1]);
                        i += 2;
                    } else {
                        eprintln!("Error: --db requires a value");
                        std::process::exit(1);
                    }
                }
                "--aof" => {
                    config.aof_enabled = true;
                    i += 1;
                }
                "--aof-file" => {
                    if i + 1 < args.len() {
                        config.aof_file = PathBuf::from(&args[i + 1]);
                        i += 2;
                    } else {
                        eprintln!("Error: --aof-file requires a value");
                        std::process::exit(1);
                    }
                }
                "--aof-sync" => {
                    if i + 1 < args.len() {
                        config.aof_sync =
                            SyncPolicy::parse(&args[i + 1]).unwrap_or_else(|| {
                                eprintln!(
                                    "Error: --aof-sync must be one of always, everysec, no"
                                );
                                std::process::exit(1);
                            });
                        i += 2;
                    } else {
                        eprintln!("Error: --aof-sync requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlexDB version {}", flexdb::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn print_help() {
    println!(
        r#"
FlexDB - An In-Memory Key-Value Database with Durable Persistence

USAGE:
    flexdb [OPTIONS]

OPTIONS:
    -p, --port <PORT>       Port to listen on (default: 9000)
        --db <PATH>         Snapshot file path (default: data.json)
        --aof               Enable the append-only log (default: off)
        --aof-file <PATH>   Append-only log path (default: flexdb.aof)
        --aof-sync <MODE>   AOF fsync policy: always, everysec, no
                            (default: everysec)
    -v, --version           Print version information
        --help              Print this help message

CONNECTING:
    Both protocols share the port. Use redis-cli for RESP:
    $ redis-cli -p 9000
    or netcat for plain text:
    $ nc localhost 9000
    > SET name harsh
    OK
    > GET name
    harsh
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // Bootstrap, in strict order: empty store, AOF install, snapshot
    // load, AOF replay, then the background tasks, then the listener.
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_SIZE);
    let store = Arc::new(Store::new(signal_tx));

    let aof = if config.aof_enabled {
        match AofLog::open(&config.aof_file, config.aof_sync) {
            Ok(aof) => {
                store.install_aof(Arc::clone(&aof));
                info!(path = %config.aof_file.display(), "AOF enabled");
                Some(aof)
            }
            Err(e) => {
                // Degrade to snapshot-only durability rather than refusing
                // to serve.
                warn!(path = %config.aof_file.display(), error = %e, "failed to open AOF, continuing without it");
                None
            }
        }
    } else {
        None
    };

    match snapshot::load(&store, &config.db_file) {
        Ok(loaded) if loaded > 0 => info!(keys = loaded, "snapshot loaded"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "snapshot unreadable, starting empty"),
    }

    if let Some(aof) = &aof {
        match aof.replay(&store) {
            Ok(applied) if applied > 0 => info!(commands = applied, "AOF replayed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "AOF replay failed, continuing with snapshot state"),
        }
    }

    let _writer = SnapshotWriter::start(
        Arc::clone(&store),
        config.db_file.clone(),
        signal_rx,
    );
    let _sweeper = ExpirySweeper::start(Arc::clone(&store));

    let ctx = Arc::new(ServerContext {
        store: Arc::clone(&store),
        db_path: config.db_file.clone(),
        aof,
    });
    let registry = Arc::new(CommandRegistry::new());
    let stats = Arc::new(ConnectionStats::new());

    let listener = match TcpListener::bind(config.bind_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.bind_address(), error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(addr = %config.bind_address(), "FlexDB listening");

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("shutdown signal received, stopping server");
    };

    tokio::select! {
        _ = accept_loop(listener, ctx, registry, stats) => {}
        _ = shutdown => {}
    }

    // Closing the listener ended the accept loop; force a final snapshot
    // so nothing since the last debounced save is lost.
    if let Err(e) = snapshot::save(&store, &config.db_file) {
        warn!(error = %e, "final snapshot save failed");
    }

    info!("server shutdown complete");
    Ok(())
}

/// Accepts connections forever, one task per client.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let ctx = Arc::clone(&ctx);
                let registry = Arc::clone(&registry);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    handle_connection(stream, addr, ctx, registry, stats).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}
