//! Rivulet: a single-threaded RESP key-value server.
//!
//! This is the main entry point for the rivulet server.

use anyhow::Context;
use rivulet::{Config, Server, VERSION};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("rivulet version {VERSION}");
        return Ok(());
    }

    // File first, then command line overrides.
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    for (directive, value) in &cli.overrides {
        config
            .apply_directive(directive, value, 0)
            .with_context(|| format!("invalid --{directive} value: {value}"))?;
    }

    init_logging(&config)?;

    // One reactor owns all state; a current-thread runtime is all it needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        version = VERSION,
        bind = %config.bind,
        port = config.port,
        replicaof = ?config.replicaof,
        "rivulet starting"
    );

    let server = Server::bind(config).await.context("starting server")?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received shutdown signal");
        shutdown.notify_one();
    });

    server.run().await?;
    info!("bye");
    Ok(())
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.as_filter()));

    if let Some(logfile) = &config.logfile {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)
            .with_context(|| format!("opening log file {}", logfile.display()))?;

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(file)
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
    Ok(())
}

/// CLI arguments
#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    /// Config directives given on the command line, in order
    overrides: Vec<(&'static str, String)>,
    help: bool,
    version: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        let directive = match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a file")?;
                cli.config = Some(PathBuf::from(path));
                i += 1;
                continue;
            }
            "--help" | "-h" => {
                cli.help = true;
                i += 1;
                continue;
            }
            "--version" | "-v" => {
                cli.version = true;
                i += 1;
                continue;
            }
            "--replicaof" => {
                // Either one quoted "<host> <port>" or two tokens.
                let first = args.get(i + 1).context("--replicaof needs <host> <port>")?;
                let value = if first.contains(char::is_whitespace) {
                    i += 2;
                    first.clone()
                } else {
                    let port = args.get(i + 2).context("--replicaof needs <host> <port>")?;
                    i += 3;
                    format!("{first} {port}")
                };
                cli.overrides.push(("replicaof", value));
                continue;
            }
            "--port" | "-p" => "port",
            "--bind" | "-b" => "bind",
            "--maxclients" => "maxclients",
            "--hz" => "hz",
            "--loglevel" => "loglevel",
            "--logfile" => "logfile",
            arg => anyhow::bail!("Unknown option: {arg} (see --help)"),
        };
        let value = args
            .get(i + 1)
            .with_context(|| format!("{} needs a value", args[i]))?;
        cli.overrides.push((directive, value.clone()));
        i += 2;
    }

    Ok(cli)
}

fn print_help() {
    println!(
        r#"rivulet {VERSION} - a single-threaded RESP key-value server

USAGE:
    rivulet-server [OPTIONS]

OPTIONS:
    -c, --config <FILE>          Load configuration from file
    -p, --port <PORT>            Set the server port (default: 6379)
    -b, --bind <ADDR>            Set the bind address (default: 127.0.0.1)
        --replicaof <HOST PORT>  Run as a replica of the given primary
        --maxclients <N>         Maximum number of connected clients
        --hz <N>                 Timer frequency (default: 10)
        --loglevel <LEVEL>       debug, verbose, notice or warning
        --logfile <FILE>         Log to a file instead of stdout
    -h, --help                   Print this help
    -v, --version                Print the version

Command line options override the configuration file. RUST_LOG overrides
the log level."#
    );
}
