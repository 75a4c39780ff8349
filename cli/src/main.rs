//! Porthog CLI - Find and safely kill processes on network ports
//!
//! A command-line tool for listing socket bindings with their owning
//! processes, killing the owner of a port, and probing for free ports.

mod commands;
mod render;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use porthog_core::{ConfigStore, Filter, PortRange, Protocol, SocketState, SortField};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use commands::Context;
use render::Format;

#[derive(Parser)]
#[command(name = "porthog")]
#[command(author, version, about = "Find and safely kill processes on network ports")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output in JSON format
    #[arg(long, global = true, conflicts_with = "plain")]
    json: bool,

    /// Output tab-separated lines without a header
    #[arg(long, global = true)]
    plain: bool,

    /// Give up on a single operation after this many seconds
    #[arg(long, global = true, default_value_t = 10, value_name = "SECS")]
    timeout: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    /// Only TCP sockets
    #[arg(long, conflicts_with = "udp")]
    tcp: bool,

    /// Only UDP sockets
    #[arg(long)]
    udp: bool,

    /// Filter by local port (repeatable)
    #[arg(short, long = "port", value_name = "PORT")]
    ports: Vec<u16>,

    /// Filter by local port range, e.g. 3000-3999
    #[arg(long, value_name = "A-B")]
    range: Option<PortRange>,

    /// Filter by owning PID (repeatable)
    #[arg(long = "pid", value_name = "PID")]
    pids: Vec<i32>,

    /// Filter by socket state, e.g. listen (repeatable)
    #[arg(long = "state", value_name = "STATE")]
    states: Vec<SocketState>,
}

impl FilterArgs {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if self.tcp {
            filter = filter.protocol(Protocol::Tcp);
        }
        if self.udp {
            filter = filter.protocol(Protocol::Udp);
        }
        for &port in &self.ports {
            filter = filter.port(port);
        }
        if let Some(range) = self.range {
            filter = filter.range(range);
        }
        for &pid in &self.pids {
            filter = filter.pid(pid);
        }
        for &state in &self.states {
            filter = filter.state(state);
        }
        filter
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List socket bindings and their owning processes
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// Sort order: port, pid, name or proto
        #[arg(long, default_value = "port")]
        sort: SortField,

        /// Also show full command lines
        #[arg(long)]
        cmdline: bool,
    },

    /// Kill the process listening on a port
    Kill {
        /// Port number whose owner should be killed
        port: u32,

        /// Target a UDP socket instead of TCP
        #[arg(long)]
        udp: bool,

        /// Force kill (SIGKILL) without graceful shutdown
        #[arg(short, long)]
        force: bool,

        /// Allow killing critical system processes
        #[arg(long)]
        force_system: bool,

        /// Identify and check the target without sending a signal
        #[arg(long)]
        dry_run: bool,
    },

    /// Find ports nothing is bound to
    Free {
        /// Search UDP ports instead of TCP
        #[arg(long)]
        udp: bool,

        /// Range to search (default 1024-65535)
        #[arg(long, value_name = "A-B")]
        range: Option<PortRange>,

        /// How many ports to return
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Periodically reprint the binding table until Ctrl-C
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// Refresh interval in seconds (default from config)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, ctx: Context) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::List {
            filter,
            sort,
            cmdline,
        }) => commands::list::run(&ctx, &filter.to_filter(), sort, cmdline).await,
        Some(Commands::Kill {
            port,
            udp,
            force,
            force_system,
            dry_run,
        }) => {
            let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };
            let policy = porthog_core::SignalPolicy {
                force,
                force_system,
                dry_run,
            };
            commands::kill::run(&ctx, port, protocol, policy).await
        }
        Some(Commands::Free { udp, range, count }) => {
            let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };
            commands::free::run(&ctx, protocol, range, count).await
        }
        Some(Commands::Watch { filter, interval }) => {
            let interval = interval.map(Duration::from_secs);
            commands::watch::run(&ctx, &filter.to_filter(), interval).await
        }
        Some(Commands::Config { init }) => commands::config::run(&ctx, init).await,
        None => {
            commands::list::run(&ctx, &Filter::new(), SortField::Port, false).await
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let setup = async {
        let store = ConfigStore::new()?;
        let config = store.load().await?;
        Ok::<_, porthog_core::Error>((store, config))
    };
    let (store, config) = match setup.await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let format = Format::resolve(cli.json, cli.plain, config.default_output_format);
    let ctx = Context {
        store,
        config,
        format,
        timeout: Duration::from_secs(cli.timeout.max(1)),
        shutdown,
    };

    match run(cli, ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
