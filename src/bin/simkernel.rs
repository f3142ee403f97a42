//! SimKernel CLI
//!
//! Starts the simulated kernel and reads commands from stdin.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session with a 200ms tick
//! simkernel --tick-ms 200
//!
//! # Preload a workload
//! simkernel --batch workload.txt
//!
//! # Write the default configuration file
//! simkernel init
//! ```

use simkernel::{AccessMode, Kernel, KernelConfig, KernelError, PcbView};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SimKernel - simulated single-core kernel
#[derive(Parser)]
#[command(name = "simkernel")]
#[command(version)]
#[command(about = "Simulated priority scheduler and paged virtual memory", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SIMKERNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Tick length in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Seed for the I/O request generator
    #[arg(long)]
    seed: Option<u64>,

    /// Batch workload to run at startup
    #[arg(short, long, value_name = "FILE")]
    batch: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the kernel and the command loop
    Run,
    /// Write the default configuration
    Init {
        /// Output file (platform config dir if omitted)
        output: Option<PathBuf>,
    },
}

/// Command loop directive
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Spawn { handle: u32, priority: Option<u32>, time_limit: Option<u32> },
    Done { handle: u32 },
    MemAccess { handle: u32, mode: AccessMode, address: u64 },
    Protect { handle: u32, page: usize, read: bool, write: bool },
    Procs { detailed: bool },
    Mem,
    Batch { path: PathBuf },
    Help,
    Exit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = fields.split_first() else {
            return Ok(None);
        };

        let command = match (name, args) {
            ("spawn", [handle, rest @ ..]) if rest.len() <= 2 => Command::Spawn {
                handle: arg(handle, "handle")?,
                priority: rest.first().map(|p| arg(p, "priority")).transpose()?,
                time_limit: rest.get(1).map(|t| arg(t, "time limit")).transpose()?,
            },
            ("done", [handle]) => Command::Done { handle: arg(handle, "handle")? },
            ("memaccess", [handle, mode, address]) => Command::MemAccess {
                handle: arg(handle, "handle")?,
                mode: mode.parse()?,
                address: parse_address(address)?,
            },
            ("protect", [handle, page, perms]) => Command::Protect {
                handle: arg(handle, "handle")?,
                page: arg(page, "page")?,
                read: perms.contains('r'),
                write: perms.contains('w'),
            },
            ("procs", []) => Command::Procs { detailed: false },
            ("procs", ["-d"]) => Command::Procs { detailed: true },
            ("mem", []) => Command::Mem,
            ("batch", [path]) => Command::Batch { path: PathBuf::from(path) },
            ("help", []) => Command::Help,
            ("exit" | "quit", []) => Command::Exit,
            _ => return Err(format!("Unrecognized command: {} (try 'help')", line.trim())),
        };

        Ok(Some(command))
    }
}

fn arg<T: std::str::FromStr>(field: &str, what: &str) -> Result<T, String> {
    field.parse().map_err(|_| format!("Invalid {}: {}", what, field))
}

fn parse_address(field: &str) -> Result<u64, String> {
    let parsed = match field.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => field.parse(),
    };
    parsed.map_err(|_| format!("Invalid address: {}", field))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(KernelConfig::default_path);
    let mut config = if config_path.exists() {
        KernelConfig::load(&config_path)?
    } else {
        KernelConfig::default()
    };
    if let Some(ms) = cli.tick_ms {
        config.tick = Duration::from_millis(ms);
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    // Setup logging
    let log_level = match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    match cli.command {
        Some(Commands::Init { output }) => run_init(output),
        Some(Commands::Run) | None => run(config, cli.batch).await,
    }
}

/// Write the default configuration
fn run_init(output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = output.unwrap_or_else(KernelConfig::default_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    KernelConfig::default().save(&path)?;
    info!("Created configuration at {}", path.display());
    Ok(())
}

/// Run the kernel and the command loop
async fn run(config: KernelConfig, batch: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut kernel = Kernel::new(config)?;
    kernel.start();

    if let Some(path) = batch {
        if let Err(e) = kernel.run_batch_file(&path).await {
            error!("Batch {} failed: {}", path.display(), e);
        }
    }

    println!("SimKernel {} ready. Type 'help' for commands.", simkernel::VERSION);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match Command::parse(&line) {
            Ok(Some(Command::Exit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&kernel, command).await {
                    eprintln!("error: {}", e);
                }
            }
            Ok(None) => {}
            Err(msg) => eprintln!("{}", msg),
        }
    }

    kernel.stop().await;
    info!("Kernel stopped.");
    Ok(())
}

async fn execute(kernel: &Kernel, command: Command) -> Result<(), KernelError> {
    match command {
        Command::Spawn { handle, priority, time_limit } => {
            let config = kernel.config();
            let pid = kernel.register_with(
                handle,
                priority.unwrap_or(config.default_priority),
                time_limit.unwrap_or(config.default_time_limit),
            )?;
            println!("[{}] -> pid {}", handle, pid);
        }
        Command::Done { handle } => {
            let freed = kernel.retire(handle)?;
            println!("[{}] done, {} frame(s) freed", handle, freed);
        }
        Command::MemAccess { handle, mode, address } => {
            let access = kernel.memory_access(handle, mode, address).await?;
            let t = access.translation;
            let frame = t.frame.map_or_else(|| "-".to_string(), |f| f.to_string());
            let source = match (t.tlb_hit, t.fault) {
                (true, _) => "TLB hit".to_string(),
                (false, Some(kind)) => format!("{} fault", kind),
                (false, None) => "TLB miss".to_string(),
            };
            println!(
                "pid {} page {} offset {} -> frame {} ({}) {:?}",
                t.pid, t.page, access.offset, frame, source, access.outcome
            );
        }
        Command::Protect { handle, page, read, write } => {
            kernel.protect(handle, page, read, write)?;
        }
        Command::Procs { detailed } => print_procs(kernel, detailed),
        Command::Mem => print_memory(kernel),
        Command::Batch { path } => {
            let pids = kernel.run_batch_file(&path).await?;
            println!("Batch created {} process(es)", pids.len());
        }
        Command::Help => print_help(),
        Command::Exit => {}
    }
    Ok(())
}

fn print_procs(kernel: &Kernel, detailed: bool) {
    let snapshot = kernel.snapshot();

    if let Some(running) = snapshot.running {
        println!("Running:");
        print_row(&running, detailed);
    }
    for (title, rows) in [("Ready", &snapshot.ready), ("Waiting", &snapshot.waiting)] {
        println!("{} ({}):", title, rows.len());
        for view in rows {
            print_row(view, detailed);
        }
    }

    let handles = kernel.handles();
    if detailed && !handles.is_empty() {
        println!("Handles:");
        for (handle, pid) in handles {
            println!("  {:>6} -> {}", handle, pid);
        }
    }
}

fn print_row(view: &PcbView, detailed: bool) {
    if detailed {
        println!(
            "  pid {:>3}  {:<10} prio {:>2}  used {:>3}/{:<3} io {:<5} children {}",
            view.pid, view.state, view.priority, view.ticks_used, view.time_limit,
            view.io_requested, view.children
        );
    } else {
        println!("  pid {:>3}  {:<10} prio {:>2}", view.pid, view.state, view.priority);
    }
}

fn print_memory(kernel: &Kernel) {
    let snapshot = kernel.memory_snapshot();

    println!("Frames ({}/{} occupied):", snapshot.occupied(), snapshot.frames.len());
    for frame in snapshot.frames.iter().filter(|f| f.occupied) {
        match frame.owner {
            Some(owner) => println!("  frame {:>3}: pid {} page {}", frame.index, owner.pid, owner.page),
            None => println!("  frame {:>3}: unowned", frame.index),
        }
    }

    println!("TLB:");
    for (slot, entry) in &snapshot.tlb {
        println!(
            "  slot {:>2}: pid {} page {} -> frame {} (uses {})",
            slot, entry.pid, entry.page, entry.frame, entry.use_counter
        );
    }

    let stats = snapshot.tlb_stats;
    println!(
        "TLB hits {} misses {} ratio {:.2}",
        stats.hits, stats.misses, stats.hit_ratio()
    );
}

fn print_help() {
    println!("Commands:");
    println!("  spawn <handle> [prio] [limit]    create a tracked process");
    println!("  done <handle>                    release its memory");
    println!("  memaccess <handle> <r|w> <addr>  translate an address");
    println!("  protect <handle> <page> <rw|r|w|->  set page permissions");
    println!("  procs [-d]                       list processes");
    println!("  mem                              show frames and TLB");
    println!("  batch <file>                     run a batch workload");
    println!("  help                             this text");
    println!("  exit                             stop the kernel");
}
