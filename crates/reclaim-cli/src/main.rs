use anyhow::{Context, Result};
use clap::Parser;
use reclaim_config::{init_tracing, ReclaimConfig};
use reclaim_memory::{
    format_process_table, format_snapshot, top_processes, Capabilities, HelperLauncher,
    MemoryCleaner, MemoryProbe, MemorySnapshot, NullAccelerator, ProcessInfo, SystemProbe,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "reclaim",
    version,
    about = "Check process memory and force the OS to reclaim freed pages"
)]
struct Cli {
    /// Print memory status and the largest processes, without cleaning anything
    #[arg(long, conflicts_with = "cleanup")]
    check: bool,
    /// Run one full cleanup cycle without prompting
    #[arg(long)]
    cleanup: bool,
    /// Emit JSON suitable for scripts
    #[arg(long)]
    json: bool,
    /// Config file (defaults to `reclaim.toml` discovery in the current directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of processes listed by `--check`
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Check,
    Cleanup,
    Exit,
    Interrupted,
    Invalid,
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    if cli.check {
        return run_check(cli.top, cli.json);
    }
    if cli.cleanup {
        return run_cleanup(&config, cli.json);
    }

    print_menu();
    match read_menu_choice()? {
        MenuChoice::Check => run_check(cli.top, cli.json),
        MenuChoice::Cleanup => run_cleanup(&config, cli.json),
        MenuChoice::Exit => {
            println!("Exiting.");
            Ok(0)
        }
        MenuChoice::Interrupted => {
            println!();
            println!("Interrupted.");
            Ok(0)
        }
        MenuChoice::Invalid => {
            println!("Invalid option.");
            Ok(1)
        }
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<ReclaimConfig> {
    if let Some(path) = explicit {
        return ReclaimConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()));
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    let (config, _path) = reclaim_config::load_for_dir(&cwd)
        .with_context(|| format!("loading config for {}", cwd.display()))?;
    Ok(config)
}

#[derive(Serialize)]
struct CheckOutput {
    snapshot: MemorySnapshot,
    top_processes: Vec<ProcessInfo>,
}

fn run_check(top: usize, json: bool) -> Result<i32> {
    let probe = SystemProbe::new(Arc::new(NullAccelerator));
    let output = CheckOutput {
        snapshot: probe.capture(),
        top_processes: top_processes(top),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", format_snapshot("CURRENT RAM STATUS", &output.snapshot));
        print!("{}", format_process_table(&output.top_processes));
    }
    Ok(0)
}

fn run_cleanup(config: &ReclaimConfig, json: bool) -> Result<i32> {
    let helper = config
        .helper
        .launcher()
        .map(|launcher| Arc::new(launcher) as Arc<dyn HelperLauncher>);
    if helper.is_none() {
        tracing::info!(target = "reclaim.cli", "trim helper not found; helper tier unavailable");
    }

    let cleaner = MemoryCleaner::new(Capabilities::standalone().with_helper(helper));
    let report = cleaner.cleanup(&config.cleanup);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(0)
}

fn print_menu() {
    println!("Reclaim memory tool");
    println!("  1. Check RAM only");
    println!("  2. Force cleanup RAM");
    println!("  3. Exit");
    print!("Select option (1-3): ");
    let _ = std::io::stdout().flush();
}

fn parse_choice(line: &str) -> MenuChoice {
    match line.trim() {
        "1" => MenuChoice::Check,
        "2" => MenuChoice::Cleanup,
        "3" => MenuChoice::Exit,
        _ => MenuChoice::Invalid,
    }
}

/// Read one menu line, racing stdin against Ctrl-C. EOF counts as an interrupt.
fn read_menu_choice() -> Result<MenuChoice> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let choice: Result<MenuChoice> = runtime.block_on(async {
        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|n| (n, line))
        });

        tokio::select! {
            read = read => match read.context("stdin reader task failed")? {
                Ok((0, _)) => Ok(MenuChoice::Interrupted),
                Ok((_, line)) => Ok(parse_choice(&line)),
                Err(err) => Err(anyhow::Error::new(err).context("reading menu choice")),
            },
            _ = tokio::signal::ctrl_c() => Ok(MenuChoice::Interrupted),
        }
    });

    // The blocking stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_background();
    choice
}
