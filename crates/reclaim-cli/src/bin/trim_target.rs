//! `reclaim-trim-target`: trim another process's working set and report the
//! result on stdout in the helper protocol.

use clap::{Parser, ValueEnum};
use reclaim_config::{init_tracing, ConfigError, LoggingConfig, ReclaimConfig};
use reclaim_memory::{
    helper_exit, helper_exit_code, list_processes, select_target, trim_target_default, NativeOs,
    OutputFormat, TargetRequest, TargetRule,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "reclaim-trim-target",
    version,
    about = "Trim the working set of another process"
)]
struct Args {
    /// Process to trim
    #[arg(long, conflicts_with = "auto")]
    pid: Option<u32>,
    /// Pick the host application (or the largest process) automatically
    #[arg(long)]
    auto: bool,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
    /// Interpreter executable name recognised by `--auto` (repeatable)
    #[arg(long = "interpreter", value_name = "NAME")]
    interpreters: Vec<String>,
    /// Command-line substring recognised by `--auto` (repeatable)
    #[arg(long = "marker", value_name = "TEXT")]
    markers: Vec<String>,
    /// Config file (defaults to `reclaim.toml` discovery in the current directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Machine,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Machine => OutputFormat::Machine,
        }
    }
}

impl Args {
    fn request(&self) -> Option<TargetRequest> {
        match (self.pid, self.auto) {
            (Some(pid), _) => Some(TargetRequest::Pid(pid)),
            (None, true) => Some(TargetRequest::Auto),
            (None, false) => None,
        }
    }

    /// `base` (the `[helper]` config) with any `--interpreter`/`--marker`
    /// flags replacing the matching list.
    fn rule(&self, base: TargetRule) -> TargetRule {
        let mut rule = base;
        if !self.interpreters.is_empty() {
            rule.interpreter_names = self.interpreters.clone();
        }
        if !self.markers.is_empty() {
            rule.markers = self.markers.clone();
        }
        rule
    }

    fn load_config(&self) -> Result<ReclaimConfig, ConfigError> {
        if let Some(path) = &self.config {
            return ReclaimConfig::load_from_path(path);
        }
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: ".".to_owned(),
            source,
        })?;
        reclaim_config::load_for_dir(&cwd).map(|(config, _path)| config)
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // `--help`/`--version` print to stdout and succeed; anything else
            // is a usage error.
            let _ = err.print();
            let code = if err.use_stderr() {
                helper_exit::NO_TARGET
            } else {
                0
            };
            std::process::exit(code);
        }
    };

    let config = match args.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(helper_exit::NO_TARGET);
        }
    };

    // stdout carries the protocol; diagnostics stay on stderr.
    init_tracing(&LoggingConfig {
        stderr: true,
        ..config.logging.clone()
    });

    std::process::exit(run(&args, &config));
}

fn run(args: &Args, config: &ReclaimConfig) -> i32 {
    let Some(request) = args.request() else {
        eprintln!("error: pass --pid <n> or --auto");
        return helper_exit::NO_TARGET;
    };

    let processes = match request {
        TargetRequest::Auto => list_processes(),
        TargetRequest::Pid(_) => Vec::new(),
    };
    let rule = args.rule(config.helper.target_rule());
    let (pid, selection) = match select_target(request, &processes, &rule) {
        Ok(target) => target,
        Err(err) => {
            eprintln!("error: {err}");
            return helper_exit::NO_TARGET;
        }
    };
    tracing::info!(target = "reclaim.helper", pid, selection = ?selection, "selected target");

    let result = trim_target_default(&NativeOs::new(), pid);
    print!("{}", result.render(args.format.into()));
    helper_exit_code(&result)
}
