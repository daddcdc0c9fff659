use anyhow::{bail, Context};
use clap::Parser;
use clrstack::config::Config;
use clrstack::dump::{self, DumpReport};
use clrstack::process::TargetProcess;
use clrstack::target::linux::unwind::UnwindStrategy;
use clrstack::target::linux::LinuxTarget;
use clrstack::target::{Pid, SymbolPath};
use log::{debug, warn};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pid of a running process
    #[arg(required_unless_present = "launch")]
    pid: Option<i32>,

    /// Start a program (with its arguments), dump it and kill it
    #[arg(
        long,
        num_args = 1..,
        value_name = "PROGRAM",
        allow_hyphen_values = true,
        conflicts_with = "pid"
    )]
    launch: Vec<String>,

    /// Time given to a launched program before a dump
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    /// Configuration file, `~/.config/clrstack/config.toml` is used by default
    #[arg(long, env = "CLRSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Symbol search path, like "/opt/syms;SRV*/var/cache/syms*https://msdl.microsoft.com/download/symbols"
    #[arg(long)]
    symbol_path: Option<SymbolPath>,

    /// Stack unwinder: frame-pointer or libunwind
    #[arg(long)]
    unwinder: Option<UnwindStrategy>,

    /// Directory with runtime perf maps (perf-<pid>.map)
    #[arg(long)]
    perf_map_dir: Option<PathBuf>,

    /// Print managed frames only
    #[arg(long)]
    managed_only: bool,
}

fn main() {
    env_logger::Builder::from_default_env().init();

    let args = Args::parse();
    let code = match run(args) {
        Ok(report) => {
            print!("{}", report.text);
            if report.succeeded {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> anyhow::Result<DumpReport> {
    let config = Config::load(args.config.as_deref())?;

    let mut options = config.dump_options()?;
    if let Some(symbol_path) = args.symbol_path {
        options.symbol_path = symbol_path;
    }
    if args.managed_only {
        options.include_internal_frames = false;
    }

    let mut target = LinuxTarget::default();
    if let Some(dir) = args.perf_map_dir.or(config.perf_map_dir) {
        target = target.with_perf_map_dir(dir);
    }
    if let Some(unwind) = args.unwinder.or(config.unwinder) {
        target = target.with_unwind_strategy(unwind);
    }

    if let Some(pid) = args.pid {
        let process = TargetProcess::from_pid(Pid::from_raw(pid))?;
        return Ok(dump::dump_threads_with(&target, &process, &options)?);
    }

    let Some((program, program_args)) = args.launch.split_first() else {
        bail!("either a pid or a program to launch must be set");
    };

    let mut child = Command::new(program)
        .args(program_args)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("launch {program}"))?;
    debug!(target: "dump", "launched {program} with pid {}", child.id());

    thread::sleep(Duration::from_millis(args.wait_ms));

    let report = TargetProcess::from_child(&child)
        .and_then(|process| dump::dump_threads_with(&target, &process, &options));

    if let Err(e) = child.kill() {
        warn!(target: "dump", "kill launched program: {e}");
    }
    if let Err(e) = child.wait() {
        warn!(target: "dump", "wait launched program: {e}");
    }

    Ok(report?)
}
