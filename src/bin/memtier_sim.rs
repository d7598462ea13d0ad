//! memtier-sim - run the placement engine over a synthetic workload
//!
//! Usage: memtier-sim [OPTIONS] [CONFIG]
//!
//! Reports are printed once per cycle. SIGHUP re-reads CONFIG at the start
//! of the next cycle; Ctrl-C stops after the current one.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use memtier::sim::{SimWorld, WorkloadConfig};
use memtier::{signal, CycleController, TierConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Text,
    Json,
}

struct Options {
    config: Option<PathBuf>,
    cycles: Option<u64>,
    output: Output,
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args[1..]) {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            print_usage();
            return ExitCode::from(2);
        }
    };

    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[Sim] {:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut options = Options {
        config: None,
        cycles: None,
        output: Output::Text,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(None);
            }
            "-V" | "--version" => {
                println!("memtier-sim {}", memtier::VERSION);
                return Ok(None);
            }
            "-n" | "--cycles" => {
                i += 1;
                let value = args.get(i).context("--cycles needs a value")?;
                options.cycles = Some(value.parse().with_context(|| format!("bad cycle count {:?}", value))?);
            }
            "--json" => options.output = Output::Json,
            arg if arg.starts_with('-') => bail!("unknown option {}", arg),
            path => {
                if options.config.is_some() {
                    bail!("more than one config file given");
                }
                options.config = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }
    Ok(Some(options))
}

fn run(options: Options) -> anyhow::Result<()> {
    let (config, workload) = match &options.config {
        Some(path) => (
            TierConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            WorkloadConfig::load(path).with_context(|| format!("loading workload from {}", path.display()))?,
        ),
        None => (TierConfig::default(), WorkloadConfig::default()),
    };
    log::info!("Starting memtier-sim v{}", memtier::VERSION);

    let topology = config.topology()?;
    let mut controller = CycleController::new(config, options.config.clone())?;
    let world = SimWorld::build(&workload, &topology)?;
    let memory = world.attach(&mut controller)?;

    signal::install_sighup(&controller.reload_flag())?;
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("[Sim] interrupt, stopping after this cycle");
            stop.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl-C handler")?;
    }

    let output = options.output;
    let cycles = controller.run_until(&stop, options.cycles, |report| match output {
        Output::Json => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => log::error!("[Sim] report serialization failed: {}", e),
        },
        Output::Text => print!("{}", report.render_text()),
    })?;

    log::info!("[Sim] {} cycles, final placement {:?}", cycles, memory.census());
    controller.shutdown();
    Ok(())
}

fn print_usage() {
    println!("memtier-sim - tiered memory placement over a synthetic workload");
    println!();
    println!("USAGE:");
    println!("    memtier-sim [OPTIONS] [CONFIG]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Show this help message");
    println!("    -V, --version       Show version information");
    println!("    -n, --cycles <N>    Stop after N cycles (default: until Ctrl-C)");
    println!("        --json          Print reports as JSON");
    println!();
    println!("CONFIG is a TOML file with [scan], [policy], [migration], [numa]");
    println!("and [workload] sections. SIGHUP reloads it between cycles.");
}
