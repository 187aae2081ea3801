mod interactive;
mod script;

use std::{fs::File, io::Read, path::PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use memsim::{
    config::SimConfig,
    memory::PagedMemory,
    sim::Simulator,
};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

use crate::script::Runner;

/// runs when no script is given
pub(crate) const DEFAULT_SCENARIO: &str = "\
# write, then read the value back
write 0x00000000 0x12345678
read 0x00000000
expect 0x12345678
# an untouched address misses every level and reads as zero
read 0x00001000
expect 0x00000000
# now it is cached
read 0x00001000
write 0x00001000 0x87654321
read 0x00001000
expect 0x87654321
# read and write in the same cycle is refused without side effects
read+write 0x00000000 0xdeadbeef
read 0x00000000
expect 0x12345678
";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// drive the hierarchy with a stimulus script
    Run(RunArgs),
    /// print the effective configuration as JSON
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// File path to a JSON configuration (defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    delegate: ConfigArgs,
    /// File path to stimulus script (built-in scenario when omitted)
    #[arg(short, long)]
    script: Option<PathBuf>,
    /// Enable interactive mode
    #[arg(long)]
    interactive: bool,
    /// Print pins on every cycle
    #[arg(long)]
    trace: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Run(RunArgs {
            delegate: ConfigArgs { config },
            script,
            interactive,
            trace,
            verbose,
        }) => {
            if verbose {
                env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                    .init();
            } else {
                env_logger::init();
            }
            let config = read_config(config)?;
            let mut sim = Simulator::new(&config)?;
            sim.set_trace(trace);
            let mut runner = Runner::new(sim);
            if interactive {
                interactive::execute_interactive(&mut runner)?;
            } else {
                let script = match script {
                    Some(p) => read_to_string(p)?,
                    None => DEFAULT_SCENARIO.to_string(),
                };
                runner.run_script(&script)?;
            }
            log::info!("finished after {} cycles.", runner.sim().cycle());
            output_stat(runner.sim());
            Ok(())
        }
        Command::Config(ConfigArgs { config }) => {
            env_logger::init();
            let config = read_config(config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "stat"))]
pub(crate) fn print_stat(_: &Simulator<PagedMemory>) {
    println!("statistics are not collected in this build");
}

#[cfg(feature = "stat")]
pub(crate) fn print_stat(sim: &Simulator<PagedMemory>) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    println!("{}", sim.collect_stat().view(max_width));
}

#[cfg(not(feature = "stat"))]
fn output_stat(_: &Simulator<PagedMemory>) {}

#[cfg(feature = "stat")]
fn output_stat(sim: &Simulator<PagedMemory>) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    log::info!("statistics:\n{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

fn read_config(config: Option<PathBuf>) -> Result<SimConfig> {
    let config = match config {
        Some(p) => {
            let file = File::open(p)?;
            SimConfig::deser(file)?
        }
        None => Default::default(),
    };
    Ok(config)
}

fn read_to_string(path: PathBuf) -> Result<String> {
    let mut buf = String::new();
    let mut file = File::open(path)?;
    file.read_to_string(&mut buf)?;
    Ok(buf)
}
