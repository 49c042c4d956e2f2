use clap::{Parser, Subcommand};

use phasegate::config::Config;
use phasegate::simulate::{self, SimulationOptions, SimulationReport};
use phasegate::{plog, Error, Result};

/// Phasegate - diagnostics for the phase-gated workflow bridge
#[derive(Parser, Debug)]
#[command(name = "phasegate")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    PHASEGATE_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.phasegate/phasegate.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Drive simulated requests through a filter on a pool of host threads
    Simulate {
        /// Number of concurrent requests (defaults to the config value)
        #[arg(short = 'n', long)]
        requests: Option<usize>,

        /// Number of host threads (defaults to the config value)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// Report an action failure on every request
        #[arg(long)]
        fail_action: bool,

        /// Report a result failure on every request
        #[arg(long)]
        fail_result: bool,

        /// Mark reported failures as already handled
        #[arg(long)]
        handled: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(Error::NoHomeDir) => Config::default(),
        Err(e) => return Err(e),
    };
    if cli.debug {
        config.debug = true;
    }
    config.validate()?;
    phasegate::log::init_with_config(&config);

    match cli.command {
        Command::Simulate {
            requests,
            threads,
            fail_action,
            fail_result,
            handled,
            json,
        } => {
            let mut options = SimulationOptions::from_config(&config.simulation);
            if let Some(requests) = requests {
                options.requests = requests;
            }
            if let Some(threads) = threads {
                options.host_threads = threads;
            }
            options.fail_action = fail_action;
            options.fail_result = fail_result;
            options.handled = handled;
            run_simulate(&options, json)
        }
        Command::Config => run_config(&config),
    }
}

fn run_simulate(options: &SimulationOptions, json: bool) -> Result<()> {
    plog!("Simulate command: {:?}", options);
    let report = simulate::run(options)?;
    if json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &SimulationReport) {
    println!(
        "Simulated {} request(s) on {} host thread(s)",
        report.requests.len(),
        report.options.host_threads
    );
    for request in &report.requests {
        println!(
            "  #{:<3} bridge {}  {:<17} {:<10} view data {}",
            request.request,
            request.bridge,
            request.watermark,
            request.status.to_string(),
            if request.view_data_visible {
                "visible"
            } else {
                "missing"
            }
        );
        println!("       calls: {}", request.hook_threads.join(" -> "));
        for entry in &request.journal {
            println!("       {}", entry);
        }
    }
    if report.all_completed() {
        println!("All workflows completed.");
    } else {
        println!("Some workflows did not complete.");
    }
}

fn run_config(config: &Config) -> Result<()> {
    plog!("Config command");
    if let Ok(path) = Config::config_path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
