use compass::run_fit::*;
use compass::run_sim::*;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fit the responder mixture model to paired stimulated and
    /// unstimulated cell-subset counts
    Fit(FitArgs),

    /// Simulate paired counts with known responders
    Simulate(SimArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args.clone())?;
        }
        Commands::Simulate(args) => {
            run_sim_compass_data(args.clone())?;
        }
    }

    Ok(())
}
