//! Writes a freshly initialised network checkpoint, e.g. a feature net for
//! `--feature-net-path`

use std::path::PathBuf;

use clap::Parser;
use modular_dl::{
    checkpoint::Checkpoint, config::NetworkConfig, error::Error, registry::Components,
};

#[derive(Parser)]
#[clap(about)]
struct Args {
    #[clap(long, default_value = "vgg_19_mini")]
    network: String,
    #[clap(long, short)]
    output: PathBuf,
    #[clap(long, default_value_t = 4)]
    base_width: usize,
    #[clap(long, default_value_t = 3)]
    image_depth: usize,
    #[clap(long, default_value_t = 10)]
    hidden_units: usize,
    #[clap(long, default_value_t = 0)]
    seed: u64,
}

fn run(args: &Args) -> Result<usize, Error> {
    let config = NetworkConfig {
        image_depth: args.image_depth,
        base_width: args.base_width,
        hidden_units: args.hidden_units,
        num_classes: 2,
        seed: args.seed,
    };
    let net = (Components::default().networks.get(&args.network)?)(&config)?;
    let variables = net.variables();
    Checkpoint::from_variables(&variables, 0).save(&args.output)?;
    Ok(variables.len())
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    match run(&args) {
        Ok(n) => log::info!(
            "Wrote {} variables of {} to {}",
            n,
            args.network,
            args.output.display()
        ),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
