//! Runs a training, inference or tuning job
//!
//! # Usage
//! ```sh
//! cargo run -- -h
//! cargo run --bin init_checkpoint -- --network vgg_19_mini --output vgg.json
//! cargo run -- --feature-net-path vgg.json --style-image-path style.png --dataset-dir data
//! cargo run -- --mode infer --callbacks infer_basic,infer_style_transfer
//! cargo run -- --inputter toy2d --modeler classification --network mlp --mode tune
//! ```

use clap::Parser;
use modular_dl::{app, config::Config, registry::Components};

fn main() {
    env_logger::init();

    let config = Config::parse();
    match app::run(&config, &Components::default()) {
        Ok(summary) => log::info!(
            "Done at step {}, final loss {:?}, mean loss {:?}",
            summary.global_step,
            summary.final_loss,
            summary.mean_loss
        ),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
