//! Assembles a job from the configured component names and runs it

use crate::{
    config::{Config, Mode},
    error::Error,
    registry::Components,
    runner::{RunSummary, Runner},
    tuner,
};

/// Builds every component by name, in dependency order. All names are resolved before
/// anything is built so an unknown name is reported ahead of any build failure.
pub fn build_runner(config: &Config, components: &Components) -> Result<Box<dyn Runner>, Error> {
    let build_augmenter = config
        .augmenter_name()
        .map(|name| components.augmenters.get(name))
        .transpose()?;
    let build_network = components.networks.get(&config.network)?;
    let build_callbacks = config
        .callbacks
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| components.callbacks.get(name))
        .collect::<Result<Vec<_>, _>>()?;
    let build_inputter = components.inputters.get(&config.inputter)?;
    let build_modeler = components.modelers.get(&config.modeler)?;
    let build_job_runner = components.runners.get(&config.runner)?;

    let inputter_config = config.inputter_config();
    let augmenter = build_augmenter
        .map(|build| build(&inputter_config))
        .transpose()?;
    let network = build_network(&config.network_config())?;
    let callback_config = config.callback_config();
    let callbacks = build_callbacks
        .into_iter()
        .map(|build| build(&callback_config))
        .collect::<Result<Vec<_>, Error>>()?;
    let inputter = build_inputter(&inputter_config, augmenter)?;
    let modeler = build_modeler(&config.modeler_config(), network, components)?;

    log::debug!(
        "Built {} runner: inputter {}, modeler {}, callbacks [{}]",
        config.runner,
        inputter.name(),
        modeler.name(),
        callbacks
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    build_job_runner(&config.runner_config(), inputter, modeler, callbacks)
}

/// Validates the config and runs the job. Tuning returns the best trial's summary.
pub fn run(config: &Config, components: &Components) -> Result<RunSummary, Error> {
    config.validate()?;
    log::info!("Running {} job", config.mode);
    match config.mode {
        Mode::Train | Mode::Infer => build_runner(config, components)?.run(),
        Mode::Tune => {
            let report = tuner::tune(config, components)?;
            report
                .best()
                .map(|trial| trial.summary)
                .ok_or_else(|| Error::InvalidState("no tuning trial reported a loss".into()))
        }
    }
}
