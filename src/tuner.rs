//! Grid search over learning rate and L2 weight decay

use crate::{
    app::build_runner,
    config::{Config, Mode},
    error::Error,
    registry::Components,
    runner::RunSummary,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub learning_rate: f32,
    pub l2_weight_decay: f32,
    pub summary: RunSummary,
}

impl Trial {
    pub fn name(&self) -> String {
        trial_name(self.learning_rate, self.l2_weight_decay)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TuneReport {
    pub trials: Vec<Trial>,
}

impl TuneReport {
    /// Trial with the lowest mean loss, trials without a loss are ignored
    pub fn best(&self) -> Option<&Trial> {
        self.trials
            .iter()
            .filter_map(|t| t.summary.mean_loss.filter(|l| l.is_finite()).map(|l| (l, t)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, t)| t)
    }
}

fn trial_name(learning_rate: f32, l2_weight_decay: f32) -> String {
    format!("lr_{}_l2_{}", learning_rate, l2_weight_decay)
}

/// Trains once per `(learning_rate, l2_weight_decay)` pair, each trial in its own
/// subdirectory of `model_dir`
pub fn tune(config: &Config, components: &Components) -> Result<TuneReport, Error> {
    let mut report = TuneReport::default();
    let n_trials = config.tune_learning_rates.len() * config.tune_l2_weight_decays.len();
    for &learning_rate in &config.tune_learning_rates {
        for &l2_weight_decay in &config.tune_l2_weight_decays {
            let name = trial_name(learning_rate, l2_weight_decay);
            let mut trial_config = config.clone();
            trial_config.mode = Mode::Tune;
            trial_config.learning_rate = learning_rate;
            trial_config.l2_weight_decay = l2_weight_decay;
            trial_config.model_dir = config.model_dir.join(&name);

            log::info!(
                "Trial {}/{}: {}",
                report.trials.len() + 1,
                n_trials,
                name
            );
            let summary = build_runner(&trial_config, components)?.run()?;
            log::info!(
                "Trial {} finished at step {} with mean loss {:?}",
                name,
                summary.global_step,
                summary.mean_loss
            );
            report.trials.push(Trial {
                learning_rate,
                l2_weight_decay,
                summary,
            });
        }
    }

    match report.best() {
        Some(best) => log::info!(
            "Best trial {} with mean loss {:?}",
            best.name(),
            best.summary.mean_loss
        ),
        None => log::warn!("No trial reported a loss"),
    }
    Ok(report)
}
