use std::path::PathBuf;

use supportflow_core::config::ConfigOverrides;
use supportflow_core::pipeline::{DispatchCondition, StageRegistry};

use crate::commands::{load_config, CommandResult};

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let config = match load_config("stages", config_path, ConfigOverrides::default()) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    match config.registry() {
        Ok(registry) => {
            let source = if config.stages.is_some() { "config file" } else { "canonical" };
            CommandResult::success("stages", render(&registry, source))
        }
        Err(error) => CommandResult::failure("stages", "config_validation", error.to_string(), 2),
    }
}

pub fn render(registry: &StageRegistry, source: &str) -> String {
    let mut lines = vec![format!("stage registry ({source}, {} stages):", registry.len())];
    for (index, stage) in registry.stages().iter().enumerate() {
        let abilities = stage
            .abilities
            .iter()
            .map(|binding| match binding.condition {
                DispatchCondition::Always => format!("{}@{}", binding.ability, binding.provider),
                condition => format!("{}@{} [{condition}]", binding.ability, binding.provider),
            })
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "{:>2}. {} ({}): {abilities}",
            index + 1,
            stage.name,
            stage.mode.as_str()
        ));
    }
    lines.join("\n")
}
