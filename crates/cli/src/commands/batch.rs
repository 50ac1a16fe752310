use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use supportflow_agent::AgentRuntime;
use supportflow_core::config::ConfigOverrides;
use supportflow_core::domain::ticket::{CustomerInfo, FinalPayload};

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    #[arg(long, help = "JSON file holding an array of ticket input records")]
    pub file: PathBuf,
    #[arg(long, help = "Base seed; ticket i draws from seed + i")]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum BatchEntry {
    Completed(FinalPayload),
    Failed { ticket_index: usize, error_class: String, message: String },
}

pub fn run(config_path: Option<PathBuf>, args: BatchArgs) -> CommandResult {
    let overrides = ConfigOverrides { seed: args.seed, ..ConfigOverrides::default() };
    let config = match load_config("batch", config_path, overrides) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    crate::init_logging(&config);

    let tickets = match read_tickets(&args.file) {
        Ok(tickets) => tickets,
        Err(error) => {
            return CommandResult::failure("batch", "input", format!("{error:#}"), 4);
        }
    };

    let agent = match AgentRuntime::from_config(&config) {
        Ok(agent) => agent,
        Err(error) => {
            return CommandResult::failure("batch", "runtime_init", error.to_string(), 3);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "batch",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let results = runtime.block_on(agent.handle_batch(tickets));
    let mut failed = false;
    let entries: Vec<_> = results
        .into_iter()
        .enumerate()
        .map(|(ticket_index, result)| match result {
            Ok(outcome) => BatchEntry::Completed(outcome.payload),
            Err(error) => {
                failed = true;
                let interface = error.into_interface(format!("batch-{ticket_index}"));
                BatchEntry::Failed {
                    ticket_index,
                    error_class: interface.error_class().to_string(),
                    message: interface.to_string(),
                }
            }
        })
        .collect();

    CommandResult::json("batch", &entries, if failed { 5 } else { 0 })
}

fn read_tickets(path: &Path) -> anyhow::Result<Vec<CustomerInfo>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read ticket file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("ticket file `{}` is not a JSON array of tickets", path.display()))
}
