use std::path::PathBuf;

use clap::Args;
use supportflow_agent::AgentRuntime;
use supportflow_core::config::ConfigOverrides;
use supportflow_core::domain::ticket::CustomerInfo;
use supportflow_core::pipeline::UpdatePolicy;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[arg(long, help = "Customer name used in the reply salutation")]
    pub name: Option<String>,
    #[arg(long, help = "Customer email address")]
    pub email: Option<String>,
    #[arg(long, help = "Free-form support request text")]
    pub query: Option<String>,
    #[arg(long, help = "low | normal | medium | high (anything else becomes normal)")]
    pub priority: Option<String>,
    #[arg(long = "ticket-id", help = "Ticket identifier echoed in the final payload")]
    pub ticket_id: Option<String>,
    #[arg(long, help = "Seed the decision score for a reproducible run")]
    pub seed: Option<u64>,
    #[arg(long = "update-policy", value_parser = parse_update_policy, help = "restate | verify")]
    pub update_policy: Option<UpdatePolicy>,
    #[arg(long, help = "Print the run id and full ticket state, including the ability log")]
    pub trace: bool,
}

impl RunArgs {
    fn customer(&self) -> CustomerInfo {
        CustomerInfo {
            name: self.name.clone(),
            email: self.email.clone(),
            query: self.query.clone(),
            priority: self.priority.clone(),
            ticket_id: self.ticket_id.clone(),
            ..CustomerInfo::default()
        }
    }
}

fn parse_update_policy(value: &str) -> Result<UpdatePolicy, String> {
    UpdatePolicy::parse(value)
        .ok_or_else(|| format!("unsupported update policy `{value}` (expected restate|verify)"))
}

pub fn run(config_path: Option<PathBuf>, args: RunArgs) -> CommandResult {
    let overrides = ConfigOverrides {
        seed: args.seed,
        update_policy: args.update_policy,
        ..ConfigOverrides::default()
    };
    let config = match load_config("run", config_path, overrides) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    crate::init_logging(&config);

    let runtime = match AgentRuntime::from_config(&config) {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("run", "runtime_init", error.to_string(), 3);
        }
    };

    match runtime.handle_ticket(args.customer()) {
        Ok(outcome) if args.trace => CommandResult::json("run", &outcome, 0),
        Ok(outcome) => CommandResult::json("run", &outcome.payload, 0),
        Err(error) => {
            let interface = error.into_interface("run");
            CommandResult::failure("run", interface.error_class(), interface.to_string(), 4)
        }
    }
}
