use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Value, json};
use vatwarden_core::IdentityRecord;
use vatwarden_wire::{Endpoint, call};

#[derive(Parser)]
#[command(name = "vatwarden")]
#[command(about = "Administrative CLI for a running vat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sturdy ref of the vat's admin capability
    #[arg(long, env = "VATWARDEN_ADMIN")]
    admin: String,

    /// Seconds to wait for the vat to answer
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset the vat's liveness deadline
    Heartbeat,
    /// Change the liveness timeout; 0 disables it
    SetTimeout {
        #[arg(allow_negative_numbers = true)]
        seconds: i64,
    },
    /// Ask the vat to shut down gracefully
    Stop,
    /// List the identities of the vat's services
    Identities,
    /// Replace the identity of one service
    UpdateIdentity {
        #[arg(long)]
        old_id: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Deserialize)]
struct Infos {
    infos: Vec<IdentityRecord>,
}

impl Commands {
    /// Admin method and params for this command.
    fn request(&self) -> (&'static str, Value) {
        match self {
            Commands::Heartbeat => ("heartbeat", Value::Null),
            Commands::SetTimeout { seconds } => ("setTimeout", json!({ "seconds": seconds })),
            Commands::Stop => ("stop", Value::Null),
            Commands::Identities => ("identities", Value::Null),
            Commands::UpdateIdentity {
                old_id,
                id,
                name,
                description,
            } => (
                "updateIdentity",
                json!({
                    "oldId": old_id,
                    "newInfo": IdentityRecord::new(id.as_str(), name.as_str(), description.as_str()),
                }),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let endpoint = Endpoint::parse(&cli.admin)?;
    let (method, params) = cli.command.request();
    let result = call(&endpoint, method, params, Duration::from_secs(cli.timeout)).await?;

    match cli.command {
        Commands::Heartbeat => println!("Heartbeat sent to {}", endpoint.address()),
        Commands::SetTimeout { seconds } => println!("Timeout set to {}s", seconds.max(0)),
        Commands::Stop => println!("Stop requested, the vat exits after its grace period"),
        Commands::Identities => {
            let Infos { infos } = serde_json::from_value(result)?;
            println!("{:<38} {:<20} {:<30}", "ID", "Name", "Description");
            println!("{}", "-".repeat(88));
            for info in infos {
                println!("{:<38} {:<20} {:<30}", info.id, info.name, info.description);
            }
        }
        Commands::UpdateIdentity { old_id, .. } => println!("Identity update sent for: {}", old_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["vatwarden", "--admin", "jrpc://127.0.0.1:9000/admin"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn negative_timeouts_reach_the_vat_unchanged() {
        let cli = parse(&["set-timeout", "-5"]);
        assert_eq!(cli.command.request(), ("setTimeout", json!({ "seconds": -5 })));
    }

    #[test]
    fn update_identity_uses_the_admin_field_names() {
        let cli = parse(&["update-identity", "--old-id", "a", "--id", "b", "--name", "B"]);
        let (method, params) = cli.command.request();
        assert_eq!(method, "updateIdentity");
        assert_eq!(params["oldId"], "a");
        assert_eq!(params["newInfo"], json!({ "id": "b", "name": "B", "description": "" }));
    }

    #[test]
    fn plain_commands_send_no_params() {
        for (args, method) in [(["heartbeat"], "heartbeat"), (["stop"], "stop"), (["identities"], "identities")] {
            assert_eq!(parse(&args).command.request(), (method, Value::Null));
        }
    }
}
