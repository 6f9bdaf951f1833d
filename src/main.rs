//! nsgpush - push a JSON rule list to an Azure network security group
//!
//! # Usage
//!
//! ```bash
//! nsgpush apply -g rg001 -n test-nsg -l eastus2          # Push rules_list.json
//! nsgpush apply --rules edge.json --config prod.json     # Settings from a file
//! nsgpush preview --rules edge.json -l eastus2           # Print the request body only
//! nsgpush history --count 5                              # Recent apply attempts
//! ```
//!
//! Credentials come from `NSGPUSH_ACCESS_TOKEN` or the Azure CLI session
//! (`az login`).

use clap::{Args, Parser, Subcommand};
use nsgpush::audit::AuditLog;
use nsgpush::config::{self, FileConfig};
use nsgpush::core::apply;
use nsgpush::core::error::Error;
use nsgpush::utils::truncate_string;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "nsgpush")]
#[command(about = "Push a JSON firewall rule list to an Azure network security group", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the group's rules with the rules file and print the result
    Apply(TargetArgs),
    /// Translate the rules file and print the request body without sending it
    Preview {
        /// Rules file (default: rules_list.json)
        #[arg(short, long, value_name = "FILE")]
        rules: Option<PathBuf>,
        /// Region written into the request body
        #[arg(short, long)]
        location: Option<String>,
        /// Config file (default: the user config directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Show recent apply attempts
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Rules file (default: rules_list.json)
    #[arg(short, long, value_name = "FILE")]
    rules: Option<PathBuf>,
    /// Resource group holding the network security group
    #[arg(short = 'g', long)]
    resource_group: Option<String>,
    /// Network security group name
    #[arg(short, long)]
    name: Option<String>,
    /// Region, e.g. eastus2
    #[arg(short, long)]
    location: Option<String>,
    /// Subscription id (default: AZURE_SUBSCRIPTION_ID or the CLI session)
    #[arg(short, long)]
    subscription: Option<String>,
    /// Management endpoint
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    /// ARM api-version for Microsoft.Network
    #[arg(long)]
    api_version: Option<String>,
    /// Config file (default: the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl TargetArgs {
    fn overrides(&self) -> FileConfig {
        FileConfig {
            resource_group: self.resource_group.clone(),
            nsg_name: self.name.clone(),
            location: self.location.clone(),
            subscription_id: self.subscription.clone(),
            rules_file: self.rules.clone(),
            endpoint: self.endpoint.clone(),
            api_version: self.api_version.clone(),
            ..FileConfig::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // One request in flight at a time; no worker threads needed
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn report_error(e: &Error) {
    eprintln!("Error [{}]: {e}", e.category());
    if let Some(translation) = e.translation() {
        eprintln!("  {}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
        if let Some(url) = &translation.help_url {
            eprintln!("  See: {url}");
        }
    }
}

fn print_rules(rules: &[nsgpush::SecurityRule]) {
    println!("Rules added:");
    for rule in rules {
        println!("- {rule}");
    }
}

async fn handle_cli(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Apply(args) => {
            let file = config::load_config(args.config.as_deref()).await?;
            let config = file.merge(args.overrides()).into_apply_config()?;

            let prepared = apply::prepare(&config.rules_file, &config.location).await?;
            print_rules(&prepared.rules);

            let history = AuditLog::new()
                .map_err(|e| tracing::warn!("Apply history unavailable: {e}"))
                .ok();
            let token = apply::authenticate(&config, &prepared, history.as_ref()).await?;

            let outcome =
                apply::apply_prepared(&config, &prepared, &token, history.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.resource)?);
        }
        Commands::Preview {
            rules,
            location,
            config: config_path,
        } => {
            let file = config::load_config(config_path.as_deref()).await?;
            let rules_file = rules
                .or(file.rules_file)
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_RULES_FILE));
            let location = location.or(file.location).unwrap_or_default();

            let prepared = apply::prepare(&rules_file, &location).await?;
            print_rules(&prepared.rules);
            println!("{}", serde_json::to_string_pretty(&prepared.request)?);
        }
        Commands::History { count } => {
            let audit = AuditLog::new().map_err(|e| Error::io("state directory", e))?;
            let entries = audit
                .read_recent(count)
                .await
                .map_err(|e| Error::io(audit.path(), e))?;

            if entries.is_empty() {
                println!("No apply history in {}", audit.path().display());
            }
            for entry in entries {
                let status = if entry.succeeded() { "ok  " } else { "FAIL" };
                println!(
                    "{} {status} {} {} ({} rules)",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.event_type,
                    entry.resource_id,
                    entry.rule_count,
                );
                if let Some(error) = entry.error {
                    println!("      {}", truncate_string(&error, 120));
                }
            }
        }
    }
    Ok(())
}
