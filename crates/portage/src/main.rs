use chrono::{DateTime, FixedOffset, Local};
use clap::{Parser, Subcommand, ValueEnum};
use portage_schedule::types::DEFAULT_MIGRATION_POLICY;
use portage_schedule::{
    next_trigger, validate_policy, InMemoryPolicyStore, ScheduleEvaluator, SchedulePolicy,
    SchedulePolicyStore, SchedulePolicyType,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "portage", about = "Portage cluster-to-cluster migration tooling")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "PORTAGE_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect schedule policies used by migration schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Report whether a policy has a trigger due
    Check {
        /// YAML file holding one SchedulePolicy or a list of them
        #[arg(long, env = "PORTAGE_POLICY_FILE")]
        policy_file: PathBuf,
        /// Name of the policy to evaluate
        #[arg(long)]
        policy: String,
        /// Schedule type: interval, daily, weekly or monthly
        #[arg(long = "type", value_parser = parse_policy_type)]
        policy_type: SchedulePolicyType,
        /// RFC 3339 time of the previous trigger
        #[arg(long)]
        last_trigger: Option<String>,
        /// RFC 3339 time to evaluate at, defaults to the current local time
        #[arg(long)]
        now: Option<String>,
    },
    /// Validate every policy in a file
    Validate {
        #[arg(long, env = "PORTAGE_POLICY_FILE")]
        policy_file: PathBuf,
    },
    /// Create or reset the default migration policy and print it
    Defaults {
        /// Policy file to update in place
        #[arg(long, env = "PORTAGE_POLICY_FILE")]
        policy_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Schedule { command } => match command {
            ScheduleCommand::Check {
                policy_file,
                policy,
                policy_type,
                last_trigger,
                now,
            } => {
                run_check(
                    &policy_file,
                    &policy,
                    policy_type,
                    last_trigger.as_deref(),
                    now.as_deref(),
                )
                .await
            }
            ScheduleCommand::Validate { policy_file } => run_validate(&policy_file),
            ScheduleCommand::Defaults { policy_file } => run_defaults(policy_file.as_deref()).await,
        },
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn parse_policy_type(value: &str) -> Result<SchedulePolicyType, String> {
    value.parse().map_err(|e: portage_schedule::ScheduleError| e.to_string())
}

fn parse_time(value: &str) -> miette::Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|e| miette::miette!("Invalid timestamp '{}': {}", value, e))
}

/// Read one SchedulePolicy or a list of them from a YAML file
fn load_policies(path: &Path) -> miette::Result<Vec<SchedulePolicy>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read '{}': {}", path.display(), e))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|e| miette::miette!("Invalid YAML in '{}': {}", path.display(), e))?;

    let policies: Vec<SchedulePolicy> = if value.is_sequence() {
        serde_yaml::from_value(value)
    } else {
        serde_yaml::from_value::<SchedulePolicy>(value).map(|policy| vec![policy])
    }
    .map_err(|e| miette::miette!("Invalid schedule policy in '{}': {}", path.display(), e))?;
    debug!("Loaded {} policies from {}", policies.len(), path.display());
    Ok(policies)
}

fn write_policies(path: &Path, policies: &[SchedulePolicy]) -> miette::Result<()> {
    let yaml = portage_core::to_yaml(&policies)
        .map_err(|e| miette::miette!("Failed to encode policies: {}", e))?;
    std::fs::write(path, yaml)
        .map_err(|e| miette::miette!("Failed to write '{}': {}", path.display(), e))
}

async fn run_check(
    policy_file: &Path,
    policy_name: &str,
    policy_type: SchedulePolicyType,
    last_trigger: Option<&str>,
    now: Option<&str>,
) -> miette::Result<()> {
    let policies = load_policies(policy_file)?;
    let policy = policies
        .iter()
        .find(|p| p.name() == policy_name)
        .cloned()
        .ok_or_else(|| miette::miette!("Policy '{}' not found in {}", policy_name, policy_file.display()))?;

    let last = last_trigger.map(parse_time).transpose()?;
    let now = match now {
        Some(now) => parse_time(now)?,
        None => Local::now().fixed_offset(),
    };

    let evaluator = ScheduleEvaluator::new(Arc::new(InMemoryPolicyStore::with_policies(policies)));
    let due = evaluator
        .trigger_required_at(policy_name, policy_type, last, now)
        .await
        .map_err(|e| miette::miette!("Failed to evaluate policy '{}': {}", policy_name, e))?;
    let retain = evaluator
        .retain(policy_name, policy_type)
        .await
        .map_err(|e| miette::miette!("Failed to read retain of '{}': {}", policy_name, e))?;

    println!(
        "{} ({}): {}",
        policy_name,
        policy_type,
        if due { "due" } else { "not due" }
    );
    if let Some(last) = last {
        let next = next_trigger(&policy, policy_type, &last.naive_local())
            .map_err(|e| miette::miette!("Failed to compute next trigger: {}", e))?;
        println!("next trigger: {}", next);
    }
    println!("retain: {}", retain);
    Ok(())
}

fn run_validate(policy_file: &Path) -> miette::Result<()> {
    let policies = load_policies(policy_file)?;
    let mut invalid = 0;
    for policy in &policies {
        match validate_policy(policy) {
            Ok(()) => println!("{}: ok", policy.name()),
            Err(e) => {
                warn!("Policy {} is invalid: {}", policy.name(), e);
                println!("{}: {}", policy.name(), e);
                invalid += 1;
            }
        }
    }
    if invalid > 0 {
        return Err(miette::miette!(
            "{} of {} policies in {} are invalid",
            invalid,
            policies.len(),
            policy_file.display()
        ));
    }
    Ok(())
}

async fn run_defaults(policy_file: Option<&Path>) -> miette::Result<()> {
    let mut policies = match policy_file {
        Some(path) if path.exists() => load_policies(path)?,
        _ => Vec::new(),
    };

    let store = Arc::new(InMemoryPolicyStore::with_policies(policies.clone()));
    ScheduleEvaluator::new(store.clone())
        .ensure_default_policies()
        .await
        .map_err(|e| miette::miette!("Failed to ensure default policies: {}", e))?;
    let default = store
        .get_policy(DEFAULT_MIGRATION_POLICY)
        .await
        .map_err(|e| miette::miette!("Failed to read default policy: {}", e))?
        .ok_or_else(|| miette::miette!("Default policy was not created"))?;

    policies.retain(|p| p.name() != DEFAULT_MIGRATION_POLICY);
    policies.push(default.clone());
    policies.sort_by(|a, b| a.name().cmp(b.name()));

    if let Some(path) = policy_file {
        write_policies(path, &policies)?;
        info!("Wrote {} policies to {}", policies.len(), path.display());
    }
    let yaml = portage_core::to_yaml(&default)
        .map_err(|e| miette::miette!("Failed to encode default policy: {}", e))?;
    print!("{}", yaml);
    Ok(())
}
