//! `replay-noise` command line

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use replay_engine::simulation::{run_simulation, SimulationConfig};
use replay_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_name("FILE")
        .help("Engine configuration (TOML)")
}

fn cli() -> Command {
    Command::new("replay-noise")
        .version(replay_engine::VERSION)
        .about("Context batching and noise identification for traffic replay")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a synthetic plan through the engine")
                .arg(
                    Arg::new("actions")
                        .long("actions")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Actions in the plan"),
                )
                .arg(
                    Arg::new("cases")
                        .long("cases")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Cases per action in each dependency context"),
                )
                .arg(
                    Arg::new("contexts")
                        .long("contexts")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Dependency contexts"),
                )
                .arg(
                    Arg::new("null-cases")
                        .long("null-cases")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Cases per action without a dependency"),
                )
                .arg(
                    Arg::new("warmup-failure-rate")
                        .long("warmup-failure-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a dependency rejects warmup"),
                )
                .arg(
                    Arg::new("probe-failure-rate")
                        .long("probe-failure-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a probe is not delivered"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective engine configuration")
                .arg(config_arg()),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<EngineConfig> {
    match args.get_one::<String>("config") {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("loading engine configuration from {path}")),
        None => Ok(EngineConfig::default()),
    }
}

fn simulation_config(args: &ArgMatches) -> SimulationConfig {
    let defaults = SimulationConfig::default();
    SimulationConfig {
        actions: args.get_one::<usize>("actions").copied().unwrap_or(defaults.actions),
        cases_per_context: args
            .get_one::<usize>("cases")
            .copied()
            .unwrap_or(defaults.cases_per_context),
        contexts: args.get_one::<usize>("contexts").copied().unwrap_or(defaults.contexts),
        null_cases: args
            .get_one::<usize>("null-cases")
            .copied()
            .unwrap_or(defaults.null_cases),
        warmup_failure_rate: args
            .get_one::<f64>("warmup-failure-rate")
            .copied()
            .unwrap_or(defaults.warmup_failure_rate),
        probe_failure_rate: args
            .get_one::<f64>("probe-failure-rate")
            .copied()
            .unwrap_or(defaults.probe_failure_rate),
        seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let engine = load_config(args)?;
            let simulation = simulation_config(args);
            let report = run_simulation(&simulation, &engine)
                .await
                .context("simulation failed")?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            let execution = &report.execution;
            println!("Plan {} (execution {})", execution.plan_id, execution.execution_id);
            for context in &execution.contexts {
                let probes = context.noise.as_ref().map_or(0, |n| n.probes_dispatched);
                println!(
                    "  {:<24} skipped={:<5} cases={:<4} probes={}",
                    context.context_name, context.skipped, context.cases_loaded, probes
                );
            }
            if let Some(error) = &execution.error_message {
                println!("Plan error: {error}");
            }
            println!("Findings:");
            for finding in &report.findings {
                let fields: Vec<&str> = finding.noisy_fields.keys().map(String::as_str).collect();
                println!(
                    "  {} [{}]: {}",
                    finding.plan_item_id,
                    finding.context_name,
                    fields.join(", ")
                );
            }
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}
