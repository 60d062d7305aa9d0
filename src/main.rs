use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

use ms17scan::{
    config::{AuthFailurePolicy, ScanConfig},
    output::{ConsoleSink, CsvSink, ResultSink},
    scanner::{HostProber, ScanEngine},
    utils::{self, read_target_file, TargetSpec},
    ScanError,
};

fn build_cli() -> Command {
    Command::new("ms17scan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scan hosts for MS17-010 and DoublePulsar over SMBv1")
        .arg(
            Arg::new("ip")
                .long("ip")
                .value_name("ADDRESS")
                .help("IP address"),
        )
        .arg(
            Arg::new("net")
                .long("net")
                .value_name("CIDR")
                .help("IP network address. Example: 10.0.1.0/24"),
        )
        .arg(
            Arg::new("file")
                .long("file")
                .value_name("PATH")
                .help("File with list of targets to scan. Each address or netmask on new line.")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_name("PATH")
                .help("Output file with results of scan in CSV format. Example: results.csv")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("COUNT")
                .help("Count of concurrent workers [default: 200]")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Verbose output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Load scan settings from a TOML file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("suppress-auth-failures")
                .long("suppress-auth-failures")
                .help("Do not report hosts that refuse the anonymous session")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored console output")
                .action(ArgAction::SetTrue),
        )
}

fn load_config(matches: &ArgMatches) -> ms17scan::Result<ScanConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ScanConfig::from_toml_file(path)?,
        None => ScanConfig::default(),
    };

    if let Some(&workers) = matches.get_one::<usize>("workers") {
        config.workers = workers;
    }
    if matches.get_flag("verbose") {
        config.verbose = true;
    }
    if matches.get_flag("suppress-auth-failures") {
        config.probe.auth_failure_policy = AuthFailurePolicy::Suppress;
    }

    config.validate()?;
    Ok(config)
}

fn collect_targets(matches: &ArgMatches) -> ms17scan::Result<Vec<TargetSpec>> {
    let mut specs = Vec::new();

    if let Some(host) = matches.get_one::<String>("ip") {
        specs.push(TargetSpec::parse_host(host)?);
    }
    if let Some(network) = matches.get_one::<String>("net") {
        specs.push(TargetSpec::parse_network(network)?);
    }
    if let Some(path) = matches.get_one::<PathBuf>("file") {
        specs.extend(read_target_file(path)?);
    }

    if specs.is_empty() {
        return Err(ScanError::NoTargets);
    }
    Ok(specs)
}

async fn run(matches: ArgMatches) -> anyhow::Result<()> {
    let config = load_config(&matches).context("invalid configuration")?;
    let specs = collect_targets(&matches).context("invalid targets")?;

    let colored = !matches.get_flag("no-color");
    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(ConsoleSink::stdout(colored))];
    if let Some(path) = matches.get_one::<PathBuf>("out") {
        sinks.push(Box::new(CsvSink::open(path)?));
    }

    let limit = utils::raise_fd_limit(config.workers);
    if limit > 0 && (limit as usize) < config.workers {
        log::warn!(
            "File descriptor limit {} is below the worker count {}",
            limit,
            config.workers
        );
    }

    let total: u128 = specs
        .iter()
        .map(TargetSpec::address_count)
        .fold(0u128, u128::saturating_add);
    log::info!(
        "Scanning {} addresses from {} entries with {} workers",
        total,
        specs.len(),
        config.workers
    );

    let cancel = CancellationToken::new();
    let prober = HostProber::new(config.probe.clone()).with_cancellation(cancel.clone());
    let engine = ScanEngine::new(config, prober)?.with_cancellation(cancel.clone());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "[!] Interrupted, letting in-flight probes finish...".bright_yellow());
                cancel.cancel();
            }
        }
    });

    let summary = engine.run(utils::expand(specs), sinks).await?;
    log::info!(
        "{} reported, {} unreachable, {} failed mid-probe",
        summary.reported,
        summary.unreachable,
        summary.failed
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    utils::init_logging(matches.get_flag("verbose"));

    println!("{}", "ms17scan - MS17-010 / DoublePulsar scanner".bright_blue().bold());
    println!();

    if let Err(e) = run(matches).await {
        eprintln!("{} {:#}", "[!] ERROR:".bright_red(), e);
        process::exit(1);
    }
}
