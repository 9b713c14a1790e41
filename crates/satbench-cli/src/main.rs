//! satbench — PEP evaluation over an emulated satellite link.
//!
//! Wires the real collaborators (TCP control link, docker-compose
//! backend, docker-exec endpoint runner, profile-file rewriter) into
//! the harness and runs one measurement campaign: a chosen overlay
//! variant, swept across downlink attenuation levels.

mod profiles;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use satbench_harness::benchmark::BenchmarkRunner;
use satbench_harness::campaign::{Campaign, LogReportSink, TrialSpec};
use satbench_harness::config::HarnessConfig;
use satbench_harness::control::{ComposeBackend, SessionController, TcpControlLink};
use satbench_harness::exec::DockerExec;
use satbench_harness::impairment::{ImpairmentInjector, ImpairmentLevel};
use satbench_harness::results::ResultSet;
use satbench_harness::scenario::{ScenarioDeployer, ScenarioVariant};

use profiles::ConfFileProfiles;

/// Page-load targets used when none are given on the command line.
const DEFAULT_PAGE_URLS: &[&str] = &[
    "https://www.google.com",
    "https://www.wikipedia.org",
    "https://www.bbc.co.uk",
    "https://www.amazon.com",
    "https://www.reddit.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioArg {
    Plain,
    Tunnel,
    ProxyIntegrated,
    ProxyDistributed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TrialArg {
    Throughput,
    PageLoad,
}

/// PEP evaluation harness over an emulated satellite link.
#[derive(Parser, Debug)]
#[command(name = "satbench", about = "Evaluate PEP overlays over an emulated satellite link")]
struct Cli {
    /// Overlay variant to evaluate.
    #[arg(long, value_enum, default_value_t = ScenarioArg::Plain)]
    scenario: ScenarioArg,

    /// Trial type to run at each impairment level.
    #[arg(long, value_enum, default_value_t = TrialArg::Throughput)]
    trial: TrialArg,

    /// Harness configuration file (TOML); defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// First downlink attenuation level in dB.
    #[arg(long, default_value_t = 0.0)]
    attenuation_start: f64,

    /// Attenuation increment between levels in dB.
    #[arg(long, default_value_t = 0.5)]
    attenuation_step: f64,

    /// Number of attenuation levels to sweep.
    #[arg(long, default_value_t = 5)]
    levels: u32,

    /// Usable trials to record per level.
    #[arg(long, default_value_t = 5)]
    iterations: u32,

    /// Transfer sizes for throughput trials, in bytes; each size runs
    /// as its own sweep.
    #[arg(long = "transfer-bytes", default_values_t = [10_000_000u64])]
    transfer_bytes: Vec<u64>,

    /// Per-trial timeout for throughput trials, in seconds.
    #[arg(long, default_value_t = 600)]
    trial_timeout_secs: u64,

    /// Page-load targets (page-load trials only).
    #[arg(long = "url")]
    urls: Vec<String>,

    /// Page loads per target and level.
    #[arg(long, default_value_t = 3)]
    page_load_iterations: u32,

    /// Directory holding the emulation platform's compose file.
    #[arg(long, default_value = ".")]
    compose_dir: PathBuf,

    /// Channel profile files rewritten for attenuation sweeps.
    #[arg(
        long = "profile",
        default_values = [
            "satellite/attenuation_scenario/gw0/plugins/ideal.conf",
            "satellite/attenuation_scenario/st1/plugins/ideal.conf",
        ]
    )]
    profiles: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    let variant = match cli.scenario {
        ScenarioArg::Plain => ScenarioVariant::Plain,
        ScenarioArg::Tunnel => ScenarioVariant::TunnelOverlay,
        ScenarioArg::ProxyIntegrated => ScenarioVariant::ProxyIntegrated,
        ScenarioArg::ProxyDistributed => ScenarioVariant::ProxyDistributed {
            gateway: true,
            terminal: true,
        },
    };
    let levels: Vec<ImpairmentLevel> = (0..cli.levels)
        .map(|i| {
            ImpairmentLevel::down_attenuation(cli.attenuation_start + cli.attenuation_step * f64::from(i))
        })
        .collect();

    tracing::info!(
        scenario = variant.label(),
        levels = levels.len(),
        iterations = cli.iterations,
        "satbench starting"
    );

    let controller = SessionController::new(
        Box::new(TcpControlLink::new(&cfg.session)),
        Box::new(ComposeBackend::new(cli.compose_dir.clone())),
        cfg.session.clone(),
    );
    let mut campaign = Campaign::new(
        controller,
        Box::new(DockerExec::new(cfg.roles.clone())),
        ImpairmentInjector::new(
            Box::new(ConfFileProfiles::new(cli.profiles.clone())),
            cfg.injector.clone(),
        ),
        ScenarioDeployer::new(cfg.deploy.clone()),
        BenchmarkRunner::new(cfg.benchmark.clone()),
        Box::new(LogReportSink),
        cfg.campaign.clone(),
    );

    let outcome = run_trials(&mut campaign, &cli, &variant, &levels);
    let shutdown = campaign.shutdown();
    outcome?;
    shutdown.context("tearing down the emulation session")?;
    Ok(())
}

fn run_trials(
    campaign: &mut Campaign,
    cli: &Cli,
    variant: &ScenarioVariant,
    levels: &[ImpairmentLevel],
) -> anyhow::Result<()> {
    match cli.trial {
        TrialArg::Throughput => {
            for &transfer_bytes in &cli.transfer_bytes {
                let spec = TrialSpec::Throughput {
                    transfer_bytes,
                    timeout: Duration::from_secs(cli.trial_timeout_secs),
                };
                let results = campaign
                    .run(variant, &spec, levels, cli.iterations)
                    .with_context(|| {
                        format!("throughput campaign for {transfer_bytes} bytes failed")
                    })?;
                print_throughput_summary(variant, transfer_bytes, &results);
            }
        }
        TrialArg::PageLoad => {
            let urls: Vec<String> = if cli.urls.is_empty() {
                DEFAULT_PAGE_URLS.iter().map(|s| s.to_string()).collect()
            } else {
                cli.urls.clone()
            };
            for url in urls {
                let spec = TrialSpec::PageLoad {
                    url: url.clone(),
                    iterations: cli.page_load_iterations,
                };
                let results = campaign
                    .run(variant, &spec, levels, cli.iterations)
                    .with_context(|| format!("page-load campaign for {url} failed"))?;
                print_page_load_summary(variant, &url, &results);
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<HarnessConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(HarnessConfig::default()),
    }
}

fn print_throughput_summary(variant: &ScenarioVariant, transfer_bytes: u64, results: &ResultSet) {
    println!("{:*<25}", "");
    println!(
        "Throughput results for {} ({transfer_bytes} bytes)",
        variant.label()
    );
    println!("{:*<25}", "");
    for level in results.levels() {
        let up = results
            .mean_sent_bps(level)
            .map(|bps| format!("{:.3}", bps / 1_000_000.0))
            .unwrap_or_else(|| "no data".into());
        let down = results
            .mean_received_bps(level)
            .map(|bps| format!("{:.3}", bps / 1_000_000.0))
            .unwrap_or_else(|| "no data".into());
        println!(
            "{}: {} / {} Mbps (up/down, {} trials)",
            level.label(),
            up,
            down,
            results.records(level).len()
        );
    }
}

fn print_page_load_summary(variant: &ScenarioVariant, url: &str, results: &ResultSet) {
    println!("{:*<25}", "");
    println!("Page-load results for {} @ {}", variant.label(), url);
    println!("{:*<25}", "");
    for level in results.levels() {
        let plt = results
            .mean_load_time_ms(level)
            .map(|ms| format!("{ms:.0} ms"))
            .unwrap_or_else(|| "no data".into());
        println!(
            "{}: mean load {} ({} errors)",
            level.label(),
            plt,
            results.load_errors(level)
        );
    }
}
