//! End-to-end campaign orchestration over scripted collaborators:
//! broken-link recovery, recovery budgets, and result accumulation.

use std::time::Duration;

use satbench_harness::benchmark::BenchmarkRunner;
use satbench_harness::campaign::{Campaign, TrialSpec};
use satbench_harness::config::{
    BenchmarkConfig, CampaignConfig, DeployConfig, InjectorConfig,
};
use satbench_harness::control::SessionController;
use satbench_harness::exec::{CommandOutput, Role};
use satbench_harness::impairment::{ImpairmentInjector, ImpairmentLevel};
use satbench_harness::scenario::{ScenarioDeployer, ScenarioVariant};
use satbench_harness::test_util::{
    fast_session_config, MemoryProfiles, MemorySink, NullBackend, ScriptedExec, ScriptedLink,
};

/// Daemon status banner with all roles present and running, plus the
/// acknowledgement token.
fn daemon_banner() -> String {
    "SAT GW0 ST1 RUNNING RUNNING RUNNING RUNNING OK".into()
}

fn summary_json(sent_bytes: u64, sent_bps: f64) -> CommandOutput {
    CommandOutput::ok(
        serde_json::json!({
            "end": {
                "sum_sent": { "bytes": sent_bytes, "bits_per_second": sent_bps },
                "sum_received": { "bytes": sent_bytes, "bits_per_second": sent_bps * 0.9 },
            }
        })
        .to_string(),
    )
}

struct Fixture {
    campaign: Campaign,
    exec_calls: std::rc::Rc<std::cell::RefCell<Vec<satbench_harness::test_util::ExecCall>>>,
    profile_writes: std::rc::Rc<std::cell::RefCell<Vec<(satbench_harness::LinkDirection, f64)>>>,
    records: std::rc::Rc<std::cell::RefCell<Vec<satbench_harness::TrialRecord>>>,
}

fn fixture(exec: ScriptedExec, max_recoveries: u32) -> Fixture {
    let exec_calls = exec.calls();
    let profiles = MemoryProfiles::default();
    let profile_writes = profiles.writes();
    let sink = MemorySink::default();
    let records = sink.records();

    let controller = SessionController::new(
        Box::new(ScriptedLink::with_replies(vec![daemon_banner()])),
        Box::new(NullBackend::default()),
        fast_session_config(),
    );
    let injector = ImpairmentInjector::new(Box::new(profiles), InjectorConfig::default());
    let deployer = ScenarioDeployer::new(DeployConfig {
        tunnel_settle_ms: 0,
        kill_grace_ms: 0,
        ..DeployConfig::default()
    });
    let runner = BenchmarkRunner::new(BenchmarkConfig::default());
    let campaign = Campaign::new(
        controller,
        Box::new(exec),
        injector,
        deployer,
        runner,
        Box::new(sink),
        CampaignConfig {
            max_recoveries,
            warmup_bytes: 0,
            warmup_timeout_secs: 1,
        },
    );

    Fixture {
        campaign,
        exec_calls,
        profile_writes,
        records,
    }
}

fn throughput_spec() -> TrialSpec {
    TrialSpec::Throughput {
        transfer_bytes: 100_000,
        timeout: Duration::from_secs(60),
    }
}

/// Counts full deploys by the terminal's route reconfiguration, which
/// happens exactly once per session bring-up.
fn deploy_count(fx: &Fixture) -> usize {
    fx.exec_calls
        .borrow()
        .iter()
        .filter(|c| c.role == Role::Terminal && c.command.contains("ip route add default"))
        .count()
}

#[test]
fn zero_throughput_triggers_exactly_one_recovery() {
    let mut exec = ScriptedExec::new();
    // 2nd transfer reports zero sent bytes; everything else is healthy.
    exec.push_response("--json", summary_json(100_000, 2_000_000.0));
    exec.push_response("--json", summary_json(0, 0.0));
    exec.push_response("--json", summary_json(100_000, 2_000_000.0));

    let mut fx = fixture(exec, 5);
    let level = ImpairmentLevel::down_attenuation(2.0);
    let results = fx
        .campaign
        .run(&ScenarioVariant::Plain, &throughput_spec(), &[level.clone()], 5)
        .expect("campaign");

    // 5 usable trials plus the one broken record.
    assert_eq!(results.usable_count(&level), 5);
    assert_eq!(results.records(&level).len(), 6);
    assert_eq!(fx.records.borrow().len(), 6);

    // Exactly one redeploy beyond the initial one, and the impairment
    // was re-applied after it.
    assert_eq!(deploy_count(&fx), 2);
    assert_eq!(fx.profile_writes.borrow().len(), 2);
}

#[test]
fn recovery_budget_exhaustion_moves_to_next_level() {
    let mut exec = ScriptedExec::new();
    // Every transfer fails: the link never comes back.
    exec.push_response("--json", summary_json(0, 0.0));

    let mut fx = fixture(exec, 1);
    let low = ImpairmentLevel::down_attenuation(1.0);
    let high = ImpairmentLevel::down_attenuation(5.0);
    let results = fx
        .campaign
        .run(
            &ScenarioVariant::Plain,
            &throughput_spec(),
            &[low.clone(), high.clone()],
            3,
        )
        .expect("campaign must not abort");

    // Per level: one broken trial, one recovery, one more broken
    // trial, budget spent.
    assert_eq!(results.records(&low).len(), 2);
    assert_eq!(results.records(&high).len(), 2);
    assert_eq!(results.usable_count(&low), 0);
    assert_eq!(results.mean_sent_bps(&low), Some(0.0));

    // Initial deploy + one recovery per level.
    assert_eq!(deploy_count(&fx), 3);
}

#[test]
fn page_load_failures_do_not_trigger_recovery() {
    let mut exec = ScriptedExec::new();
    exec.push_response("--headless", CommandOutput::ok("UrlLoadError: nothing loaded"));

    let mut fx = fixture(exec, 5);
    let level = ImpairmentLevel::down_attenuation(0.0);
    let spec = TrialSpec::PageLoad {
        url: "https://www.example.com".into(),
        iterations: 1,
    };
    let results = fx
        .campaign
        .run(&ScenarioVariant::Plain, &spec, &[level.clone()], 3)
        .expect("campaign");

    assert_eq!(results.records(&level).len(), 3);
    assert_eq!(results.load_errors(&level), 3);
    assert_eq!(results.mean_load_time_ms(&level), None);
    // Only the initial deploy happened.
    assert_eq!(deploy_count(&fx), 1);
}

#[test]
fn tunnel_campaign_runs_warmup_once_per_deploy() {
    let mut exec = ScriptedExec::new();
    exec.push_response("--json", summary_json(100_000, 2_000_000.0));

    let exec_calls = exec.calls();
    let profiles = MemoryProfiles::default();
    let controller = SessionController::new(
        Box::new(ScriptedLink::with_replies(vec![daemon_banner()])),
        Box::new(NullBackend::default()),
        fast_session_config(),
    );
    let mut campaign = Campaign::new(
        controller,
        Box::new(exec),
        ImpairmentInjector::new(Box::new(profiles), InjectorConfig::default()),
        ScenarioDeployer::new(DeployConfig {
            tunnel_settle_ms: 0,
            kill_grace_ms: 0,
            ..DeployConfig::default()
        }),
        BenchmarkRunner::new(BenchmarkConfig::default()),
        Box::new(MemorySink::default()),
        CampaignConfig {
            max_recoveries: 5,
            warmup_bytes: 10_000,
            warmup_timeout_secs: 1,
        },
    );

    let level = ImpairmentLevel::down_attenuation(0.5);
    let results = campaign
        .run(
            &ScenarioVariant::TunnelOverlay,
            &throughput_spec(),
            &[level.clone()],
            2,
        )
        .expect("campaign");

    assert_eq!(results.usable_count(&level), 2);
    let calls = exec_calls.borrow();
    // Two measured transfers plus one warm-up.
    let transfers = calls
        .iter()
        .filter(|c| c.command.contains("--json"))
        .count();
    assert_eq!(transfers, 3);
    let warmups = calls
        .iter()
        .filter(|c| c.command.ends_with("-n 10000"))
        .count();
    assert_eq!(warmups, 1);
}
