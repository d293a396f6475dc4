use anyhow::Context;
use avp_common::ManualClock;
use avp_gate::{
    Action, ActionKind, AnomalyEvent, GateConfig, RiskCheck, RiskCheckResult, SafetyGate,
};
use avp_risk::{CheckContext, CheckError};
use clap::{value_parser, Arg, ArgAction, Command};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Demo check: passes at `calm` unless the action carries `"stress": true`
struct ScriptedCheck {
    name: &'static str,
    weight: f64,
    calm: f64,
    stressed: f64,
}

#[async_trait::async_trait]
impl RiskCheck for ScriptedCheck {
    fn name(&self) -> &str {
        self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn evaluate(
        &self,
        _action: &Action,
        context: &CheckContext,
    ) -> Result<RiskCheckResult, CheckError> {
        let stressed = context
            .attribute("stress")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(if stressed {
            RiskCheckResult::fail(self.name, self.stressed)
                .with_warning(format!("{} sees elevated risk", self.name))
        } else {
            RiskCheckResult::pass(self.name, self.calm)
        })
    }
}

fn cli() -> Command {
    Command::new("avp-gate")
        .version(avp_gate::VERSION)
        .about("Adaptive Verification Pipeline safety gate")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run a scripted demonstration and print results as JSON")
                .arg(
                    Arg::new("anomalies")
                        .long("anomalies")
                        .default_value("7")
                        .value_parser(value_parser!(u32))
                        .help("Times to report the same anomaly"),
                )
                .arg(
                    Arg::new("harmful")
                        .long("harmful")
                        .default_value("5")
                        .value_parser(value_parser!(u32))
                        .help("Approved decisions later resolved as harmful"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a TOML configuration")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the configuration file"),
                ),
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

fn print_json<T: Serialize>(label: &str, value: &T) -> anyhow::Result<()> {
    println!("== {label}");
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn simulate(anomalies: u32, harmful: u32) -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::starting_now());
    let checks: Vec<Arc<dyn RiskCheck>> = vec![
        Arc::new(ScriptedCheck {
            name: "momentum",
            weight: 1.0,
            calm: 12.0,
            stressed: 70.0,
        }),
        Arc::new(ScriptedCheck {
            name: "similar_losses",
            weight: 2.0,
            calm: 18.0,
            stressed: 85.0,
        }),
        Arc::new(ScriptedCheck {
            name: "position_check",
            weight: 1.0,
            calm: 5.0,
            stressed: 95.0,
        }),
    ];
    let gate = SafetyGate::builder(GateConfig::default())
        .with_clock(clock.clone())
        .with_checks(checks)
        .build()?;

    let calm = Action::new("AAPL", ActionKind::Buy, 25_000.0);
    print_json("calm decision", &gate.evaluate(&calm).await?)?;

    let stressed = Action::new("TSLA", ActionKind::Short, 80_000.0).with_context("stress", true);
    print_json("stressed decision", &gate.evaluate(&stressed).await?)?;

    // Approved trades that turn out harmful make the passing checks look wrong
    for _ in 0..harmful {
        let decision = gate.evaluate(&calm).await?;
        gate.resolve_decision(decision.decision_id, true).await?;
    }
    print_json("disabled sources", &gate.list_disabled())?;
    print_json("decision with open circuits", &gate.evaluate(&calm).await?)?;

    let mut last = None;
    for i in 0..anomalies {
        let event = AnomalyEvent::new("order_rejected", format!("broker rejected order #{i}"))
            .with_source("position_check")
            .with_subject("TSLA");
        last = Some(gate.report_anomaly(&event).await);
    }
    if let Some(result) = last {
        print_json("last escalation", &result)?;
    }

    clock.advance(chrono::Duration::hours(24));
    print_json("daily summary", &gate.close_window().await)?;
    print_json("health", &gate.health().await)?;
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = GateConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    println!("{} is valid", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let anomalies = args.get_one::<u32>("anomalies").copied().unwrap_or(7);
            let harmful = args.get_one::<u32>("harmful").copied().unwrap_or(5);
            simulate(anomalies, harmful).await
        }
        Some(("check-config", args)) => {
            let path = args
                .get_one::<PathBuf>("path")
                .context("missing configuration path")?;
            check_config(path)
        }
        _ => anyhow::bail!("unknown subcommand"),
    }
}
