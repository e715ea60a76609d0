//! Jackhammer CLI - jackhammer mode for Sensapex manipulators via Ephys Link.
//!
//! Emergency stop: Ctrl-C while a run is in progress.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use jackhammer_core::{predict_advancement, JackhammerParameters, ManipulatorId, Preset, RiskLevel, PRESETS};
use jackhammer_link::{EphysLinkClient, Gateway, LinkConfig, DEFAULT_HOST, DEFAULT_PORT};
use jackhammer_session::{JackhammerRunner, RunError, RunOutcome, StopToken};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jackhammer")]
#[command(about = "Jackhammer mode for Sensapex manipulators via Ephys Link", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ephys Link host
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Ephys Link port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Remote call timeout in seconds
    #[arg(long, global = true, default_value_t = 60)]
    timeout: u64,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List parameter presets
    Presets,
    /// Predict advancement without moving anything
    Predict {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Run jackhammer on a manipulator
    Run {
        /// Manipulator ID (shown in Ephys Link on startup)
        manipulator: String,
        #[command(flatten)]
        params: ParamArgs,
        /// Number of sequential calls; several small runs are safer than one large one
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// The probe is inside brain tissue
        #[arg(long)]
        inside_brain: bool,
        /// Confirm running with --inside-brain
        #[arg(long)]
        yes: bool,
    },
    /// Show the current manipulator position
    Position {
        /// Manipulator ID
        manipulator: String,
    },
    /// Stop all movement of a manipulator
    Stop {
        /// Manipulator ID
        manipulator: String,
    },
}

/// Jackhammer parameters: a preset plus per-field overrides.
#[derive(Args, Debug, Clone)]
struct ParamArgs {
    /// Preset to start from (Gentle, Standard)
    #[arg(long, default_value = "Gentle")]
    preset: String,
    /// Number of jackhammer cycles. Higher = more vibration
    #[arg(short, long)]
    iterations: Option<i32>,
    /// Steps in forward phase. Primary multiplier for advancement
    #[arg(long)]
    phase1_steps: Option<i32>,
    /// Pulse intensity for forward phase (1-100). Acts as dampener
    #[arg(long)]
    phase1_pulses: Option<i32>,
    /// Steps in backward phase. Usually less than phase 1
    #[arg(long)]
    phase2_steps: Option<i32>,
    /// Pulse intensity for backward phase (-100 to -1)
    #[arg(long, allow_negative_numbers = true)]
    phase2_pulses: Option<i32>,
}

impl ParamArgs {
    fn resolve(&self) -> Result<JackhammerParameters> {
        let preset = Preset::find(&self.preset)
            .with_context(|| format!("Unknown preset '{}'", self.preset))?;
        debug!("Starting from preset {}", preset.name);

        let base = preset.parameters;
        Ok(JackhammerParameters {
            iterations: self.iterations.unwrap_or(base.iterations),
            phase1_steps: self.phase1_steps.unwrap_or(base.phase1_steps),
            phase1_pulses: self.phase1_pulses.unwrap_or(base.phase1_pulses),
            phase2_steps: self.phase2_steps.unwrap_or(base.phase2_steps),
            phase2_pulses: self.phase2_pulses.unwrap_or(base.phase2_pulses),
        })
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = LinkConfig::new(cli.host.clone(), cli.port)
        .with_call_timeout(Duration::from_secs(cli.timeout));
    debug!("Link config: {:?}", config);

    match cli.command {
        Commands::Presets => {
            println!("Presets ({})", PRESETS.len());
            for preset in PRESETS {
                let p = preset.parameters;
                println!(
                    "  {:<9} I={} S1={} P1={} S2={} P2={}  ~{:.1} µm  {}",
                    preset.name,
                    p.iterations,
                    p.phase1_steps,
                    p.phase1_pulses,
                    p.phase2_steps,
                    p.phase2_pulses,
                    preset.predicted_um(),
                    preset.description,
                );
            }
        }
        Commands::Predict { params } => {
            let params = params.resolve()?;
            let predicted = predict_advancement(&params)?;
            println!("Predicted advancement: ~{:.1} µm", predicted);
            if let Some(warning) = RiskLevel::classify(predicted).warning() {
                println!("  Warning: {}", warning);
            }
        }
        Commands::Run {
            manipulator,
            params,
            count,
            inside_brain,
            yes,
        } => {
            let id: ManipulatorId = manipulator.parse()?;
            let params = params.resolve()?;
            params.validate()?;

            if inside_brain && !yes {
                bail!(
                    "Probe is marked as inside brain. Jackhammer only moves the depth axis; \
                     pass --yes to continue"
                );
            }

            let client = Arc::new(
                EphysLinkClient::connect(&config)
                    .await
                    .with_context(|| format!("Could not connect to {}:{}", config.host, config.port))?,
            );
            let runner = JackhammerRunner::new(client.clone());

            let result = run_sequence(&runner, &id, &params, count).await;
            client.disconnect().await;
            result?;
        }
        Commands::Position { manipulator } => {
            let id: ManipulatorId = manipulator.parse()?;
            let client = EphysLinkClient::connect(&config).await?;
            let position = client.get_position(&id).await;
            client.disconnect().await;
            println!("Position: {}", position?);
        }
        Commands::Stop { manipulator } => {
            let id: ManipulatorId = manipulator.parse()?;
            let client = EphysLinkClient::connect(&config).await?;
            let stopped = client.stop(&id).await;
            client.disconnect().await;
            stopped?;
            println!("Stop sent to manipulator {}.", id);
        }
    }

    Ok(())
}

/// Run `count` calls one after another, stopping at the first failure.
async fn run_sequence(
    runner: &JackhammerRunner,
    id: &ManipulatorId,
    params: &JackhammerParameters,
    count: u32,
) -> Result<()> {
    for n in 1..=count {
        println!("Run {}/{} on manipulator {}...", n, count, id);

        let stop = StopToken::new();
        let run = runner.run(id, params, &stop);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                signal = tokio::signal::ctrl_c(), if !stop.is_stopped() => {
                    signal.context("Could not listen for Ctrl-C")?;
                    println!("!!! EMERGENCY STOP !!!");
                    match runner.emergency_stop(id, &stop).await {
                        Ok(()) => println!("Stop sent to manipulator {}.", id),
                        Err(e) => println!("Stop failed: {}", e),
                    }
                }
            }
        };

        match result {
            Ok(outcome) => print_outcome(&outcome),
            Err(RunError::Cancelled(_)) => {
                println!("Run cancelled; totals not updated.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Finished {} run(s) on manipulator {}", count, id);
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    println!("Jackhammer complete! ({:.1}s)", outcome.elapsed.as_secs_f64());
    println!("  Final position: {}", outcome.position);
    println!("  Predicted advancement: ~{:.1} µm", outcome.predicted_um);
    match outcome.actual_um {
        Some(actual) => println!("  Actual advancement: {:+.1} µm", actual),
        None => println!("  Actual advancement: unknown (no starting position)"),
    }
    println!(
        "  Total advancement: {:.1} µm over {} run(s)",
        outcome.session.cumulative_advancement_um, outcome.session.runs
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_gentle() {
        let cli = Cli::try_parse_from(["jackhammer", "predict"]).unwrap();
        let Commands::Predict { params } = cli.command else {
            panic!("expected predict");
        };
        assert_eq!(params.resolve().unwrap(), jackhammer_core::GENTLE.parameters);
        assert_eq!(cli.port, DEFAULT_PORT);
    }

    #[test]
    fn test_overrides_apply_on_top_of_preset() {
        let cli = Cli::try_parse_from([
            "jackhammer",
            "run",
            "6",
            "--preset",
            "standard",
            "--phase1-steps",
            "2",
            "--phase2-pulses",
            "-50",
            "--count",
            "3",
        ])
        .unwrap();
        let Commands::Run { manipulator, params, count, .. } = cli.command else {
            panic!("expected run");
        };

        let resolved = params.resolve().unwrap();
        assert_eq!(manipulator, "6");
        assert_eq!(count, 3);
        assert_eq!(resolved.iterations, 10);
        assert_eq!(resolved.phase1_steps, 2);
        assert_eq!(resolved.phase2_pulses, -50);
    }

    #[test]
    fn test_unknown_preset() {
        let cli = Cli::try_parse_from(["jackhammer", "predict", "--preset", "turbo"]).unwrap();
        let Commands::Predict { params } = cli.command else {
            panic!("expected predict");
        };
        assert!(params.resolve().is_err());
    }
}
