//! CLI entry point for rust-arm.
//!
//! Headless front end over the supervision session:
//! - `monitor` follows link state and machine telemetry
//! - `gcode` / `estop` send firmware commands
//! - `camera` toggles the camera over the broker and its power pin
//! - `plan` requests, validates and optionally executes a motion plan
//! - `overlay` composites a segmentation mask onto a still frame
//! - `history` prints (and follows) captured frames
//!
//! # Usage
//!
//! ```bash
//! rust-arm --config arm.toml monitor --stream
//! rust-arm gcode "G28"
//! rust-arm plan --offset 10 0 -5 --execute
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use arm_client::{ClientError, LinkState, Session, Settings};
use arm_core::{MachineSnapshot, PlanVerdict};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rust-arm")]
#[command(about = "Headless supervisor for a six-axis arm", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the firmware before giving up
    #[arg(long, global = true, default_value = "10")]
    wait: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow link state and machine telemetry until Ctrl+C
    Monitor {
        /// Also read the camera stream and report frames
        #[arg(long)]
        stream: bool,
    },

    /// Run a G-code script once the machine is ready
    Gcode {
        /// Script text, e.g. "G28"
        script: String,
    },

    /// Emergency stop
    Estop,

    /// Switch the camera
    Camera {
        /// Turn the camera off instead of on
        #[arg(long)]
        off: bool,
        /// Record while on
        #[arg(long)]
        record: bool,
    },

    /// Request a plan from the current position by a cartesian offset
    Plan {
        /// Offset as three values
        #[arg(long, num_args = 3, allow_negative_numbers = true, required = true)]
        offset: Vec<f64>,
        /// Execute the plan if it passes validation
        #[arg(long)]
        execute: bool,
    },

    /// Overlay a segmentation mask onto a JPEG frame and write a PNG
    Overlay {
        /// Input JPEG
        image: PathBuf,
        /// Seed point as `x,y`; repeatable
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<[f64; 2]>,
        /// Output PNG
        #[arg(long, default_value = "overlay.png")]
        out: PathBuf,
    },

    /// Print the newest captured frames
    History {
        /// Keep printing new captures until Ctrl+C
        #[arg(long)]
        follow: bool,
    },
}

fn parse_point(raw: &str) -> std::result::Result<[f64; 2], String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{raw}'"))?;
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("'{v}': {e}"));
    Ok([parse(x)?, parse(y)?])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!(?settings, "Configuration loaded");

    let wait = Duration::from_secs(cli.wait);
    let mut session = Session::new(settings)?;

    let outcome = match cli.command {
        Commands::Monitor { stream } => monitor(&mut session, stream).await,
        Commands::Gcode { script } => gcode(&mut session, &script, wait).await,
        Commands::Estop => estop(&mut session, wait).await,
        Commands::Camera { off, record } => camera(&mut session, !off, record, wait).await,
        Commands::Plan { offset, execute } => plan(&mut session, offset, execute, wait).await,
        Commands::Overlay { image, points, out } => overlay(&session, &image, &points, &out).await,
        Commands::History { follow } => history(&mut session, follow).await,
    };
    session.shutdown().await;
    if let Err(err) = &outcome {
        explain(err);
    }
    outcome
}

/// Hint for faults the operator can act on.
fn explain(err: &anyhow::Error) {
    let Some(fault) = err.downcast_ref::<ClientError>() else {
        return;
    };
    if let Some(hint) = hint(fault) {
        eprintln!("{hint}");
    }
}

fn hint(fault: &ClientError) -> Option<&'static str> {
    if fault.is_safety() {
        Some("🛑 Nothing was sent to the arm; request a new plan first")
    } else if fault.is_transport() {
        Some("⚠️  Check the endpoints in the configuration and that the peer is up")
    } else {
        None
    }
}

async fn wait_for_link(session: &Session, wait: Duration) -> Result<()> {
    let mut state = session.link_state();
    tokio::time::timeout(wait, state.wait_for(LinkState::is_connected))
        .await
        .context("firmware link did not come up")??;
    Ok(())
}

async fn wait_for_snapshot(
    session: &Session,
    wait: Duration,
    ready: impl FnMut(&MachineSnapshot) -> bool,
) -> Result<MachineSnapshot> {
    let mut telemetry = session.telemetry().subscribe();
    let snapshot = tokio::time::timeout(wait, telemetry.wait_for(ready))
        .await
        .context("machine did not report ready")??
        .clone();
    Ok(snapshot)
}

async fn monitor(session: &mut Session, stream: bool) -> Result<()> {
    session.connect();
    let mut link = session.link_state();
    let mut telemetry = session.telemetry().subscribe();
    let mut frames = if stream {
        session.start_frame_stream()
    } else {
        watch::channel(None).1
    };

    println!("📡 Monitoring - Press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = link.changed() => {
                println!("link: {}", link.borrow_and_update().label());
            }
            Ok(()) = telemetry.changed() => {
                let snapshot = telemetry.borrow_and_update().clone();
                println!(
                    "ready={} homed={} positions={:?}",
                    snapshot.readiness.is_ready(),
                    snapshot.homed.is_homed(),
                    snapshot.positions
                );
            }
            Ok(()) = frames.changed(), if stream => {
                if let Some(frame) = frames.borrow_and_update().as_ref() {
                    println!("frame #{} ({} bytes)", frame.sequence, frame.jpeg.len());
                }
            }
        }
    }
    println!("\n🛑 Shutdown signal received");
    Ok(())
}

async fn gcode(session: &mut Session, script: &str, wait: Duration) -> Result<()> {
    session.start_link();
    wait_for_snapshot(session, wait, |s| s.readiness.is_ready()).await?;
    session.run_gcode(script)?;
    println!("✅ Sent: {script}");
    // Give the firmware a moment to answer; the reply is logged.
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}

async fn estop(session: &mut Session, wait: Duration) -> Result<()> {
    session.start_link();
    wait_for_link(session, wait).await?;
    session.emergency_stop()?;
    println!("🛑 Emergency stop sent");
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

async fn camera(session: &mut Session, enable: bool, record: bool, wait: Duration) -> Result<()> {
    session.connect();
    if let Err(err) = wait_for_link(session, wait).await {
        eprintln!("⚠️  {err:#}; camera pin will not be switched");
    }
    session.toggle_camera(enable, record).await?;
    println!("camera={} record={}", enable, enable && record);
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

async fn plan(session: &mut Session, offset: Vec<f64>, execute: bool, wait: Duration) -> Result<()> {
    session.start_link();
    let snapshot = wait_for_snapshot(session, wait, |s| {
        s.readiness.is_ready() && !s.positions.is_empty()
    })
    .await?;
    if !session.telemetry().limits().is_populated() {
        eprintln!("⚠️  Joint limits unknown; unconstrained joints will pass");
    }

    let verdict = session.planner().plan(&snapshot.positions, offset).await?;
    match &verdict {
        PlanVerdict::Accepted => {
            let steps = session.planner().pending_plan().map_or(0, |p| p.path.len());
            println!("✅ Plan accepted ({steps} steps)");
        }
        PlanVerdict::NotArrived => println!("❌ Planner did not reach the target"),
        PlanVerdict::Empty => println!("❌ Planner returned no steps"),
        PlanVerdict::LimitViolation {
            step,
            joint,
            value,
            limit,
        } => println!(
            "❌ Step {step} joint {joint} = {value} outside [{}, {}]",
            limit.min, limit.max
        ),
    }

    if execute {
        if !verdict.is_accepted() {
            bail!("refusing to execute a plan that failed validation");
        }
        let ack = session.planner().execute().await?;
        println!("▶️  Executed: {ack}");
    }
    Ok(())
}

async fn overlay(
    session: &Session,
    image: &Path,
    points: &[[f64; 2]],
    out: &Path,
) -> Result<()> {
    let jpeg = tokio::fs::read(image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let frame = arm_vision::codec::decode_jpeg(&jpeg)?;
    let encoded = BASE64_STANDARD.encode(&jpeg);
    let composited = session
        .mask()
        .overlay(&frame, &encoded, points, session.settings().overlay.max_opacity)
        .await?;
    let png = arm_vision::codec::encode_png(&composited)?;
    tokio::fs::write(out, png)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    println!("✅ Wrote {}", out.display());
    Ok(())
}

async fn history(session: &mut Session, follow: bool) -> Result<()> {
    let seeded = session.seed_history().await?;
    println!("{seeded} stored capture(s)");
    for record in session.history().snapshot() {
        println!("{:.3}  {} bytes", record.timestamp, record.image.len());
    }
    if !follow {
        return Ok(());
    }

    let mut updates = session.history().subscribe();
    session.start_change_feed();
    println!("📡 Following captures - Press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(record) = updates.borrow_and_update().last() {
                    println!("{:.3}  {} bytes", record.timestamp, record.image.len());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn hints_follow_fault_kind() {
        let safety = ClientError::from(arm_core::ArmError::ExecutionDisabled);
        assert!(hint(&safety).unwrap().contains("new plan"));
        let link = ClientError::NotConnected("cannot send server.info".into());
        assert!(hint(&link).unwrap().contains("endpoints"));
        assert!(hint(&ClientError::ReservedId(200)).is_none());
    }

    #[test]
    fn points_parse() {
        assert_eq!(parse_point("10, 20.5").unwrap(), [10.0, 20.5]);
        assert!(parse_point("10").is_err());
        assert!(parse_point("a,1").is_err());
    }

    #[test]
    fn plan_offset_takes_three_values() {
        let cli = Cli::try_parse_from(["rust-arm", "plan", "--offset", "1", "-2", "3.5"]).unwrap();
        match cli.command {
            Commands::Plan { offset, execute } => {
                assert_eq!(offset, [1.0, -2.0, 3.5]);
                assert!(!execute);
            }
            _ => panic!("expected plan"),
        }
        assert!(Cli::try_parse_from(["rust-arm", "plan", "--offset", "1", "2"]).is_err());
    }
}
