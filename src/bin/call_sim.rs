use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info};

use peercall::sim::{SimBackends, SimMediaEngine};
use peercall::types::{
    ActiveCall, CallId, CallPhase, Connectivity, PeerId, PresentationState, SessionId,
    SignalingState, TerminationOptions, TerminationReason,
};
use peercall::{CallOptions, CallSession, CallSessionConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    /// Dial, get answered, talk, hang up.
    Outgoing,
    /// Ring, accept, peer hangs up.
    Incoming,
    /// Connect, then promote the call to a conference.
    Upgrade,
    /// Dial and never get an answer.
    Timeout,
}

#[derive(Parser)]
#[command(name = "call_sim")]
#[command(about = "Drive a call session against in-memory collaborators")]
struct Args {
    #[arg(long, value_enum, default_value = "outgoing")]
    scenario: Scenario,

    /// Print presentation snapshots as JSON
    #[arg(long)]
    json: bool,

    /// JSON file overriding session timings
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("Scenario failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CallSessionConfig::from_json_file(path)?,
        None => CallSessionConfig::default(),
    };
    if matches!(args.scenario, Scenario::Timeout) && args.config.is_none() {
        config.ring_timeout_secs = 3;
    }

    let sim = SimBackends::new();
    let id = SessionId::generate();
    let options = match args.scenario {
        Scenario::Incoming => CallOptions::incoming(id.clone()),
        _ => CallOptions::outgoing(id.clone()),
    };
    let session = CallSession::start(options, sim.backends(), config).await?;
    let printer = tokio::spawn(print_snapshots(session.state(), args.json));

    match args.scenario {
        Scenario::Outgoing => {
            dial_and_connect(&sim, &session).await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            session.hang_up().await?;
        }
        Scenario::Incoming => {
            sim.signaling.push(&id, SignalingState::Ringing);
            tokio::time::sleep(Duration::from_millis(500)).await;
            session.accept().await?;
            sim.signaling.push(&id, SignalingState::Accepting);
            sim.signaling.push(&id, SignalingState::Active(sample_call()));
            let engine = wait_for_engine(&sim).await?;
            engine.set_connectivity(Connectivity::Connected);
            tokio::time::sleep(Duration::from_secs(1)).await;
            sim.signaling.push(
                &id,
                SignalingState::Terminated {
                    id: Some(sample_call().id),
                    reason: Some(TerminationReason::HUNG_UP),
                    options: TerminationOptions {
                        report_rating: true,
                        send_debug_logs: false,
                    },
                },
            );
        }
        Scenario::Upgrade => {
            dial_and_connect(&sim, &session).await?;
            let conference = session
                .upgrade_to_conference(vec![PeerId(2), PeerId(3)])
                .await?;
            info!("Conference ready: {:?}", *conference.members().borrow());
            println!("conference state: {:?}", *session.conference_state().borrow());
            sim.signaling.push(
                &id,
                SignalingState::Terminated {
                    id: Some(sample_call().id),
                    reason: Some(TerminationReason::switched_to_conference("sim-room")),
                    options: TerminationOptions::default(),
                },
            );
        }
        Scenario::Timeout => {
            sim.signaling
                .push(&id, SignalingState::Requesting { ringing: false });
        }
    }

    tokio::time::timeout(Duration::from_secs(60), session.can_be_removed())
        .await
        .context("session never became removable")?;
    info!("Tones played: {:?}", sim.tones.played());
    session.close().await;
    printer.abort();
    Ok(())
}

async fn dial_and_connect(sim: &SimBackends, session: &CallSession) -> Result<()> {
    let id = session.id();
    sim.signaling
        .push(id, SignalingState::Requesting { ringing: false });
    sim.signaling
        .push(id, SignalingState::Requesting { ringing: true });
    tokio::time::sleep(Duration::from_millis(500)).await;
    sim.signaling.push(id, SignalingState::Active(sample_call()));
    let engine = wait_for_engine(sim).await?;
    engine.set_connectivity(Connectivity::Connected);
    engine.set_reception(Some(4));
    Ok(())
}

async fn wait_for_engine(sim: &SimBackends) -> Result<Arc<SimMediaEngine>> {
    for _ in 0..100 {
        if let Some(engine) = sim.media.last_engine() {
            return Ok(engine);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("media engine was never created")
}

fn sample_call() -> ActiveCall {
    ActiveCall {
        id: CallId::new(1, 0x5151),
        encryption_key: vec![0x42; 256],
        key_visual_hash: vec![0xDE, 0xAD, 0xBE, 0xEF],
        transport: Vec::new(),
        max_layer: 92,
        version: "sim".to_string(),
        custom_params: None,
        allows_p2p: true,
        supports_conference: true,
    }
}

async fn print_snapshots(mut state: tokio::sync::watch::Receiver<PresentationState>, json: bool) {
    loop {
        let snapshot = state.borrow_and_update().clone();
        if json {
            match serde_json::to_string(&snapshot) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("Failed to encode snapshot: {e}"),
            }
        } else {
            println!("{}", describe(&snapshot));
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

fn describe(snapshot: &PresentationState) -> String {
    let phase = match &snapshot.call_phase {
        CallPhase::Requesting { ringing } => format!("requesting(ringing: {ringing})"),
        CallPhase::Active {
            since, reception, ..
        } => format!("active(since {}, reception {:?})", since.format("%H:%M:%S"), reception),
        CallPhase::Terminated { reason, .. } => format!("terminated({:?})", reason),
        other => other.name().to_string(),
    };
    format!(
        "{phase} muted={} video={:?}",
        snapshot.is_muted, snapshot.video_state
    )
}
