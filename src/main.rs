use anyhow::Result;
use clap::{Parser, Subcommand};
use coach_capture::sim::{synthetic_audio_stream, ScriptedTransport, SimulatedDevices, StaticContext};
use coach_capture::{
    AspectRatio, Config, JsonFileMetadataStore, LocalBlobStorage, RecordingPreference,
    SessionOrchestrator, SessionPorts, StartOutcome, TransportEvent, WavCodecs,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "coach-capture")]
#[command(about = "Record coaching sessions: camera, microphone and the agent's voice")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/coach-capture")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as JSON
    ShowConfig,

    /// Run a full session against simulated devices and a scripted agent
    Simulate {
        /// none, audio or audio+video (defaults to the config file)
        #[arg(short, long)]
        preference: Option<RecordingPreference>,

        /// 16:9, 9:16, 4:3 or 1:1 (defaults to the config file)
        #[arg(short, long)]
        ratio: Option<AspectRatio>,

        /// How long the conversation lasts
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match args.command {
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
        Command::Simulate {
            preference,
            ratio,
            seconds,
        } => simulate(&cfg, preference, ratio, seconds).await,
    }
}

async fn simulate(
    cfg: &Config,
    preference: Option<RecordingPreference>,
    ratio: Option<AspectRatio>,
    seconds: u64,
) -> Result<()> {
    let mut session_config = cfg.session_config();
    if let Some(preference) = preference {
        session_config.preference = preference;
    }
    if let Some(ratio) = ratio {
        session_config.aspect_ratio = ratio;
    }
    let spec = session_config.mixer.spec;

    let transport = Arc::new(ScriptedTransport::new());
    let ports = SessionPorts {
        devices: Arc::new(SimulatedDevices::new().with_audio_spec(spec)),
        codecs: Arc::new(WavCodecs),
        transport: transport.clone(),
        storage: Arc::new(LocalBlobStorage::new(&cfg.persistence.recordings_path)),
        metadata: Arc::new(JsonFileMetadataStore::new(&cfg.persistence.metadata_path)),
        context: Some(Arc::new(StaticContext(serde_json::json!({
            "scenario": "simulated",
        })))),
        clip_fetcher: None,
    };

    let orchestrator = SessionOrchestrator::new(session_config, ports);

    match orchestrator.start().await? {
        StartOutcome::Started { session_id } => info!("Session {} started", session_id),
        other => {
            warn!("Session did not start: {:?}", other);
            return Ok(());
        }
    }

    // The agent greets the participant shortly after connecting
    sleep(Duration::from_millis(300)).await;
    transport.emit(TransportEvent::AgentStartSpeaking).await;
    transport
        .publish_remote(synthetic_audio_stream("agent-voice", 220.0, spec))
        .await;

    sleep(Duration::from_secs(seconds)).await;
    if let Some(elapsed) = orchestrator.elapsed() {
        info!("Stopping after {:.1}s", elapsed.as_secs_f64());
    }

    let report = orchestrator.stop().await?;
    info!(
        "Captured {} chunks ({} bytes) in {:.1}s",
        report.chunks.len(),
        report.chunks.total_bytes(),
        report.chunks.duration.as_secs_f64()
    );
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if let Some(url) = &report.artifact_url {
        info!("Recording: {}", url);
    }
    if let Some(record) = &report.record {
        println!("{}", serde_json::to_string_pretty(record)?);
    }

    Ok(())
}
