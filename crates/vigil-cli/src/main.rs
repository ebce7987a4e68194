//! vigil CLI for the wake-word voice node.
//!
//! ```text
//! vigil run [--model models/alexa_v0.1.onnx] [--device 2] [--server-url http://host:5285/command]
//! vigil devices
//! vigil send command.wav [--server-url ...]
//! vigil health / text "hello" [--node http://localhost:8080]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil_lib::buffer::FrameBuffer;
use vigil_lib::capture::{MicCapture, list_devices};
use vigil_lib::dispatch::{CommandDispatcher, CommandHandler};
use vigil_lib::listener::{Listener, ListenerConfig};
use vigil_lib::openwakeword::{ModelPaths, OnnxBackend, OpenWakeWordModel};
use vigil_lib::server;
use vigil_lib::speech::Voice;
use vigil_lib::state::NodeStatus;
use vigil_lib::vigil_core::endpoint::EndpointConfig;
use vigil_lib::vigil_core::types::{DispatchConfig, SpeechConfig};
use vigil_lib::vigil_core::wav::{SAMPLE_RATE, decode_wav};
use vigil_lib::wake::{EnergySpikeModel, WakeWordModel};

/// vigil: wake-word voice node that forwards spoken commands
#[derive(Parser)]
#[command(name = "vigil", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv); ignored when RUST_LOG is set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake word and dispatch commands
    Run(RunArgs),
    /// List audio devices and their indices
    Devices,
    /// Send a 16 kHz mono WAV file as if it were a captured command
    Send {
        /// WAV file to upload
        wav: PathBuf,
        #[command(flatten)]
        dispatch: DispatchArgs,
        #[command(flatten)]
        speech: SpeechArgs,
    },
    /// Query a running node's health
    Health {
        /// Node status URL
        #[arg(long, env = "VIGIL_NODE", default_value = "http://localhost:8080")]
        node: String,
    },
    /// Submit text to a running node
    Text {
        /// Text to submit
        text: String,
        /// Node status URL
        #[arg(long, env = "VIGIL_NODE", default_value = "http://localhost:8080")]
        node: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Wake word label to listen for
    #[arg(long, env = "VIGIL_WAKE_WORD", default_value = "alexa")]
    wake_word: String,
    /// openWakeWord classifier model (ONNX)
    #[arg(long, env = "VIGIL_WAKE_MODEL", default_value = "models/alexa_v0.1.onnx")]
    model: PathBuf,
    /// Directory holding melspectrogram.onnx and embedding_model.onnx;
    /// defaults to the classifier's directory
    #[arg(long, env = "VIGIL_FEATURE_MODELS")]
    feature_models: Option<PathBuf>,
    /// Score raw energy spikes instead of running the ONNX models. Any loud
    /// sound will trigger.
    #[arg(long, env = "VIGIL_ENERGY_FALLBACK")]
    energy_fallback: bool,
    /// Wake word confidence threshold
    #[arg(long, env = "VIGIL_THRESHOLD", default_value = "0.6")]
    threshold: f32,
    /// RMS level (i16 scale) below which audio counts as silence
    #[arg(long, env = "VIGIL_SILENCE_THRESHOLD", default_value = "200")]
    silence_threshold: f32,
    /// Seconds of silence after speech that end a command
    #[arg(long, env = "VIGIL_SILENCE_DURATION", default_value = "1.0")]
    silence_duration: f32,
    /// Hard cap on a command recording, in seconds
    #[arg(long, env = "VIGIL_MAX_RECORD_DURATION", default_value = "10.0")]
    max_record_duration: f32,
    /// Audio discarded right after the wake word, in milliseconds
    #[arg(long, env = "VIGIL_WAKEWORD_SKIP_MS", default_value = "400")]
    wakeword_skip_ms: u64,
    /// Input device index (see `vigil devices`); default device if omitted
    #[arg(long, env = "VIGIL_DEVICE")]
    device: Option<usize>,
    /// Seconds of audio the frame buffer holds before dropping the oldest
    #[arg(long, env = "VIGIL_BUFFER_SECONDS", default_value = "30")]
    buffer_seconds: f32,
    /// Status server host
    #[arg(long, env = "VIGIL_HTTP_HOST", default_value = "0.0.0.0")]
    http_host: String,
    /// Status server port
    #[arg(long, env = "VIGIL_HTTP_PORT", default_value = "8080")]
    http_port: u16,
    #[command(flatten)]
    dispatch: DispatchArgs,
    #[command(flatten)]
    speech: SpeechArgs,
}

#[derive(Args)]
struct DispatchArgs {
    /// Endpoint that receives command recordings
    #[arg(long, env = "VIGIL_SERVER_URL", default_value = "http://localhost:5285/command")]
    server_url: String,
    /// Upload timeout in seconds
    #[arg(long, env = "VIGIL_DISPATCH_TIMEOUT", default_value = "30")]
    dispatch_timeout: f32,
}

impl DispatchArgs {
    fn config(&self) -> anyhow::Result<DispatchConfig> {
        Ok(DispatchConfig {
            server_url: self.server_url.clone(),
            timeout: seconds(self.dispatch_timeout, "--dispatch-timeout")?,
        })
    }
}

#[derive(Args)]
struct SpeechArgs {
    /// Kokoro TTS server URL
    #[arg(long, env = "VIGIL_KOKORO_URL", default_value = "http://localhost:8880")]
    kokoro_url: String,
    /// TTS voice
    #[arg(long, env = "VIGIL_VOICE", default_value = "af_heart")]
    voice: String,
    /// TTS playback speed
    #[arg(long, env = "VIGIL_SPEED", default_value = "1.0")]
    speed: f32,
    /// Do not speak server replies
    #[arg(long, env = "VIGIL_NO_SPEECH")]
    no_speech: bool,
}

impl SpeechArgs {
    fn config(&self) -> Option<SpeechConfig> {
        (!self.no_speech).then(|| SpeechConfig {
            kokoro_url: self.kokoro_url.clone(),
            voice: self.voice.clone(),
            speed: self.speed,
        })
    }
}

fn seconds(value: f32, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f32(value).with_context(|| format!("{flag} must be a non-negative number of seconds"))
}

/// The wake-word classifier `vigil run` scores windows with.
fn wake_model(
    wake_word: &str,
    model: &Path,
    feature_models: Option<&Path>,
    energy_fallback: bool,
) -> vigil_lib::Result<Box<dyn WakeWordModel>> {
    if energy_fallback {
        warn!("using the energy-spike fallback: any sudden loud sound will trigger, not just \"{wake_word}\"");
        return Ok(Box::new(EnergySpikeModel::new(wake_word)));
    }
    let paths = ModelPaths::new(model, feature_models);
    Ok(Box::new(OpenWakeWordModel::<OnnxBackend>::load(&paths, wake_word)?))
}

/// Dispatcher plus, unless disabled, a Kokoro voice for replies.
///
/// Builds blocking HTTP clients, so call it off the async runtime.
fn command_handler(
    dispatch: DispatchConfig,
    speech: Option<SpeechConfig>,
    status: NodeStatus,
) -> vigil_lib::Result<CommandHandler> {
    let handler = CommandHandler::new(CommandDispatcher::new(dispatch)?, status);
    Ok(match speech {
        Some(config) => handler.with_responder(Voice::kokoro(config)?),
        None => handler,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match cli.verbose {
            0 => "info",
            1 => "info,vigil_lib=debug",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dispatch_command(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch_command(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => run(args).await,
        Command::Devices => {
            for device in list_devices()? {
                println!("{device}");
            }
            Ok(())
        }
        Command::Send {
            wav,
            dispatch,
            speech,
        } => send(wav, dispatch.config()?, speech.config()).await,
        Command::Health { node } => {
            let resp = reqwest::Client::new()
                .get(format!("{}/health", node.trim_end_matches('/')))
                .send()
                .await
                .with_context(|| format!("no node at {node}"))?;
            println!("{}", resp.text().await.unwrap_or_default());
            Ok(())
        }
        Command::Text { text, node } => {
            let resp = reqwest::Client::new()
                .post(format!("{}/text", node.trim_end_matches('/')))
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await
                .with_context(|| format!("no node at {node}"))?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                bail!("node rejected text ({status}): {body}");
            }
            println!("{body}");
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let endpoint = EndpointConfig {
        silence_threshold: args.silence_threshold,
        silence_duration: seconds(args.silence_duration, "--silence-duration")?,
        max_duration: seconds(args.max_record_duration, "--max-record-duration")?,
        skip: Duration::from_millis(args.wakeword_skip_ms),
    };
    let listener_config = ListenerConfig {
        wake_word: args.wake_word.clone(),
        threshold: args.threshold,
        endpoint,
        ..ListenerConfig::default()
    };
    let dispatch = args.dispatch.config()?;
    let speech = args.speech.config();

    let status = NodeStatus::new();
    let buffer = Arc::new(FrameBuffer::for_duration(seconds(
        args.buffer_seconds,
        "--buffer-seconds",
    )?));

    // Status surface first, so supervisors can see the node initializing.
    let addr: SocketAddr = tokio::net::lookup_host((args.http_host.as_str(), args.http_port))
        .await
        .with_context(|| format!("cannot resolve {}", args.http_host))?
        .next()
        .with_context(|| format!("no address for {}", args.http_host))?;
    let mut server_task = tokio::spawn(server::serve(addr, status.clone()));

    let mut capture = MicCapture::start(buffer.clone(), args.device).context("failed to start microphone")?;

    info!(
        server_url = %dispatch.server_url,
        speech = speech.is_some(),
        "starting listener"
    );
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<vigil_lib::Result<()>>();
    let listener_thread = {
        let buffer = buffer.clone();
        let status = status.clone();
        std::thread::Builder::new()
            .name("vigil-listener".into())
            .spawn(move || {
                let parts = wake_model(
                    &listener_config.wake_word,
                    &args.model,
                    args.feature_models.as_deref(),
                    args.energy_fallback,
                )
                .and_then(|model| Ok((model, command_handler(dispatch, speech, status.clone())?)));
                let (model, handler) = match parts {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let mut listener = Listener::new(buffer, status, model, handler, listener_config);
                let _ = ready_tx.send(Ok(()));
                listener.run();
            })?
    };
    ready_rx
        .await
        .context("listener thread exited during start-up")?
        .context("failed to set up the listener")?;

    let server_failure = wait_for_shutdown(tokio::signal::ctrl_c(), &mut server_task).await?;

    buffer.close();
    capture.stop();
    let dropped = buffer.dropped_frames();
    if dropped > 0 {
        warn!(
            frames = dropped,
            capacity = buffer.capacity(),
            "audio frames dropped while the listener was busy"
        );
    }
    tokio::task::spawn_blocking(move || listener_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("listener thread panicked"))?;
    server_task.abort();
    match server_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Wait for `shutdown` (Ctrl-C) or for the status server to stop. A server
/// that stops first is a failure, returned so `run` can exit non-zero after
/// shutting the node down.
async fn wait_for_shutdown(
    shutdown: impl Future<Output = std::io::Result<()>>,
    server_task: &mut JoinHandle<vigil_lib::Result<()>>,
) -> anyhow::Result<Option<anyhow::Error>> {
    let failure = tokio::select! {
        res = shutdown => {
            res.context("failed to wait for Ctrl-C")?;
            info!("shutting down");
            return Ok(None);
        }
        res = server_task => match res {
            Ok(Ok(())) => anyhow::anyhow!("status server exited"),
            Ok(Err(e)) => anyhow::Error::new(e).context("status server failed"),
            Err(e) => anyhow::Error::new(e).context("status server task panicked"),
        },
    };
    warn!("status server stopped, shutting the node down");
    Ok(Some(failure))
}

async fn send(path: PathBuf, dispatch: DispatchConfig, speech: Option<SpeechConfig>) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let pcm = decode_wav(&bytes).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    if pcm.channels != 1 || pcm.sample_rate != SAMPLE_RATE {
        bail!(
            "{}: expected 16 kHz mono, got {} Hz with {} channel(s)",
            path.display(),
            pcm.sample_rate,
            pcm.channels
        );
    }
    info!(file = %path.display(), samples = pcm.samples.len(), "sending command file");

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let mut handler = command_handler(dispatch, speech, NodeStatus::new())?;
        Ok(handler.handle(&pcm.samples))
    })
    .await??;

    match outcome {
        Some(outcome) => {
            println!("{} {}", outcome.status, outcome.text.trim());
            Ok(())
        }
        None => bail!("command was not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_server_failure_is_an_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let mut server_task = tokio::spawn(server::serve(addr, NodeStatus::new()));

        let failure = wait_for_shutdown(std::future::pending(), &mut server_task)
            .await
            .unwrap()
            .expect("server stop should be reported");
        assert!(format!("{failure:#}").contains("status server failed"), "{failure:#}");
    }

    #[tokio::test]
    async fn ctrl_c_is_a_clean_shutdown() {
        let mut server_task = tokio::spawn(std::future::pending::<vigil_lib::Result<()>>());
        let failure = wait_for_shutdown(async { Ok(()) }, &mut server_task).await.unwrap();
        assert!(failure.is_none());
        server_task.abort();
    }

    #[test]
    fn energy_fallback_needs_no_model_files() {
        let model = wake_model("alexa", Path::new("/nonexistent/alexa.onnx"), None, true);
        assert!(model.is_ok());
    }

    #[test]
    fn missing_onnx_models_fail_start_up() {
        let model = wake_model("alexa", Path::new("/nonexistent/alexa.onnx"), None, false);
        assert!(matches!(model, Err(vigil_lib::Error::WakeWord(_))));
    }
}
