//! Burst capture daemon
//!
//! Waits for `"<prefix> <exposure_us> <count> <gain>"` commands on a local
//! TCP socket, fires that many software triggers on the camera and saves
//! each triggered frame as a NumPy array.

mod camera;
mod capture;
mod config;
mod consumer;
mod error;
mod frame;
mod gate;
#[cfg(test)]
mod mock;
mod protocol;
mod server;
mod shutdown;
mod sink;
mod status;
mod trigger;
mod watchdog;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use camera::{CameraControl, CameraSettings, V4l2Camera};
use capture::V4l2FrameSource;
use config::{CaptureArgs, Cli, Command, DaemonConfig, RequestArgs, ServeArgs};
use consumer::FrameConsumer;
use gate::AcquisitionGate;
use protocol::{encode_request, BurstRequest, Reply, DEFAULT_GAIN};
use server::CommandServer;
use shutdown::Shutdown;
use sink::NpySink;
use status::DaemonStatus;
use trigger::TriggerController;

/// Camera, frame path and shared state, alive for the whole process
struct Daemon {
    camera: CameraSettings,
    gate: Arc<AcquisitionGate>,
    status: Arc<DaemonStatus>,
    shutdown: Shutdown,
    source: V4l2FrameSource,
    consumer: JoinHandle<()>,
}

impl Daemon {
    fn start(config: &DaemonConfig) -> Result<Self> {
        let backend: Arc<dyn CameraControl> =
            Arc::new(V4l2Camera::new(config.capture.device_path.clone()));
        let camera = CameraSettings::open(backend, config.exposure_max_us)
            .context("Failed to configure camera")?;

        let gate = Arc::new(AcquisitionGate::new());
        let status = Arc::new(DaemonStatus::new());
        let sink = NpySink::new(&config.output_dir)?;
        info!("Saving frames to {}", sink.dir().display());

        let (frames_tx, frames_rx) = sync_channel(config.frame_queue);
        let consumer = FrameConsumer::new(gate.clone(), Box::new(sink), status.clone())
            .spawn(frames_rx)
            .context("Failed to spawn frame consumer")?;
        let source = V4l2FrameSource::start(&config.capture, frames_tx)?;

        Ok(Self {
            camera,
            gate,
            status,
            shutdown: Shutdown::new(),
            source,
            consumer,
        })
    }

    fn controller(&self, config: &DaemonConfig) -> TriggerController {
        TriggerController::new(
            self.camera.clone(),
            self.gate.clone(),
            self.status.clone(),
            self.shutdown.clone(),
            config.timing,
        )
    }

    /// Set the shutdown flag on Ctrl+C.
    fn watch_signals(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    shutdown.trigger();
                }
                Err(e) => error!("Could not listen for Ctrl+C: {}", e),
            }
        });
    }

    /// Put the camera back to free-running and drain the frame path.
    fn finish(self) -> Result<()> {
        self.camera.restore_defaults();
        self.source.stop()?;
        self.consumer
            .join()
            .map_err(|_| anyhow::anyhow!("frame consumer panicked"))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Capture(args) => capture_once(args).await,
        Command::Request(args) => send_request(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("Trigger capture daemon starting...");
    let config = args.camera.into_config();
    let daemon = Daemon::start(&config)?;
    daemon.watch_signals();

    if let Some(addr) = args.status_addr {
        let daemon_status = daemon.status.clone();
        let gate = daemon.gate.clone();
        let shutdown = daemon.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, daemon_status, gate, shutdown).await {
                error!("Status endpoint failed: {:#}", e);
            }
        });
    }

    let served = async {
        let server = CommandServer::bind(
            args.bind,
            daemon.controller(&config),
            daemon.status.clone(),
            daemon.shutdown.clone(),
            config.server,
        )
        .await?;
        server.run().await
    }
    .await;

    daemon.finish()?;
    info!("Daemon stopped");
    served
}

async fn capture_once(args: CaptureArgs) -> Result<()> {
    let config = args.camera.into_config();
    let daemon = Daemon::start(&config)?;
    daemon.watch_signals();

    let request = BurstRequest {
        prefix: args.prefix,
        exposure_us: args.exposure_us,
        count: args.count,
        gain: DEFAULT_GAIN,
    };
    let outcome = daemon.controller(&config).run_burst(&request).await;

    daemon.finish()?;
    info!("{} of {} frames captured", outcome.frames(), request.count);
    Ok(())
}

async fn send_request(args: RequestArgs) -> Result<()> {
    let request = BurstRequest {
        prefix: args.prefix,
        exposure_us: args.exposure_us,
        count: args.count,
        gain: args.gain,
    };
    let mut stream = TcpStream::connect(args.addr)
        .await
        .with_context(|| format!("Failed to connect to {}", args.addr))?;
    stream.write_all(&encode_request(&request)?).await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    match Reply::parse(&reply) {
        Some(Reply::Done) => {
            info!("Burst '{}' done", request.prefix);
            Ok(())
        }
        Some(Reply::Error) => bail!("Daemon rejected the command"),
        None => bail!("Unexpected reply {:?}", String::from_utf8_lossy(&reply)),
    }
}
