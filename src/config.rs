//! Command line and daemon configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::capture::{BitDepth, CaptureConfig};
use crate::protocol::DEFAULT_GAIN;
use crate::server::ServerSettings;
use crate::trigger::TriggerTiming;

pub const DEFAULT_BIND: &str = "127.0.0.1:65432";

#[derive(Parser, Debug)]
#[command(
    name = "trigger-capture",
    version,
    about = "Software-triggered burst capture over a TCP command socket"
)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the capture daemon and wait for burst commands
    Serve(ServeArgs),
    /// Run a single burst locally and exit
    Capture(CaptureArgs),
    /// Send one burst command to a running daemon
    Request(RequestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// V4L2 device of the camera
    #[arg(long, default_value = "/dev/video0")]
    pub device: String,

    #[arg(long, default_value_t = 640)]
    pub width: u32,

    #[arg(long, default_value_t = 480)]
    pub height: u32,

    #[arg(long, value_enum, default_value = "8")]
    pub bit_depth: BitDepth,

    /// Directory for the saved .npy frames
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Exposure ceiling applied at startup
    #[arg(long, default_value_t = 60_000)]
    pub exposure_max_us: u32,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub camera: CameraArgs,

    /// Command socket address
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Serve GET /status on this address
    #[arg(long)]
    pub status_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub camera: CameraArgs,

    pub prefix: String,
    pub exposure_us: u32,
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Daemon command socket
    #[arg(long, default_value = DEFAULT_BIND)]
    pub addr: SocketAddr,

    pub prefix: String,
    pub exposure_us: u32,
    pub count: u32,

    #[arg(default_value_t = DEFAULT_GAIN, allow_negative_numbers = true)]
    pub gain: i32,
}

/// Everything the daemon needs at startup
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub capture: CaptureConfig,
    pub output_dir: PathBuf,
    pub exposure_max_us: u32,
    pub timing: TriggerTiming,
    pub server: ServerSettings,
    /// Frames buffered between frame source and consumer.
    pub frame_queue: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            output_dir: PathBuf::from("."),
            exposure_max_us: 60_000,
            timing: TriggerTiming::default(),
            server: ServerSettings::default(),
            frame_queue: 8,
        }
    }
}

impl CameraArgs {
    pub fn into_config(self) -> DaemonConfig {
        let defaults = DaemonConfig::default();
        DaemonConfig {
            capture: CaptureConfig {
                device_path: self.device,
                width: self.width,
                height: self.height,
                bit_depth: self.bit_depth,
                ..defaults.capture
            },
            output_dir: self.output_dir,
            exposure_max_us: self.exposure_max_us,
            ..defaults
        }
    }
}
