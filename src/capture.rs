//! V4L2 frame source
//!
//! Streams raw frames from `v4l2-ctl --stream-to=-` and hands each one to
//! the frame consumer over a bounded channel. Nothing here knows about
//! bursts; every frame the camera produces is delivered.

use anyhow::{Context, Result};
use image::{GrayImage, ImageBuffer};
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BitDepth {
    #[value(name = "8")]
    Eight,
    #[value(name = "16")]
    Sixteen,
}

impl BitDepth {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            BitDepth::Eight => 1,
            BitDepth::Sixteen => 2,
        }
    }

    fn pixel_format(self) -> &'static str {
        match self {
            BitDepth::Eight => "GREY",
            BitDepth::Sixteen => "Y16 ",
        }
    }
}

/// Frame source configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub bit_depth: BitDepth,
    pub stream_buffers: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            bit_depth: BitDepth::Eight,
            stream_buffers: 4,
        }
    }
}

impl CaptureConfig {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bit_depth.bytes_per_pixel()
    }

    /// Build a frame from one raw buffer of exactly [`Self::frame_len`] bytes.
    pub fn decode(&self, raw: &[u8]) -> Option<Frame> {
        match self.bit_depth {
            BitDepth::Eight => {
                GrayImage::from_raw(self.width, self.height, raw.to_vec()).map(Frame::gray8)
            }
            BitDepth::Sixteen => {
                let pixels = raw
                    .chunks_exact(2)
                    .map(|px| u16::from_le_bytes([px[0], px[1]]))
                    .collect();
                ImageBuffer::from_raw(self.width, self.height, pixels).map(Frame::gray16)
            }
        }
    }
}

/// Running `v4l2-ctl` stream plus the thread that forwards its frames.
pub struct V4l2FrameSource {
    child: Child,
    handle: JoinHandle<u64>,
}

impl V4l2FrameSource {
    pub fn start(config: &CaptureConfig, frames: SyncSender<Frame>) -> Result<Self> {
        let output = Command::new("v4l2-ctl")
            .args([
                "-d",
                &config.device_path,
                &format!(
                    "--set-fmt-video=width={},height={},pixelformat={}",
                    config.width,
                    config.height,
                    config.bit_depth.pixel_format()
                ),
            ])
            .output()
            .context("Failed to run v4l2-ctl")?;
        if !output.status.success() {
            tracing::warn!(
                "Could not set video format: {:?}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let mut child = Command::new("v4l2-ctl")
            .args([
                "-d",
                &config.device_path,
                &format!("--stream-mmap={}", config.stream_buffers),
                "--stream-to=-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to start v4l2-ctl stream")?;
        let stdout: ChildStdout = child
            .stdout
            .take()
            .context("v4l2-ctl stdout was not captured")?;

        tracing::info!(
            "Streaming {}x{} {:?} from {}",
            config.width,
            config.height,
            config.bit_depth,
            config.device_path
        );
        let config = config.clone();
        let handle = thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || forward_frames(stdout, &config, &frames))
            .context("Failed to spawn frame source thread")?;

        Ok(Self { child, handle })
    }

    /// Stop streaming and wait for the forwarding thread.
    pub fn stop(mut self) -> Result<u64> {
        if let Err(e) = self.child.kill() {
            tracing::debug!("v4l2-ctl already exited: {}", e);
        }
        self.child.wait().context("Failed to reap v4l2-ctl")?;
        let delivered = self
            .handle
            .join()
            .map_err(|_| anyhow::anyhow!("frame source thread panicked"))?;
        tracing::info!("Capture stopped after {} frames", delivered);
        Ok(delivered)
    }
}

/// Read whole frames until the stream ends or the consumer is gone.
/// Returns the number of frames delivered.
fn forward_frames<R: Read>(mut input: R, config: &CaptureConfig, frames: &SyncSender<Frame>) -> u64 {
    let mut raw = vec![0u8; config.frame_len()];
    let mut delivered = 0;
    if raw.is_empty() {
        tracing::warn!("Frame size is zero, not reading the stream");
        return delivered;
    }
    loop {
        if let Err(e) = input.read_exact(&mut raw) {
            if e.kind() != ErrorKind::UnexpectedEof {
                tracing::warn!("Frame stream read failed: {}", e);
            }
            break;
        }
        let Some(frame) = config.decode(&raw) else {
            tracing::warn!("Dropping frame with unexpected size");
            continue;
        };
        if frames.send(frame).is_err() {
            break;
        }
        delivered += 1;
    }
    delivered
}
