//! Frame I/O through ffmpeg pipes.
//!
//! Decoding and encoding are delegated to the `ffmpeg` binary: frames travel as raw RGB24 over
//! stdin/stdout, so the pipeline only ever sees `image::RgbImage`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::report::VideoMetadata;
use image::RgbImage;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metadata::{self, parse_frame_rate};

/// Geometry and rate of the first video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl StreamInfo {
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Sequential supply of decoded frames
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Consumer of rendered frames
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the output. Must be called for the file to be complete.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Everything the service needs from the media toolchain
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Container-level metadata for the report
    async fn probe_metadata(&self, path: &Path, timeout: Duration) -> Result<VideoMetadata>;

    /// Stream geometry needed to decode; failure aborts the run
    fn probe_stream(&self, path: &Path) -> Result<StreamInfo>;

    fn open_reader(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSource>>;

    fn open_writer(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>>;
}

/// `MediaBackend` backed by the ffmpeg/ffprobe binaries on `PATH`
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend;

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe_metadata(&self, path: &Path, timeout: Duration) -> Result<VideoMetadata> {
        metadata::probe_metadata(path, timeout).await
    }

    fn probe_stream(&self, path: &Path) -> Result<StreamInfo> {
        probe_stream_info(path)
    }

    fn open_reader(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegFrameReader::spawn(path, *info)?))
    }

    fn open_writer(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegVideoWriter::spawn(path, *info)?))
    }
}

/// Probe the displayed width, height and frame rate of the first video stream
pub fn probe_stream_info(path: &Path) -> Result<StreamInfo> {
    debug!(path = %path.display(), "probing video stream");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate:stream_tags=rotate:stream_side_data=rotation",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ffprobe failed ({}): {}", output.status, stderr.trim());
    }

    let data: serde_json::Value =
        serde_json::from_slice(&output.stdout).context("failed to parse ffprobe output")?;
    parse_stream_info(&data)
}

fn parse_stream_info(data: &serde_json::Value) -> Result<StreamInfo> {
    let stream = &data["streams"][0];

    let width = stream["width"]
        .as_u64()
        .and_then(|w| u32::try_from(w).ok())
        .context("video stream has no width")?;
    let height = stream["height"]
        .as_u64()
        .and_then(|h| u32::try_from(h).ok())
        .context("video stream has no height")?;
    let fps = stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_frame_rate)
        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_frame_rate))
        .context("video stream has no usable frame rate")?;

    if width == 0 || height == 0 {
        anyhow::bail!("video stream reports empty frame size {}x{}", width, height);
    }

    // The decoder applies the display rotation, so quarter turns swap the frame shape
    let rotation = stream_rotation(stream);
    let (width, height) = if rotation.rem_euclid(180) == 90 {
        debug!(rotation, "rotated stream, swapping frame dimensions");
        (height, width)
    } else {
        (width, height)
    };

    Ok(StreamInfo { width, height, fps })
}

/// Rotation in degrees from the display matrix side data or the legacy `rotate` tag
fn stream_rotation(stream: &serde_json::Value) -> i64 {
    let from_side_data = stream["side_data_list"].as_array().and_then(|list| {
        list.iter().find_map(|entry| {
            entry["rotation"]
                .as_i64()
                .or_else(|| entry["rotation"].as_f64().map(|r| r.round() as i64))
        })
    });

    from_side_data
        .or_else(|| {
            stream["tags"]["rotate"]
                .as_str()
                .and_then(|r| r.trim().parse().ok())
        })
        .unwrap_or(0)
}

/// Decodes a file into RGB24 frames
pub struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    info: StreamInfo,
    finished: bool,
}

impl FfmpegFrameReader {
    pub fn spawn(path: &Path, info: StreamInfo) -> Result<Self> {
        debug!(path = %path.display(), width = info.width, height = info.height, "starting decoder");

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn ffmpeg decoder")?;

        let stdout = child
            .stdout
            .take()
            .context("ffmpeg decoder has no stdout")?;

        Ok(Self {
            child,
            stdout,
            info,
            finished: false,
        })
    }
}

impl FrameSource for FfmpegFrameReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.info.frame_bytes()];
        let filled = read_full(&mut self.stdout, &mut buffer).context("failed to read frame")?;

        if filled == 0 {
            self.finished = true;
            let status = self.child.wait().context("failed to wait for ffmpeg decoder")?;
            if !status.success() {
                anyhow::bail!("ffmpeg decoder exited with {}", status);
            }
            return Ok(None);
        }

        if filled < buffer.len() {
            anyhow::bail!(
                "truncated frame: got {} of {} bytes",
                filled,
                buffer.len()
            );
        }

        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .context("frame buffer does not match stream geometry")
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encodes RGB24 frames to H.264 at the source rate and resolution
pub struct FfmpegVideoWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    /// Drains encoder diagnostics so a chatty encoder never blocks on a full pipe
    stderr: Option<JoinHandle<String>>,
    info: StreamInfo,
}

impl FfmpegVideoWriter {
    pub fn spawn(path: &Path, info: StreamInfo) -> Result<Self> {
        debug!(path = %path.display(), fps = info.fps, "starting encoder");

        let size = format!("{}x{}", info.width, info.height);
        let rate = format!("{}", info.fps);

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(&size)
            .arg("-r")
            .arg(&rate)
            .args(["-i", "pipe:0", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg encoder")?;

        let stdin = child.stdin.take().context("ffmpeg encoder has no stdin")?;
        let mut stderr = child.stderr.take().context("ffmpeg encoder has no stderr")?;
        let stderr = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stderr: Some(stderr),
            info,
        })
    }
}

impl FrameSink for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.width() != self.info.width || frame.height() != self.info.height {
            anyhow::bail!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            );
        }

        let stdin = self.stdin.as_mut().context("encoder already closed")?;
        stdin
            .write_all(frame.as_raw())
            .context("failed to write frame to ffmpeg encoder")
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin signals end of stream
        drop(self.stdin.take());

        let mut child = self.child.take().context("encoder already finished")?;
        let status = child.wait().context("failed to wait for ffmpeg encoder")?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            anyhow::bail!("ffmpeg encoder exited with {}: {}", status, stderr.trim());
        }
        Ok(())
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("encoder dropped without finish, output will be incomplete");
            drop(self.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
