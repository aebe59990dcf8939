use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ComposeError, ComposeResult};

const DEFAULT_VIDEO_CODEC: &str = "libx264";

/// Handle on the ffmpeg/ffprobe executables used for decoding, encoding and
/// muxing. Nothing is spawned until one of the methods is called.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    video_codec: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Ffmpeg {
    /// Uses the given executables, falling back to `ffmpeg`/`ffprobe` on PATH.
    pub fn new(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        let exe = |name: &str| {
            if cfg!(target_os = "windows") {
                PathBuf::from(format!("{name}.exe"))
            } else {
                PathBuf::from(name)
            }
        };

        Self {
            ffmpeg: ffmpeg.unwrap_or_else(|| exe("ffmpeg")),
            ffprobe: ffprobe.unwrap_or_else(|| exe("ffprobe")),
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
        }
    }

    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn probe_path(&self) -> &Path {
        &self.ffprobe
    }

    pub fn version(&self) -> ComposeResult<String> {
        let output = Command::new(&self.ffmpeg)
            .arg("-version")
            .output()
            .map_err(|e| spawn_error(&self.ffmpeg, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ComposeError::ffmpeg(format!(
                "ffmpeg -version failed: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("unknown").to_string())
    }

    pub fn probe(&self, video: &Path) -> ComposeResult<VideoInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(video)
            .output()
            .map_err(|e| spawn_error(&self.ffprobe, e))?;

        if !output.status.success() {
            return Err(ComposeError::ffmpeg(format!(
                "ffprobe failed for '{}': {}",
                video.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        VideoInfo::from_probe_json(&output.stdout)
    }

    /// Starts decoding `video` into raw rgb24 frames.
    pub fn open_frames(&self, video: &Path, info: &VideoInfo) -> ComposeResult<FrameReader> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin", "-i"])
            .arg(video)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!("Running FFmpeg decoder: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| spawn_error(&self.ffmpeg, e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ComposeError::ffmpeg("failed to open ffmpeg stdout"))?;

        Ok(FrameReader {
            child,
            stdout,
            frame_len: info.frame_len(),
        })
    }

    /// Starts encoding raw rgb24 frames of the given geometry into a silent
    /// video file at `out`.
    pub fn open_encoder(&self, out: &Path, info: &VideoInfo) -> ComposeResult<FrameWriter> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(format!("{}x{}", info.width, info.height))
            .arg("-r")
            .arg(info.frame_rate())
            .args(["-i", "pipe:0", "-an", "-c:v"])
            .arg(&self.video_codec)
            // yuv420p needs even dimensions
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2", "-pix_fmt", "yuv420p"])
            .arg(out)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        info!("Running FFmpeg encoder: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| spawn_error(&self.ffmpeg, e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ComposeError::ffmpeg("failed to open ffmpeg stdin"))?;

        Ok(FrameWriter {
            child,
            stdin: Some(stdin),
            frame_len: info.frame_len(),
        })
    }

    /// Copies the video stream of `video` and the first audio stream of
    /// `audio` into `out`, re-encoding the audio as AAC and stopping at the
    /// shorter of the two.
    pub fn mux_audio(&self, video: &Path, audio: &Path, out: &Path) -> ComposeResult<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-v", "error", "-nostdin", "-i"])
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args([
                "-c:v", "copy", "-c:a", "aac", "-map", "0:v:0", "-map", "1:a:0", "-shortest",
            ])
            .arg(out);

        info!("Running FFmpeg mux: {:?}", cmd);
        let output = cmd.output().map_err(|e| spawn_error(&self.ffmpeg, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ComposeError::ffmpeg(format!(
                "adding audio failed: {}",
                stderr.trim()
            )));
        }

        info!("Audio muxed into {}", out.display());
        Ok(())
    }
}

fn spawn_error(program: &Path, err: std::io::Error) -> ComposeError {
    ComposeError::ffmpeg(format!(
        "failed to run {} (is it installed and on PATH?): {err}",
        program.display()
    ))
}

/// Geometry and timing of the first video stream of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub frame_count: Option<u64>,
}

impl VideoInfo {
    pub fn from_probe_json(json: &[u8]) -> ComposeResult<Self> {
        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
            r_frame_rate: Option<String>,
            nb_frames: Option<String>,
        }
        #[derive(Deserialize)]
        struct ProbeOut {
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        let parsed: ProbeOut = serde_json::from_slice(json)
            .map_err(|e| ComposeError::ffmpeg(format!("ffprobe json parse failed: {e}")))?;

        let stream = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| ComposeError::validation("Error opening video file: no video stream"))?;

        let width = stream
            .width
            .filter(|w| *w > 0)
            .ok_or_else(|| ComposeError::validation("video stream has no width"))?;
        let height = stream
            .height
            .filter(|h| *h > 0)
            .ok_or_else(|| ComposeError::validation("video stream has no height"))?;
        let (fps_num, fps_den) = parse_ff_ratio(stream.r_frame_rate.as_deref().unwrap_or("0/1"))
            .filter(|(num, _)| *num > 0)
            .ok_or_else(|| ComposeError::validation("video stream has an invalid frame rate"))?;
        let frame_count = stream
            .nb_frames
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|n| *n > 0);

        Ok(Self {
            width,
            height,
            fps_num,
            fps_den,
            frame_count,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn frame_rate(&self) -> String {
        format!("{}/{}", self.fps_num, self.fps_den)
    }

    pub fn fps(&self) -> f64 {
        self.fps_num as f64 / self.fps_den as f64
    }
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.trim().parse::<u32>().ok()?;
    let b = match parts.next() {
        Some(b) => b.trim().parse::<u32>().ok()?,
        None => 1,
    };
    if b == 0 {
        return None;
    }
    Some((a, b))
}

/// Raw rgb24 frames streamed out of an ffmpeg decoder process.
pub struct FrameReader {
    child: Child,
    stdout: ChildStdout,
    frame_len: usize,
}

impl FrameReader {
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Fills `buf` with the next frame. Returns `false` once the stream ends;
    /// a trailing partial frame is dropped.
    pub fn next_frame(&mut self, buf: &mut [u8]) -> ComposeResult<bool> {
        if buf.len() != self.frame_len {
            return Err(ComposeError::validation(format!(
                "frame buffer holds {} bytes, expected {}",
                buf.len(),
                self.frame_len
            )));
        }

        let filled = read_full(&mut self.stdout, buf)?;
        if filled == 0 {
            return Ok(false);
        }
        if filled < self.frame_len {
            warn!(
                "Decoder ended with a partial frame ({filled} of {} bytes), dropping it",
                self.frame_len
            );
            return Ok(false);
        }
        Ok(true)
    }

    pub fn finish(self) -> ComposeResult<()> {
        let Self { child, stdout, .. } = self;
        drop(stdout);

        let output = child
            .wait_with_output()
            .map_err(|e| ComposeError::ffmpeg(format!("failed to wait for ffmpeg decoder: {e}")))?;

        if !output.status.success() {
            return Err(ComposeError::ffmpeg(format!(
                "decoder exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Reads until `buf` is full or the reader is exhausted, returning the
/// number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
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

/// Raw rgb24 frames streamed into an ffmpeg encoder process.
pub struct FrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_len: usize,
}

impl FrameWriter {
    pub fn write_frame(&mut self, frame: &[u8]) -> ComposeResult<()> {
        if frame.len() != self.frame_len {
            return Err(ComposeError::validation(format!(
                "frame holds {} bytes, expected {}",
                frame.len(),
                self.frame_len
            )));
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ComposeError::ffmpeg("encoder is already finalized"));
        };

        stdin
            .write_all(frame)
            .map_err(|e| ComposeError::ffmpeg(format!("failed to write frame to ffmpeg stdin: {e}")))
    }

    pub fn finish(mut self) -> ComposeResult<()> {
        drop(self.stdin.take());

        let output = self
            .child
            .wait_with_output()
            .map_err(|e| ComposeError::ffmpeg(format!("failed to wait for ffmpeg encoder: {e}")))?;

        if !output.status.success() {
            return Err(ComposeError::ffmpeg(format!(
                "encoder exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
