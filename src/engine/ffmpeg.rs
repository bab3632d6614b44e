//! ffmpeg-backed Frame Source
//!
//! Each transcode context is one `ffmpeg` child process that captures or
//! reads the input, re-encodes it to MP3 and writes the elementary stream to
//! its stdout. Frames are cut out of that stream with [`Mp3FrameReader`].
//!
//! The child is spawned with `kill_on_drop`, so dropping the transcoder (on
//! stop, EOF or failure) tears the process down.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStdout, Command};

use super::mp3::{FrameRead, Mp3FrameReader};
use super::{Engine, InputFormat, InputSpec, OutputSpec, Step, Transcoder};
use crate::error::EngineError;

/// Engine driving an external `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: PathBuf,
}

impl FfmpegEngine {
    /// Use the given executable
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Path of the executable
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// An opened (validated) input
#[derive(Debug, Clone)]
pub struct FfmpegInput {
    args: Vec<String>,
    verbose: bool,
}

impl FfmpegInput {
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// An opened (validated) output
#[derive(Debug, Clone)]
pub struct FfmpegOutput {
    args: Vec<String>,
}

impl FfmpegOutput {
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// A running ffmpeg process
pub struct FfmpegTranscoder {
    child: Child,
    frames: Mp3FrameReader<ChildStdout>,
}

impl Engine for FfmpegEngine {
    type Input = FfmpegInput;
    type Output = FfmpegOutput;
    type Transcoder = FfmpegTranscoder;

    async fn open_input(&self, input: &InputSpec) -> Result<FfmpegInput, EngineError> {
        let open_error = |reason: String| EngineError::OpenInput {
            url: input.url.clone(),
            reason,
        };

        let mut args = Vec::new();
        match &input.format {
            InputFormat::Capture { demuxer } => {
                if input.url.trim().is_empty() {
                    return Err(open_error("capture device is empty".into()));
                }
                args.extend(["-f".to_string(), demuxer.clone()]);
                args.extend(["-i".to_string(), input.url.clone()]);
            }
            InputFormat::File { demuxer } => {
                let path = input.url.strip_prefix("file:").unwrap_or(&input.url);
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| open_error(e.to_string()))?;
                if !metadata.is_file() {
                    return Err(open_error("not a regular file".into()));
                }

                // Relay files at playback speed, not as fast as they decode
                args.push("-re".to_string());
                if let Some(demuxer) = demuxer {
                    args.extend(["-f".to_string(), demuxer.clone()]);
                }
                args.extend(["-i".to_string(), path.to_string()]);
            }
        }

        tracing::debug!(format = %input.format, url = %input.url, "Input opened");

        Ok(FfmpegInput {
            args,
            verbose: input.verbose,
        })
    }

    async fn open_output(
        &self,
        _input: &FfmpegInput,
        output: &OutputSpec,
    ) -> Result<FfmpegOutput, EngineError> {
        if output.bitrate == 0 || output.bitrate > output.codec.max_bitrate() {
            return Err(EngineError::OpenOutput(format!(
                "unsupported bitrate {} for {}",
                output.bitrate,
                output.codec.encoder()
            )));
        }

        // Sample rate follows the input; channels are forced to stereo
        let bitrate = output.bitrate.to_string();
        let args = [
            "-vn",
            "-ac",
            "2",
            "-c:a",
            output.codec.encoder(),
            "-b:a",
            bitrate.as_str(),
            "-f",
            output.codec.container(),
            "-id3v2_version",
            "0",
            "-write_xing",
            "0",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Ok(FfmpegOutput { args })
    }

    async fn init_transcode(
        &self,
        input: FfmpegInput,
        output: FfmpegOutput,
    ) -> Result<FfmpegTranscoder, EngineError> {
        let log_level = if input.verbose { "info" } else { "error" };

        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-nostdin", "-loglevel", log_level])
            .args(&input.args)
            .args(&output.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if input.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            EngineError::InitTranscode(format!("{}: {}", self.program.display(), e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::InitTranscode("missing stdout pipe".into()))?;

        tracing::debug!(pid = ?child.id(), "Encoder process started");

        Ok(FfmpegTranscoder {
            child,
            frames: Mp3FrameReader::new(stdout),
        })
    }
}

impl FfmpegTranscoder {
    async fn exit_status(&mut self) -> Result<ExitStatus, EngineError> {
        Ok(self.child.wait().await?)
    }
}

impl Transcoder for FfmpegTranscoder {
    async fn step(&mut self) -> Result<Step, EngineError> {
        match self.frames.next_frame().await? {
            FrameRead::Frame(frame) => Ok(Step::Frame(frame)),
            FrameRead::Skipped(n) => {
                tracing::trace!(bytes = n, "Skipped bytes looking for frame sync");
                Ok(Step::Empty)
            }
            FrameRead::Eof => {
                let status = self.exit_status().await?;
                if status.success() {
                    Ok(Step::Eof)
                } else {
                    Err(EngineError::Step(format!("encoder exited with {}", status)))
                }
            }
        }
    }
}
