//! Frame Source control interface
//!
//! The relay treats the audio capture/decode/encode engine as a black box
//! reached through a narrow interface:
//!
//! ```text
//!   Engine::open_input(InputSpec)        -> Input
//!   Engine::open_output(&Input, OutputSpec) -> Output
//!   Engine::init_transcode(Input, Output)   -> Transcoder
//!   Transcoder::step()                      -> Frame(bytes) | Empty | Eof | Err
//! ```
//!
//! Teardown is ownership based: each handle releases what it acquired when it
//! is dropped, so a chain that fails halfway through initialization only
//! releases the parts that were actually opened.
//!
//! [`ffmpeg::FfmpegEngine`] is the production engine. It drives an `ffmpeg`
//! child process and splits its MP3 output on frame boundaries with the
//! parser in [`mp3`].

pub mod ffmpeg;
pub mod mp3;
#[cfg(test)]
pub(crate) mod scripted;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::EngineError;

pub use ffmpeg::FfmpegEngine;

/// Default encoder bitrate in bits per second
pub const DEFAULT_BITRATE: u32 = 96_000;

/// How the input is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFormat {
    /// Live capture device read through a device demuxer (e.g. `pulse`)
    Capture { demuxer: String },
    /// Path-based input, optionally with an explicit container format
    File { demuxer: Option<String> },
}

impl InputFormat {
    /// Containers that are read from a path rather than a device
    const FILE_CONTAINERS: [&'static str; 6] = ["mp3", "wav", "flac", "ogg", "aac", "m4a"];

    /// Demuxer name to force, if any
    pub fn demuxer(&self) -> Option<&str> {
        match self {
            InputFormat::Capture { demuxer } => Some(demuxer),
            InputFormat::File { demuxer } => demuxer.as_deref(),
        }
    }

    /// Whether the input is a live device (never reaches EOF on its own)
    pub fn is_live(&self) -> bool {
        matches!(self, InputFormat::Capture { .. })
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("input format is empty".into());
        }

        let lower = s.to_ascii_lowercase();
        if lower == "file" {
            return Ok(InputFormat::File { demuxer: None });
        }
        if Self::FILE_CONTAINERS.iter().any(|c| *c == lower) {
            return Ok(InputFormat::File {
                demuxer: Some(lower),
            });
        }

        Ok(InputFormat::Capture {
            demuxer: s.to_string(),
        })
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Capture { demuxer } => write!(f, "{}", demuxer),
            InputFormat::File { demuxer: Some(d) } => write!(f, "{}", d),
            InputFormat::File { demuxer: None } => write!(f, "file"),
        }
    }
}

/// What to open on the input side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub format: InputFormat,
    /// Device identifier or file path
    pub url: String,
    /// Let the engine log its own diagnostics
    pub verbose: bool,
}

impl InputSpec {
    pub fn new(format: InputFormat, url: impl Into<String>) -> Self {
        Self {
            format,
            url: url.into(),
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Compressed output codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCodec {
    #[default]
    Mp3,
}

impl OutputCodec {
    /// Container/muxer name
    pub fn container(&self) -> &'static str {
        match self {
            OutputCodec::Mp3 => "mp3",
        }
    }

    /// Encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            OutputCodec::Mp3 => "libmp3lame",
        }
    }

    /// MIME type served to listeners
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputCodec::Mp3 => "audio/mpeg",
        }
    }

    /// Highest bitrate the encoder accepts, in bits per second
    pub fn max_bitrate(&self) -> u32 {
        match self {
            OutputCodec::Mp3 => 320_000,
        }
    }
}

/// What to produce on the output side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub codec: OutputCodec,
    /// Bits per second
    pub bitrate: u32,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            codec: OutputCodec::Mp3,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

impl OutputSpec {
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// Outcome of one decode/encode step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// One encoded frame (never empty)
    Frame(Bytes),
    /// The step produced no output
    Empty,
    /// The input is exhausted
    Eof,
}

/// An audio engine able to open inputs/outputs and build transcoders
pub trait Engine: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + 'static;
    type Transcoder: Transcoder;

    /// Open the input and its decoder
    fn open_input(
        &self,
        input: &InputSpec,
    ) -> impl Future<Output = Result<Self::Input, EngineError>> + Send;

    /// Open the output and its encoder, configured from the input
    fn open_output(
        &self,
        input: &Self::Input,
        output: &OutputSpec,
    ) -> impl Future<Output = Result<Self::Output, EngineError>> + Send;

    /// Bind an input and an output into a transcode context
    fn init_transcode(
        &self,
        input: Self::Input,
        output: Self::Output,
    ) -> impl Future<Output = Result<Self::Transcoder, EngineError>> + Send;
}

/// A live transcode context producing encoded frames
pub trait Transcoder: Send + 'static {
    /// Decode one unit and encode one unit
    fn step(&mut self) -> impl Future<Output = Result<Step, EngineError>> + Send;
}
