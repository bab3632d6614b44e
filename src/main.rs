//! Live audio relay
//!
//! Encodes one audio input to MP3 while at least one listener is connected
//! and streams it to every listener over HTTP.
//!
//! Examples:
//!   audio-relay -input default                      # PulseAudio default source
//!   audio-relay -format alsa -input hw:0 -port 9000
//!   audio-relay -format mp3 -input music.mp3 -bitrate 128
//!
//! Listen with:
//!   ffplay http://localhost:8080/audio
//!   mpv http://localhost:8080/audio

use std::time::Duration;

use audio_relay::engine::{InputFormat, InputSpec, OutputSpec};
use audio_relay::{AudioServer, ServerConfig};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_FORMAT: &str = "pulse";
const DEFAULT_BITRATE_KBPS: u32 = 96;

/// Parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    host: String,
    port: u16,
    format: String,
    input: String,
    bitrate_kbps: u32,
    ffmpeg: Option<String>,
    max_clients: usize,
    verbose: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            format: DEFAULT_FORMAT.into(),
            input: String::new(),
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            ffmpeg: None,
            max_clients: 0,
            verbose: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Run(Args),
}

/// Parse flags in `-flag value`, `--flag value` or `-flag=value` form
fn parse_args<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            return Err(format!("unexpected argument '{}'", arg));
        };
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag, None),
        };

        match name {
            "h" | "help" => return Ok(Command::Help),
            "verbose" | "v" => {
                parsed.verbose = match inline.as_deref() {
                    None | Some("true") => true,
                    Some("false") => false,
                    Some(other) => return Err(format!("invalid value '{}' for -verbose", other)),
                };
                continue;
            }
            _ => {}
        }

        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("flag -{} needs a value", name))?,
        };

        match name {
            "host" => parsed.host = value,
            "port" => {
                parsed.port = value
                    .parse()
                    .map_err(|_| format!("invalid port '{}'", value))?
            }
            "format" => parsed.format = value,
            "input" => parsed.input = value,
            "bitrate" => {
                parsed.bitrate_kbps = value
                    .parse()
                    .map_err(|_| format!("invalid bitrate '{}'", value))?
            }
            "ffmpeg" => parsed.ffmpeg = Some(value),
            "max-clients" => {
                parsed.max_clients = value
                    .parse()
                    .map_err(|_| format!("invalid client limit '{}'", value))?
            }
            other => return Err(format!("unknown flag -{}", other)),
        }
    }

    if parsed.host.trim().is_empty() {
        return Err("missing -host".into());
    }
    if parsed.format.trim().is_empty() {
        return Err("missing -format".into());
    }
    if parsed.input.trim().is_empty() {
        return Err("missing -input".into());
    }

    Ok(Command::Run(parsed))
}

impl Args {
    fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn server_config(&self) -> Result<ServerConfig, String> {
        let format: InputFormat = self.format.parse()?;
        let bitrate = self
            .bitrate_kbps
            .checked_mul(1000)
            .filter(|b| *b > 0)
            .ok_or_else(|| format!("invalid bitrate {} kbit/s", self.bitrate_kbps))?;

        let input = InputSpec::new(format, self.input.clone()).verbose(self.verbose);
        let mut config = ServerConfig::with_input(input)
            .bind(self.bind_addr())
            .output(OutputSpec::default().bitrate(bitrate))
            .max_connections(self.max_clients)
            .shutdown_timeout(Duration::from_secs(5));

        if let Some(ffmpeg) = &self.ffmpeg {
            config = config.ffmpeg_path(ffmpeg);
        }

        Ok(config)
    }
}

fn print_usage() {
    eprintln!("Usage: audio-relay -input INPUT [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -host HOST          Address to listen on (default: {})", DEFAULT_HOST);
    eprintln!("  -port PORT          Port to listen on (default: {})", DEFAULT_PORT);
    eprintln!("  -format FORMAT      Input format: capture device demuxer (pulse, alsa, ...)");
    eprintln!("                      or a file format (mp3, wav, flac, file) (default: {})", DEFAULT_FORMAT);
    eprintln!("  -input INPUT        Device name or file path (required)");
    eprintln!("  -bitrate KBPS       MP3 bitrate in kbit/s (default: {})", DEFAULT_BITRATE_KBPS);
    eprintln!("  -ffmpeg PATH        ffmpeg executable (default: ffmpeg)");
    eprintln!("  -max-clients N      Listener limit, 0 for none (default: 0)");
    eprintln!("  -verbose            Debug logging and encoder diagnostics");
    eprintln!("  -help               Show this help");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  audio-relay -input default");
    eprintln!("  audio-relay -format mp3 -input music.mp3 -port 9000");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Unable to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print_usage();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("audio_relay={}", level).parse()?),
        )
        .init();

    let config = match args.server_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let server = AudioServer::new(config);
    if let Err(e) = server.run_until(shutdown_signal()).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    Ok(())
}
