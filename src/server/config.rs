//! Server configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{InputFormat, InputSpec, OutputSpec};
use crate::error::{Error, Result};
use crate::relay::RelayConfig;
use crate::supervisor::{BackoffPolicy, SupervisorConfig};

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (`host:port`, host names are resolved)
    pub bind_addr: String,

    /// Audio input to relay
    pub input: InputSpec,

    /// Encoded output served to listeners
    pub output: OutputSpec,

    /// `ffmpeg` executable
    pub ffmpeg_path: PathBuf,

    /// Maximum concurrent listeners (0 = unlimited)
    pub max_connections: usize,

    /// Delay before the second restart of a failing run (0 = no backoff)
    pub restart_backoff: Duration,

    /// Upper bound of the restart delay
    pub max_restart_backoff: Duration,

    /// How long shutdown waits for the encoder to stop
    pub shutdown_timeout: Duration,

    /// Relay buffer sizes
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "localhost:8080".into(),
            input: InputSpec::new(
                InputFormat::Capture {
                    demuxer: "pulse".into(),
                },
                "",
            ),
            output: OutputSpec::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            max_connections: 0, // Unlimited
            restart_backoff: Duration::from_millis(500),
            max_restart_backoff: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config relaying the given input
    pub fn with_input(input: InputSpec) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the output
    pub fn output(mut self, output: OutputSpec) -> Self {
        self.output = output;
        self
    }

    /// Set the `ffmpeg` executable
    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the restart backoff range
    pub fn restart_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.restart_backoff = initial;
        self.max_restart_backoff = max.max(initial);
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set relay options
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Check the config can be served
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(Error::Config("listen address is empty".into()));
        }
        if self.input.url.trim().is_empty() {
            return Err(Error::Config("input is empty".into()));
        }
        let max_bitrate = self.output.codec.max_bitrate();
        if self.output.bitrate == 0 || self.output.bitrate > max_bitrate {
            return Err(Error::Config(format!(
                "bitrate {} outside 1..={} for {}",
                self.output.bitrate,
                max_bitrate,
                self.output.codec.encoder()
            )));
        }

        // Channel and pipe sizes of zero can never carry a frame
        if self.relay.client_queue_capacity == 0 {
            return Err(Error::Config("client queue capacity must be positive".into()));
        }
        if self.relay.announce_capacity == 0 {
            return Err(Error::Config("announce capacity must be positive".into()));
        }
        if self.relay.stream_buffer_size == 0 {
            return Err(Error::Config("stream buffer size must be positive".into()));
        }
        Ok(())
    }

    /// Supervisor settings derived from this config
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.input.clone(), self.output.clone())
            .backoff(BackoffPolicy::new(
                self.restart_backoff,
                self.max_restart_backoff,
            ))
            .shutdown_timeout(self.shutdown_timeout)
    }
}
