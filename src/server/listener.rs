//! Audio relay server
//!
//! Wires the pieces together and owns their lifecycle:
//!
//! ```text
//!   Supervisor ──starts──► Run ──FrameSink──► Relay ──► sessions ──► HTTP
//!        ▲                                                  │
//!        └────────────── join / leave (DemandLease) ────────┘
//! ```
//!
//! All tasks share one shutdown token. The external shutdown signal or a
//! fatal relay error cancels it; the relay then ends every response, the
//! supervisor stops the encoder, and the HTTP server drains.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::config::ServerConfig;
use super::http::{router, AppState};
use crate::engine::{Engine, FfmpegEngine};
use crate::error::{Error, Result};
use crate::relay::{frame_stream, Relay};
use crate::supervisor::Supervisor;

/// Live audio relay server
pub struct AudioServer<E: Engine> {
    config: ServerConfig,
    engine: E,
}

impl AudioServer<FfmpegEngine> {
    /// Create a server encoding with `ffmpeg`
    pub fn new(config: ServerConfig) -> Self {
        let engine = FfmpegEngine::new(config.ffmpeg_path.clone());
        Self::with_engine(config, engine)
    }
}

impl<E: Engine> AudioServer<E> {
    /// Create a server with a custom engine
    pub fn with_engine(config: ServerConfig, engine: E) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server
    ///
    /// This method blocks until the relay fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let listener = TcpListener::bind(self.config.bind_addr.as_str()).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            input = %self.config.input.url,
            format = %self.config.input.format,
            "Audio relay listening"
        );

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let token = CancellationToken::new();

        let (sink, reader) = frame_stream(&self.config.relay);
        let (relay, relay_handle) = Relay::new(&self.config.relay, reader, token.clone());
        let (supervisor, supervisor_handle) = Supervisor::new(
            self.engine,
            self.config.supervisor_config(),
            sink,
            token.clone(),
        );

        let mut relay_task = relay.spawn();
        let supervisor_task = supervisor.spawn();

        let state = AppState::new(
            relay_handle,
            supervisor_handle,
            &self.config.output,
            self.config.max_connections,
        );
        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
        let drained = token.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { drained.cancelled().await })
                .await
        });

        let relay_exit = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                None
            }
            result = &mut relay_task => Some(result),
        };

        token.cancel();

        let relay_result = match relay_exit {
            Some(result) => result,
            None => relay_task.await,
        };

        if let Err(e) = supervisor_task.await {
            tracing::error!(error = %e, "Supervisor task failed");
        }

        let served = server_task.await.map_err(io::Error::other)?;
        tracing::info!("Audio relay stopped");

        relay_result.map_err(io::Error::other)??;
        served.map_err(Error::from)
    }
}
