//! Supervisor control loop
//!
//! A single task owns the [`DemandTracker`], the writer end of the frame
//! stream while no run holds it, and the stop signal of the active run.
//! Sessions reach it only through [`SupervisorHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::run::{Run, RunExit};
use super::state::{Action, BackoffPolicy, DemandTracker, Phase, RunId, RunOutcome};
use crate::engine::{Engine, InputSpec, OutputSpec};
use crate::relay::FrameSink;

/// Subscriber count change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Joined,
    Left,
}

/// Cloneable handle for reporting demand to the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    demand: mpsc::UnboundedSender<Demand>,
}

impl SupervisorHandle {
    /// Report a new subscriber
    ///
    /// The returned lease reports the matching leave exactly once, when it is
    /// released or dropped.
    pub fn join(&self) -> DemandLease {
        self.send(Demand::Joined);
        DemandLease {
            handle: Some(self.clone()),
        }
    }

    /// Whether the supervisor loop has exited
    pub fn is_closed(&self) -> bool {
        self.demand.is_closed()
    }

    fn send(&self, demand: Demand) {
        if self.demand.send(demand).is_err() {
            tracing::debug!(?demand, "Supervisor gone, demand change dropped");
        }
    }

    /// Handle wired to a bare channel instead of a running supervisor
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Demand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { demand: tx }, rx)
    }
}

/// One unit of demand held by a session
#[derive(Debug)]
pub struct DemandLease {
    handle: Option<SupervisorHandle>,
}

impl DemandLease {
    /// Report the leave now
    pub fn release(mut self) {
        self.leave();
    }

    fn leave(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.send(Demand::Left);
        }
    }
}

impl Drop for DemandLease {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub input: InputSpec,
    pub output: OutputSpec,
    pub backoff: BackoffPolicy,
    /// How long shutdown waits for the active run to exit
    pub shutdown_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(input: InputSpec, output: OutputSpec) -> Self {
        Self {
            input,
            output,
            backoff: BackoffPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// The encode lifecycle supervisor task
pub struct Supervisor<E: Engine> {
    engine: Arc<E>,
    config: SupervisorConfig,
    tracker: DemandTracker,
    demand: mpsc::UnboundedReceiver<Demand>,
    exits_tx: mpsc::UnboundedSender<RunExit>,
    exits: mpsc::UnboundedReceiver<RunExit>,
    /// Present while no run holds it
    sink: Option<FrameSink>,
    /// Stop signal of the run in flight
    stop: Option<CancellationToken>,
    /// Run started while the stream was still held, launched on the next exit
    pending: Option<RunId>,
    restart_at: Option<Instant>,
    shutdown: CancellationToken,
}

impl<E: Engine> Supervisor<E> {
    pub fn new(
        engine: E,
        config: SupervisorConfig,
        sink: FrameSink,
        shutdown: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (demand_tx, demand_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            engine: Arc::new(engine),
            tracker: DemandTracker::new(config.backoff),
            config,
            demand: demand_rx,
            exits_tx,
            exits: exits_rx,
            sink: Some(sink),
            stop: None,
            pending: None,
            restart_at: None,
            shutdown,
        };

        (supervisor, SupervisorHandle { demand: demand_tx })
    }

    /// Spawn the control loop on the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown, then stop the active run
    pub async fn run(mut self) {
        tracing::debug!("Supervisor started");

        loop {
            let restart_at = self.restart_at;

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(exit) = self.exits.recv() => self.on_exit(exit),

                Some(demand) = self.demand.recv() => {
                    let action = match demand {
                        Demand::Joined => self.tracker.on_join(),
                        Demand::Left => self.tracker.on_leave(),
                    };
                    tracing::debug!(
                        ?demand,
                        subscribers = self.tracker.subscribers(),
                        "Demand changed"
                    );
                    self.apply(action);
                }

                _ = sleep_until(restart_at), if restart_at.is_some() => {
                    self.restart_at = None;
                    let action = self.tracker.on_restart_timer();
                    self.apply(action);
                }
            }
        }

        self.shutdown_run().await;
        tracing::debug!("Supervisor stopped");
    }

    fn on_exit(&mut self, exit: RunExit) {
        self.sink = Some(exit.sink);
        if self.tracker.run_in_flight() == Some(exit.id) {
            self.stop = None;
        }

        let action = self.tracker.on_exit(exit.id, exit.outcome, exit.frames);
        self.apply(action);
        self.resume_pending();
    }

    fn resume_pending(&mut self) {
        let Some(id) = self.pending.take() else {
            return;
        };

        match self.tracker.phase() {
            Phase::Running(running) if running == id => self.start(id),
            Phase::Stopping(stopping) if stopping == id => {
                // Stopped before it was ever launched
                let action = self.tracker.on_exit(id, RunOutcome::Stopped, 0);
                self.apply(action);
            }
            _ => {}
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Start(id) => self.start(id),
            Action::Stop(id) => {
                tracing::info!(run_id = id, "Stopping encode run");
                if let Some(stop) = self.stop.take() {
                    stop.cancel();
                }
            }
            Action::RestartAfter(delay) => {
                tracing::warn!(
                    failures = self.tracker.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Encode run keeps failing, delaying restart"
                );
                self.restart_at = Some(Instant::now() + delay);
            }
            Action::Nothing => {}
        }

        if self.tracker.phase() != Phase::Backoff {
            self.restart_at = None;
        }
    }

    fn start(&mut self, id: RunId) {
        let Some(sink) = self.sink.take() else {
            tracing::warn!(run_id = id, "Frame stream still held, run deferred");
            self.pending = Some(id);
            return;
        };

        tracing::info!(
            run_id = id,
            subscribers = self.tracker.subscribers(),
            "Starting encode run"
        );

        let stop = CancellationToken::new();
        self.stop = Some(stop.clone());

        Run::new(
            id,
            Arc::clone(&self.engine),
            self.config.input.clone(),
            self.config.output.clone(),
            stop,
        )
        .spawn(sink, self.exits_tx.clone());
    }

    async fn shutdown_run(&mut self) {
        let action = self.tracker.on_shutdown();
        self.apply(action);

        let Some(id) = self.tracker.run_in_flight() else {
            return;
        };

        let timeout = self.config.shutdown_timeout;
        let wait = async {
            while let Some(exit) = self.exits.recv().await {
                self.on_exit(exit);
                if self.tracker.run_in_flight().is_none() {
                    break;
                }
            }
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            tracing::warn!(run_id = id, "Encode run did not stop in time");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
