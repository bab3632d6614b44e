//! Run execution
//!
//! One run drives the engine from open to teardown, writing every encoded
//! frame to the shared frame stream. Whatever happens, the run reports
//! exactly one [`RunExit`], which also hands the stream's writer end back
//! to the supervisor.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{RunId, RunOutcome};
use crate::engine::{Engine, InputSpec, OutputSpec, Step, Transcoder};
use crate::error::EngineError;
use crate::relay::FrameSink;

/// Termination notification of a run
#[derive(Debug)]
pub struct RunExit {
    pub id: RunId,
    pub outcome: RunOutcome,
    /// Frames written during the run
    pub frames: u64,
    /// Writer end of the frame stream, returned for the next run
    pub sink: FrameSink,
}

/// One lifetime of the encoder
pub struct Run<E: Engine> {
    id: RunId,
    engine: Arc<E>,
    input: InputSpec,
    output: OutputSpec,
    stop: CancellationToken,
}

impl<E: Engine> Run<E> {
    pub fn new(
        id: RunId,
        engine: Arc<E>,
        input: InputSpec,
        output: OutputSpec,
        stop: CancellationToken,
    ) -> Self {
        Self {
            id,
            engine,
            input,
            output,
            stop,
        }
    }

    /// Execute on its own task, sending the exit to `exits` when done
    pub fn spawn(self, sink: FrameSink, exits: mpsc::UnboundedSender<RunExit>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let exit = self.execute(sink).await;
            if exits.send(exit).is_err() {
                tracing::debug!("Supervisor gone before run exit was reported");
            }
        })
    }

    /// Execute to completion and build the exit notification
    pub async fn execute(self, mut sink: FrameSink) -> RunExit {
        let mut frames = 0u64;

        let result = AssertUnwindSafe(self.transcode(&mut sink, &mut frames))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => {
                tracing::info!(run_id = self.id, frames = frames, outcome = ?outcome, "Encode run ended");
                outcome
            }
            Ok(Err(e)) => {
                tracing::error!(run_id = self.id, frames = frames, error = %e, "Encode run failed");
                RunOutcome::Failed
            }
            Err(_) => {
                tracing::error!(run_id = self.id, frames = frames, "Encode run panicked");
                RunOutcome::Failed
            }
        };

        RunExit {
            id: self.id,
            outcome,
            frames,
            sink,
        }
    }

    async fn transcode(&self, sink: &mut FrameSink, frames: &mut u64) -> Result<RunOutcome, EngineError> {
        let input = self.engine.open_input(&self.input).await?;
        let output = self.engine.open_output(&input, &self.output).await?;
        let mut transcoder = self.engine.init_transcode(input, output).await?;

        tracing::info!(
            run_id = self.id,
            format = %self.input.format,
            input = %self.input.url,
            "Encode run started"
        );

        loop {
            if self.stop.is_cancelled() {
                return Ok(RunOutcome::Stopped);
            }

            // A pending step is abandoned on stop; none of its bytes were
            // announced, so no partial frame reaches the stream
            let step = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Ok(RunOutcome::Stopped),
                step = transcoder.step() => step?,
            };

            match step {
                // Nothing reaches the stream, so it does not count as output
                Step::Frame(data) if data.is_empty() => {}
                Step::Frame(data) => {
                    sink.write_frame(&data).await?;
                    *frames += 1;
                    tracing::trace!(run_id = self.id, size = data.len(), "Frame written");
                }
                Step::Empty => {}
                Step::Eof => return Ok(RunOutcome::Eof),
            }
        }
    }
}
