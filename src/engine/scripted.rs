//! In-memory engine for tests
//!
//! Frames are fed by the test through a channel shared by every run, so a
//! test controls exactly when each frame is produced. Counters record how
//! many transcoders were started and torn down.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use super::{Engine, InputSpec, OutputSpec, Step, Transcoder};
use crate::error::EngineError;

/// What the next step of the running transcoder returns
#[derive(Debug)]
pub(crate) enum Feed {
    Frame(Bytes),
    Empty,
    Eof,
    Fail,
    Panic,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    started: AtomicUsize,
    dropped: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

#[derive(Clone)]
pub(crate) struct ScriptedEngine {
    feed: Arc<Mutex<mpsc::UnboundedReceiver<Feed>>>,
    counters: Arc<Counters>,
    fail_open: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> (Self, mpsc::UnboundedSender<Feed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            feed: Arc::new(Mutex::new(rx)),
            counters: Arc::new(Counters::default()),
            fail_open: Arc::new(AtomicBool::new(false)),
        };
        (engine, tx)
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Calls to `open_input`, successful or not
    pub(crate) fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Transcoders created
    pub(crate) fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    /// Transcoders torn down
    pub(crate) fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    /// Highest number of transcoders alive at the same time
    pub(crate) fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedTranscoder {
    feed: Arc<Mutex<mpsc::UnboundedReceiver<Feed>>>,
    counters: Arc<Counters>,
}

impl Engine for ScriptedEngine {
    type Input = ();
    type Output = ();
    type Transcoder = ScriptedTranscoder;

    async fn open_input(&self, input: &InputSpec) -> Result<(), EngineError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(EngineError::OpenInput {
                url: input.url.clone(),
                reason: "scripted failure".into(),
            });
        }
        Ok(())
    }

    async fn open_output(&self, _input: &(), _output: &OutputSpec) -> Result<(), EngineError> {
        Ok(())
    }

    async fn init_transcode(&self, _input: (), _output: ()) -> Result<ScriptedTranscoder, EngineError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(ScriptedTranscoder {
            feed: Arc::clone(&self.feed),
            counters: Arc::clone(&self.counters),
        })
    }
}

impl Transcoder for ScriptedTranscoder {
    async fn step(&mut self) -> Result<Step, EngineError> {
        let next = self.feed.lock().await.recv().await;
        match next {
            Some(Feed::Frame(frame)) => Ok(Step::Frame(frame)),
            Some(Feed::Empty) => Ok(Step::Empty),
            Some(Feed::Eof) | None => Ok(Step::Eof),
            Some(Feed::Fail) => Err(EngineError::Step("scripted failure".into())),
            Some(Feed::Panic) => panic!("scripted panic"),
        }
    }
}

impl Drop for ScriptedTranscoder {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds, panicking after a second
pub(crate) async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// A frame of `len` bytes filled with `fill`
pub(crate) fn frame_bytes(len: usize, fill: u8) -> Bytes {
    Bytes::from(vec![fill; len])
}
