//! Handle to an ongoing analysis

use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll};

use derivative::Derivative;
use futures::Stream;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::error::Result;
use crate::info::Info;
use crate::session::Request;

/// State shared between the driver task and the caller
struct Shared {
    /// Latest info per root move, merged by the `multipv` field
    multipv: Mutex<Vec<Info>>,
    /// Set exactly once, when the engine stops emitting or dies
    outcome: OnceLock<Result<()>>,
    notify: Notify,
}

impl Shared {
    fn resolve(&self, outcome: Result<()>) {
        if self.outcome.set(outcome).is_ok() {
            self.notify.notify_waiters();
        }
    }
}

/// Driver-side producer half of an analysis
pub(crate) struct AnalysisSink {
    tx: mpsc::UnboundedSender<Info>,
    shared: Arc<Shared>,
}

impl AnalysisSink {
    /// Merges one info record into the per-root-move state and enqueues it
    /// for the consumer
    pub(crate) fn post(&self, info: Info) {
        let slot = info.multipv.unwrap_or(1).max(1) as usize;
        {
            let mut multipv = self.shared.multipv.lock().expect("analysis state poisoned");
            while multipv.len() < slot {
                multipv.push(Info::default());
            }
            multipv[slot - 1].update(&info);
        }

        // The consumer may be gone already; the analysis then only feeds
        // the merged state until the engine acknowledges the stop.
        let _ = self.tx.send(info);
    }

    /// Marks the analysis complete. Dropping the sink afterwards closes the
    /// stream, which is the end marker the consumer observes.
    pub(crate) fn finish(self) {
        trace!("analysis finished");
        self.shared.resolve(Ok(()));
    }

    pub(crate) fn fail(self, err: crate::EngineError) {
        trace!(%err, "analysis failed");
        self.shared.resolve(Err(err));
    }
}

/// Handle to an ongoing engine analysis, returned by
/// [`Engine::analysis`](crate::Engine::analysis).
///
/// Information records are consumed in order with [`Analysis::next`] (or
/// through the [`Stream`] impl); the merged latest state is available at any
/// time through [`Analysis::info`] and [`Analysis::multipv`]. Dropping the
/// handle stops the analysis.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Analysis {
    #[derivative(Debug = "ignore")]
    rx: mpsc::UnboundedReceiver<Info>,
    #[derivative(Debug = "ignore")]
    shared: Arc<Shared>,
    #[derivative(Debug = "ignore")]
    stop: Option<(u64, mpsc::UnboundedSender<Request>)>,
    ended: bool,
}

/// Creates the linked producer and consumer halves for the command with the
/// given sequence number
pub(crate) fn channel(
    seq: u64,
    requests: mpsc::UnboundedSender<Request>,
) -> (AnalysisSink, Analysis) {
    let shared = Arc::new(Shared {
        multipv: Mutex::new(vec![Info::default()]),
        outcome: OnceLock::new(),
        notify: Notify::new(),
    });
    let (tx, rx) = mpsc::unbounded_channel();

    let sink = AnalysisSink {
        tx,
        shared: shared.clone(),
    };
    let analysis = Analysis {
        rx,
        shared,
        stop: Some((seq, requests)),
        ended: false,
    };
    (sink, analysis)
}

impl Analysis {
    /// The next info record, or `Ok(None)` once the analysis completed and
    /// everything has been consumed. Fails if the analysis ended with an
    /// error (typically because the engine died).
    pub async fn next(&mut self) -> Result<Option<Info>> {
        if !self.ended {
            if let Some(info) = self.rx.recv().await {
                return Ok(Some(info));
            }
            self.ended = true;
        }
        match self.shared.outcome.get() {
            Some(Err(err)) => Err(err.clone()),
            _ => Ok(None),
        }
    }

    /// Waits until the analysis is complete or stopped, without consuming
    /// the info stream
    pub async fn wait(&self) -> Result<()> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.shared.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Latest merged info for the best root move
    pub fn info(&self) -> Info {
        self.multipv().swap_remove(0)
    }

    /// Latest merged info per root move, ordered by `multipv` rank
    pub fn multipv(&self) -> Vec<Info> {
        self.shared
            .multipv
            .lock()
            .expect("analysis state poisoned")
            .clone()
    }

    /// Asks the engine to stop the analysis as soon as possible. The stream
    /// still delivers whatever the engine emits until it acknowledges.
    pub fn stop(&mut self) {
        if let Some((seq, requests)) = self.stop.take() {
            if self.shared.outcome.get().is_none() {
                let _ = requests.send(Request::Stop { seq });
            }
        }
    }
}

impl Drop for Analysis {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Stream for Analysis {
    type Item = Info;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Info>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.ended = true;
                Poll::Ready(None)
            }
            ready => ready,
        }
    }
}
