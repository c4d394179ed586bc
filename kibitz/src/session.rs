//! Command scheduling against a live engine process
//!
//! One [`Session`] task exclusively owns the transport and the protocol
//! driver. Callers reach it through an unbounded request channel; at most
//! one command is active at a time and at most one more is queued.
//! Submitting on top of a full queue cancels what is in the way: the queued
//! command is dropped outright, the active one is asked to wind down through
//! the protocol and keeps receiving lines until the engine acknowledges.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace};

use crate::analysis::Analysis;
use crate::board::Board;
use crate::engine::{AnalysisOptions, PlayOptions, PlayResult};
use crate::error::{EngineError, Result};
use crate::limit::Limit;
use crate::option::{EngineOption, OptionMap, Value};
use crate::transport::{Event, Transport};

/// Lifecycle of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandState {
    /// Queued, has not touched the wire
    New,
    /// Owns the engine; all output is routed to it
    Active,
    /// Asked to wind down, still consuming output until the protocol's
    /// end-of-search marker
    Cancelling,
    /// Out of the scheduler
    Done,
}

/// What the driver wants the scheduler to do after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Finished,
}

/// Caller-visible result slot of a command.
///
/// Distinct from the command being finished: pondering and streaming
/// analysis resolve the result early while the command keeps consuming
/// engine output.
pub(crate) struct Reply<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
    cancelled: bool,
}

impl<T> Reply<T> {
    pub(crate) fn new(tx: oneshot::Sender<Result<T>>) -> Self {
        Self {
            tx: Some(tx),
            cancelled: false,
        }
    }

    /// Whether the result is still owed to the caller
    pub(crate) fn pending(&self) -> bool {
        self.tx.is_some()
    }

    /// Whether the result was cancelled rather than delivered
    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn resolve(&mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(value));
        }
    }

    /// Routes an error to the caller. Errors arriving after the result was
    /// already delivered have no one waiting for them; those are reported
    /// out-of-band through the error log.
    pub(crate) fn fail(&mut self, err: EngineError) {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            None => error!(%err, "engine command failed after returning its result"),
        }
    }

    fn cancel(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(EngineError::Cancelled));
            self.cancelled = true;
        }
    }

    /// The caller dropped the receiving end; nothing to send anywhere
    fn mark_abandoned(&mut self) {
        if self.tx.take().is_some() {
            self.cancelled = true;
        }
    }

    fn abandoned(&self) -> bool {
        matches!(&self.tx, Some(tx) if tx.is_closed())
    }

    async fn closed(&mut self) {
        match &mut self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }
}

/// One unit of work for the driver
pub(crate) enum Job {
    Ping {
        reply: Reply<()>,
    },
    Configure {
        options: Vec<(String, Value)>,
        reply: Reply<()>,
    },
    Play {
        board: Board,
        limit: Limit,
        opts: PlayOptions,
        reply: Reply<PlayResult>,
    },
    Analysis {
        board: Board,
        limit: Option<Limit>,
        opts: AnalysisOptions,
        /// Used to build the stop hook of the analysis handle
        requests: mpsc::UnboundedSender<Request>,
        reply: Reply<Analysis>,
    },
}

pub(crate) struct Command {
    pub(crate) seq: u64,
    pub(crate) state: CommandState,
    pub(crate) job: Job,
}

impl Command {
    fn new(seq: u64, job: Job) -> Self {
        Self {
            seq,
            state: CommandState::New,
            job,
        }
    }

    pub(crate) fn fail(&mut self, err: EngineError) {
        match &mut self.job {
            Job::Ping { reply } => reply.fail(err),
            Job::Configure { reply, .. } => reply.fail(err),
            Job::Play { reply, .. } => reply.fail(err),
            Job::Analysis { reply, .. } => reply.fail(err),
        }
    }

    fn cancel_reply(&mut self) {
        match &mut self.job {
            Job::Ping { reply } => reply.cancel(),
            Job::Configure { reply, .. } => reply.cancel(),
            Job::Play { reply, .. } => reply.cancel(),
            Job::Analysis { reply, .. } => reply.cancel(),
        }
    }

    fn mark_abandoned(&mut self) {
        match &mut self.job {
            Job::Ping { reply } => reply.mark_abandoned(),
            Job::Configure { reply, .. } => reply.mark_abandoned(),
            Job::Play { reply, .. } => reply.mark_abandoned(),
            Job::Analysis { reply, .. } => reply.mark_abandoned(),
        }
    }

    fn reply_pending(&self) -> bool {
        match &self.job {
            Job::Ping { reply } => reply.pending(),
            Job::Configure { reply, .. } => reply.pending(),
            Job::Play { reply, .. } => reply.pending(),
            Job::Analysis { reply, .. } => reply.pending(),
        }
    }

    pub(crate) fn reply_cancelled(&self) -> bool {
        match &self.job {
            Job::Ping { reply } => reply.cancelled(),
            Job::Configure { reply, .. } => reply.cancelled(),
            Job::Play { reply, .. } => reply.cancelled(),
            Job::Analysis { reply, .. } => reply.cancelled(),
        }
    }

    fn reply_abandoned(&self) -> bool {
        match &self.job {
            Job::Ping { reply } => reply.abandoned(),
            Job::Configure { reply, .. } => reply.abandoned(),
            Job::Play { reply, .. } => reply.abandoned(),
            Job::Analysis { reply, .. } => reply.abandoned(),
        }
    }

    async fn reply_closed(&mut self) {
        match &mut self.job {
            Job::Ping { reply } => reply.closed().await,
            Job::Configure { reply, .. } => reply.closed().await,
            Job::Play { reply, .. } => reply.closed().await,
            Job::Analysis { reply, .. } => reply.closed().await,
        }
    }
}

/// Messages accepted by the session task
pub(crate) enum Request {
    Command(Job),
    /// Stop hook of an analysis handle; ignored unless the command with
    /// this sequence number is still running
    Stop { seq: u64 },
    /// Toggle the engine's debug mode; fire-and-forget, does not interrupt
    /// the running command
    Debug { on: bool },
    /// Send the protocol terminator and report the exit code
    Quit {
        reply: oneshot::Sender<Result<Option<i32>>>,
    },
}

/// Protocol-specific half of the driver: UCI and XBoard implement this
/// against the scheduler above.
#[async_trait]
pub(crate) trait Driver: Send + 'static {
    /// Runs the protocol handshake on a fresh transport, collecting
    /// engine-declared options and identification
    async fn initialize(&mut self, io: &mut Transport) -> Result<()>;

    /// Puts a command on the wire. `Finished` means the command needed no
    /// engine acknowledgement and resolved synchronously.
    async fn start(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<Flow>;

    /// Routes one engine line to the active command
    async fn line_received(&mut self, io: &mut Transport, cmd: &mut Command, line: &str)
        -> Result<Flow>;

    /// Asks the engine to wind the active command down; the command keeps
    /// receiving lines until it reports `Finished`
    async fn cancel(&mut self, io: &mut Transport, cmd: &mut Command) -> Result<()>;

    /// The process died while `cmd` was in flight
    fn engine_terminated(&mut self, cmd: &mut Command, err: &EngineError);

    fn options(&self) -> &OptionMap<EngineOption>;

    fn id(&self) -> &HashMap<String, String>;

    /// Wall-clock cutoff requested by the command that just started
    fn take_deadline(&mut self) -> Option<Instant> {
        None
    }

    /// The protocol's debug-mode toggle, if it has one
    fn debug_command(&self, _on: bool) -> Option<&'static str> {
        None
    }
}

/// The driver task: owns the transport and serializes commands against it
pub(crate) struct Session<D> {
    transport: Transport,
    driver: D,
    requests: mpsc::UnboundedReceiver<Request>,
    current: Option<Command>,
    next: Option<Command>,
    quit: Vec<oneshot::Sender<Result<Option<i32>>>>,
    deadline: Option<Instant>,
    seq: u64,
}

impl<D: Driver> Session<D> {
    pub(crate) fn new(
        transport: Transport,
        driver: D,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        Self {
            transport,
            driver,
            requests,
            current: None,
            next: None,
            quit: vec![],
            deadline: None,
            seq: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let code = loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.on_request(request).await,
                    None => {
                        trace!("all engine handles dropped, shutting down");
                        return;
                    }
                },
                event = self.transport.recv() => match event {
                    Ok(Event::Line(line)) => self.on_line(&line).await,
                    Ok(Event::Exited(code)) => break code,
                    Err(err) => {
                        error!(%err, "engine transport failed");
                        break None;
                    }
                },
                _ = Self::reply_closed(&mut self.current) => self.on_abandoned().await,
                _ = sleep_until(self.deadline.unwrap_or_else(Instant::now)), if self.deadline.is_some() => {
                    trace!("search deadline reached");
                    self.deadline = None;
                    self.cancel_active().await;
                }
            }
        };
        self.terminated(code).await;
    }

    async fn reply_closed(current: &mut Option<Command>) {
        match current {
            Some(cmd) => cmd.reply_closed().await,
            None => std::future::pending().await,
        }
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Command(job) => self.communicate(job).await,
            Request::Stop { seq } => {
                if matches!(&self.current, Some(cmd) if cmd.seq == seq) {
                    self.cancel_active().await;
                }
            }
            Request::Debug { on } => match self.driver.debug_command(on) {
                Some(line) => {
                    if let Err(err) = self.transport.write_line(line).await {
                        error!(%err, "switching engine debug mode failed");
                    }
                }
                None => debug!("protocol has no debug mode"),
            },
            Request::Quit { reply } => match self.transport.write_line("quit").await {
                Ok(()) => self.quit.push(reply),
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
        }
    }

    /// The dispatch primitive: queues the command, displacing a queued
    /// predecessor and pre-empting the active one
    async fn communicate(&mut self, job: Job) {
        self.seq += 1;
        let command = Command::new(self.seq, job);

        if let Some(mut superseded) = self.next.take() {
            trace!(seq = superseded.seq, "cancelling queued command");
            superseded.cancel_reply();
            superseded.state = CommandState::Done;
        }
        self.next = Some(command);

        match &mut self.current {
            None => self.promote().await,
            Some(current) => {
                if current.reply_pending() {
                    current.cancel_reply();
                    self.cancel_active().await;
                } else if !current.reply_cancelled() {
                    self.cancel_active().await;
                }
            }
        }
    }

    /// Moves the queued command into the active slot and starts it
    async fn promote(&mut self) {
        while self.current.is_none() {
            let Some(mut cmd) = self.next.take() else {
                return;
            };
            if cmd.reply_abandoned() {
                trace!(seq = cmd.seq, "queued command abandoned by caller");
                cmd.mark_abandoned();
                cmd.state = CommandState::Done;
                continue;
            }
            cmd.state = CommandState::Active;
            trace!(seq = cmd.seq, "command started");
            match self.driver.start(&mut self.transport, &mut cmd).await {
                Ok(Flow::Continue) => {
                    self.deadline = self.driver.take_deadline();
                    self.current = Some(cmd);
                }
                Ok(Flow::Finished) => cmd.state = CommandState::Done,
                Err(err) => {
                    cmd.fail(err);
                    cmd.state = CommandState::Done;
                }
            }
        }
    }

    async fn on_line(&mut self, line: &str) {
        let Some(mut cmd) = self.current.take() else {
            debug!("engine output with no active command: {line}");
            return;
        };
        match self.driver.line_received(&mut self.transport, &mut cmd, line).await {
            Ok(Flow::Continue) => self.current = Some(cmd),
            Ok(Flow::Finished) => self.finish(cmd, None).await,
            Err(err) => self.finish(cmd, Some(err)).await,
        }
    }

    async fn finish(&mut self, mut cmd: Command, err: Option<EngineError>) {
        if let Some(err) = err {
            cmd.fail(err);
        }
        cmd.state = CommandState::Done;
        self.deadline = None;
        self.promote().await;
    }

    /// Transitions the active command to `Cancelling` and fires the
    /// protocol's wind-down; no-op if it is already on its way out
    async fn cancel_active(&mut self) {
        let Some(mut cmd) = self.current.take() else {
            return;
        };
        if cmd.state == CommandState::Active {
            cmd.state = CommandState::Cancelling;
            if let Err(err) = self.driver.cancel(&mut self.transport, &mut cmd).await {
                self.finish(cmd, Some(err)).await;
                return;
            }
        }
        self.current = Some(cmd);
    }

    async fn on_abandoned(&mut self) {
        if let Some(cmd) = &mut self.current {
            trace!(seq = cmd.seq, "caller abandoned active command");
            cmd.mark_abandoned();
        }
        self.cancel_active().await;
    }

    /// The process is gone: fail everything in flight, then keep answering
    /// stragglers until every handle is dropped
    async fn terminated(mut self, code: Option<i32>) {
        let err = EngineError::Terminated { code };

        if let Some(mut cmd) = self.current.take() {
            self.driver.engine_terminated(&mut cmd, &err);
            cmd.fail(err.clone());
        }
        if let Some(mut cmd) = self.next.take() {
            cmd.fail(err.clone());
        }
        for quit in self.quit.drain(..) {
            let _ = quit.send(Ok(code));
        }
        debug!(?code, "engine terminated");

        while let Some(request) = self.requests.recv().await {
            match request {
                Request::Command(job) => {
                    let mut cmd = Command::new(0, job);
                    cmd.fail(err.clone());
                }
                Request::Quit { reply } => {
                    let _ = reply.send(Ok(code));
                }
                Request::Stop { .. } | Request::Debug { .. } => {}
            }
        }
    }
}
