//! Execution queue: the one place on the host where commands actually run.
//!
//! Commands arriving over the socket are appended to a FIFO.  A single
//! driver task wakes once per scheduler tick, takes every waiting entry and
//! runs them one after another in arrival order, so two commands never
//! overlap against host state.  The driver unhooks itself when the queue
//! drains and is re-hooked lazily by the next [`ExecutionQueue::enqueue`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::registry::CommandRegistry;
use crate::types::{CommandContext, CommandError, CommandResult};

/// Default scheduler tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

struct Entry {
    seq: u64,
    ctx: CommandContext,
    params: Value,
    reply: oneshot::Sender<CommandResult>,
}

struct InFlight {
    reply: oneshot::Sender<CommandResult>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    in_progress: HashMap<u64, InFlight>,
    next_seq: u64,
    /// Bumped by `cancel_all`; a driver from an older generation stops.
    generation: u64,
    hook: Option<JoinHandle<()>>,
}

struct QueueInner {
    handlers: Arc<CommandRegistry>,
    tick: Duration,
    state: Mutex<QueueState>,
}

/// Single-consumer FIFO of commands bound to one handler registry.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

/// Completion of an enqueued command.
pub struct Execution {
    rx: oneshot::Receiver<CommandResult>,
}

impl Future for Execution {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommandError::Cancelled(
                "execution queue dropped the command".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl ExecutionQueue {
    pub fn new(handlers: Arc<CommandRegistry>, tick: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                handlers,
                tick,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Append a command to the tail.  Returns immediately; the returned
    /// future resolves once the command has run (or was cancelled).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, ctx: CommandContext, params: Value) -> Execution {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push_back(Entry {
            seq,
            ctx,
            params,
            reply: tx,
        });
        if state.hook.is_none() {
            let generation = state.generation;
            let inner = self.inner.clone();
            state.hook = Some(tokio::spawn(drive(inner, generation)));
            tracing::trace!("execution queue hooked");
        }
        Execution { rx }
    }

    /// Reject every waiting and running command as cancelled, clear the
    /// queue and unhook the driver.  Returns how many were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let (pending, in_flight, hook) = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            let pending: Vec<Entry> = state.pending.drain(..).collect();
            let in_flight: Vec<InFlight> = state.in_progress.drain().map(|(_, f)| f).collect();
            (pending, in_flight, state.hook.take())
        };

        if let Some(hook) = hook {
            hook.abort();
        }

        let count = pending.len() + in_flight.len();
        for entry in pending {
            entry.ctx.cancel.cancel();
            let _ = entry.reply.send(Err(CommandError::Cancelled(reason.to_string())));
        }
        for flight in in_flight {
            flight.cancel.cancel();
            let _ = flight.reply.send(Err(CommandError::Cancelled(reason.to_string())));
        }
        if count > 0 {
            tracing::info!(cancelled = count, reason, "execution queue cancelled");
        }
        count
    }

    /// Entries waiting for the next tick.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether a driver is currently hooked onto the scheduler tick.
    pub fn is_hooked(&self) -> bool {
        self.inner.state.lock().hook.is_some()
    }
}

async fn drive(inner: Arc<QueueInner>, generation: u64) {
    let mut ticker = tokio::time::interval(inner.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(batch) = inner.take_batch(generation) else {
            return;
        };
        for (seq, ctx, params) in batch {
            inner.run(seq, ctx, params).await;
        }
        if inner.unhook_if_idle(generation) {
            tracing::trace!("execution queue idle, unhooked");
            return;
        }
    }
}

impl QueueInner {
    /// Pop every waiting entry and mark it in-progress.  `None` when this
    /// driver belongs to a cancelled generation.
    fn take_batch(&self, generation: u64) -> Option<Vec<(u64, CommandContext, Value)>> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        let entries: Vec<Entry> = state.pending.drain(..).collect();
        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            state.in_progress.insert(
                entry.seq,
                InFlight {
                    reply: entry.reply,
                    cancel: entry.ctx.cancel.clone(),
                },
            );
            batch.push((entry.seq, entry.ctx, entry.params));
        }
        Some(batch)
    }

    async fn run(&self, seq: u64, ctx: CommandContext, params: Value) {
        // Checked right before execution, not only at enqueue time.
        if ctx.cancel.is_cancelled() {
            tracing::debug!(command_id = %ctx.command_id, name = %ctx.name, "skipping cancelled command");
            self.finish(seq, Err(CommandError::Cancelled("cancelled before start".into())));
            return;
        }

        let result = match self.handlers.get(&ctx.name) {
            Some(handler) => {
                let name = ctx.name.clone();
                let command_id = ctx.command_id.clone();
                match AssertUnwindSafe(handler.call(ctx, params)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_panic) => {
                        tracing::error!(name = %name, command_id = %command_id, "command handler panicked");
                        Err(CommandError::Failed("command handler panicked".into()))
                    }
                }
            }
            None => {
                tracing::warn!(name = %ctx.name, "no handler registered for command");
                Err(CommandError::NotFound(format!("unknown command: {}", ctx.name)))
            }
        };
        self.finish(seq, result);
    }

    fn finish(&self, seq: u64, result: CommandResult) {
        let flight = self.state.lock().in_progress.remove(&seq);
        if let Some(flight) = flight {
            let _ = flight.reply.send(result);
        }
    }

    fn unhook_if_idle(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return true;
        }
        if state.pending.is_empty() {
            state.hook = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CommandHandler;

    /// Records start/end markers so tests can check ordering and overlap.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        work: Duration,
    }

    #[async_trait::async_trait]
    impl CommandHandler for Recorder {
        async fn call(&self, ctx: CommandContext, _params: Value) -> CommandResult {
            self.log.lock().push(format!("start:{}", ctx.command_id));
            tokio::time::sleep(self.work).await;
            self.log.lock().push(format!("end:{}", ctx.command_id));
            Ok(serde_json::json!({ "id": ctx.command_id }))
        }
    }

    struct Boom;

    #[async_trait::async_trait]
    impl CommandHandler for Boom {
        async fn call(&self, _ctx: CommandContext, _params: Value) -> CommandResult {
            panic!("handler blew up");
        }
    }

    fn queue_with(log: Arc<Mutex<Vec<String>>>) -> ExecutionQueue {
        let mut reg = CommandRegistry::new();
        reg.register(
            "work",
            Recorder {
                log,
                work: Duration::from_millis(20),
            },
        );
        reg.register("boom", Boom);
        ExecutionQueue::new(Arc::new(reg), DEFAULT_TICK)
    }

    fn ctx(id: &str, name: &str) -> CommandContext {
        CommandContext::local(id, name)
    }

    #[tokio::test(start_paused = true)]
    async fn commands_start_in_order_and_never_overlap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = queue_with(log.clone());

        let a = queue.enqueue(ctx("A", "work"), Value::Null);
        let b = queue.enqueue(ctx("B", "work"), Value::Null);
        let c = queue.enqueue(ctx("C", "work"), Value::Null);

        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert_eq!(ra.unwrap()["id"], "A");
        assert_eq!(rb.unwrap()["id"], "B");
        assert_eq!(rc.unwrap()["id"], "C");

        assert_eq!(
            *log.lock(),
            vec!["start:A", "end:A", "start:B", "end:B", "start:C", "end:C"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_entry_is_skipped_without_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = queue_with(log.clone());

        let skipped = ctx("S", "work");
        skipped.cancel.cancel();
        let s = queue.enqueue(skipped, Value::Null);
        let t = queue.enqueue(ctx("T", "work"), Value::Null);

        assert!(s.await.unwrap_err().is_cancelled());
        assert!(t.await.is_ok());
        assert_eq!(*log.lock(), vec!["start:T", "end:T"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_after_enqueue_is_seen_at_drain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = queue_with(log.clone());

        let late = ctx("L", "work");
        let token = late.cancel.clone();
        let exec = queue.enqueue(late, Value::Null);
        token.cancel();

        assert!(exec.await.unwrap_err().is_cancelled());
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_abort_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = queue_with(log.clone());

        let bad = queue.enqueue(ctx("X", "boom"), Value::Null);
        let good = queue.enqueue(ctx("Y", "work"), Value::Null);

        let err = bad.await.unwrap_err();
        assert_eq!(err, CommandError::Failed("command handler panicked".into()));
        assert_eq!(good.await.unwrap()["id"], "Y");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_command_is_not_found() {
        let queue = queue_with(Arc::new(Mutex::new(Vec::new())));
        let err = queue
            .enqueue(ctx("U", "missing"), Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_command");
    }

    #[tokio::test(start_paused = true)]
    async fn queue_unhooks_when_idle_and_rehooks_lazily() {
        let queue = queue_with(Arc::new(Mutex::new(Vec::new())));
        assert!(!queue.is_hooked());

        queue.enqueue(ctx("1", "work"), Value::Null).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!queue.is_hooked());

        let exec = queue.enqueue(ctx("2", "work"), Value::Null);
        assert!(queue.is_hooked());
        exec.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_rejects_pending_and_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = queue_with(log.clone());

        let first = queue.enqueue(ctx("R", "work"), Value::Null);
        let second = queue.enqueue(ctx("W", "work"), Value::Null);

        // Let the driver pick up the batch and start the first handler.
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(*log.lock(), vec!["start:R"]);

        assert_eq!(queue.cancel_all("teardown"), 2);
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(second.await.unwrap_err().is_cancelled());
        assert!(!queue.is_hooked());
        assert_eq!(queue.pending_len(), 0);

        // The queue is usable again afterwards.
        let again = queue.enqueue(ctx("N", "work"), Value::Null);
        assert_eq!(again.await.unwrap()["id"], "N");
    }
}
