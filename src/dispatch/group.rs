//! Fixed-size rank groups with scatter / broadcast / gather collectives.
//!
//! Every collective is matched by sequence number: all ranks must issue the
//! same collectives in the same order, and each call waits until its
//! counterpart arrives. Payloads are encoded with bincode on the way across,
//! so a rank never shares memory with another rank and every `f64` arrives
//! with the exact bit pattern it was sent with, NaN and infinities included.
//!
//! There is no timeout. A rank that fails must call [`Communicator::abort`];
//! every pending and future collective on every rank then returns
//! [`Error::GroupAborted`] instead of waiting forever.

use crate::error::{Error, Result};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// Collective operations over a fixed group of ranks.
pub trait Communicator: Send + Sync {
    /// This rank's position in the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// `root` supplies exactly `size` items; rank `i` receives item `i`.
    fn scatter<T>(&self, root: usize, items: Option<Vec<T>>) -> impl Future<Output = Result<T>> + Send
    where
        T: Serialize + DeserializeOwned + Send;

    /// `root` supplies a value; every rank receives its own copy.
    fn broadcast<T>(&self, root: usize, value: Option<T>) -> impl Future<Output = Result<T>> + Send
    where
        T: Serialize + DeserializeOwned + Send;

    /// Every rank contributes a value; `root` receives all of them in rank
    /// order, other ranks receive `None`.
    fn gather<T>(&self, root: usize, value: T) -> impl Future<Output = Result<Option<Vec<T>>>> + Send
    where
        T: Serialize + DeserializeOwned + Send;

    /// Fail the whole group. The first reason wins.
    fn abort(&self, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Scatter,
    Broadcast,
    Gather,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Scatter => "scatter",
            Op::Broadcast => "broadcast",
            Op::Gather => "gather",
        }
    }
}

struct Envelope {
    seq: u64,
    op: Op,
    source: usize,
    payload: Vec<u8>,
}

struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    /// Messages that arrived ahead of the collective they belong to
    pending: Vec<Envelope>,
}

enum Event {
    Message(Option<Envelope>),
    Aborted(String),
}

/// Handle that fails a group from outside any rank.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl AbortHandle {
    pub fn abort(&self, reason: &str) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.to_string());
                true
            } else {
                false
            }
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// One rank's endpoint in a [`LocalGroup`].
pub struct LocalComm {
    rank: usize,
    size: usize,
    seq: AtomicU64,
    peers: Arc<Vec<mpsc::UnboundedSender<Envelope>>>,
    inbox: Mutex<Inbox>,
    abort: AbortHandle,
    abort_rx: watch::Receiver<Option<String>>,
}

impl LocalComm {
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.size {
            return Err(Error::Config(format!(
                "root rank {} out of range for group of size {}",
                root, self.size
            )));
        }
        Ok(())
    }

    fn aborted_error(&self) -> Option<Error> {
        let reason = self.abort_rx.borrow().clone();
        reason.map(|reason| Error::GroupAborted {
            rank: self.rank,
            reason,
        })
    }

    fn send(&self, dest: usize, seq: u64, op: Op, payload: Vec<u8>) -> Result<()> {
        let envelope = Envelope {
            seq,
            op,
            source: self.rank,
            payload,
        };
        self.peers[dest].send(envelope).map_err(|_| Error::GroupAborted {
            rank: self.rank,
            reason: format!("rank {} is gone", dest),
        })
    }

    async fn recv(&self, seq: u64, op: Op, source: usize) -> Result<Vec<u8>> {
        if let Some(err) = self.aborted_error() {
            return Err(err);
        }

        let mut inbox = self.inbox.lock().await;

        if let Some(pos) = inbox
            .pending
            .iter()
            .position(|e| e.seq == seq && e.source == source)
        {
            let envelope = inbox.pending.remove(pos);
            return Self::open(envelope, op);
        }

        loop {
            let event = tokio::select! {
                msg = inbox.rx.recv() => Event::Message(msg),
                reason = wait_for_abort(self.abort_rx.clone()) => Event::Aborted(reason),
            };

            match event {
                Event::Message(Some(envelope)) if envelope.seq == seq && envelope.source == source => {
                    return Self::open(envelope, op);
                }
                Event::Message(Some(envelope)) => inbox.pending.push(envelope),
                Event::Message(None) => {
                    return Err(Error::GroupAborted {
                        rank: self.rank,
                        reason: "all peers disconnected".to_string(),
                    });
                }
                Event::Aborted(reason) => {
                    return Err(Error::GroupAborted {
                        rank: self.rank,
                        reason,
                    });
                }
            }
        }
    }

    fn open(envelope: Envelope, expected: Op) -> Result<Vec<u8>> {
        if envelope.op != expected {
            return Err(Error::CollectiveMismatch {
                expected: expected.name(),
                found: envelope.op.name(),
            });
        }
        Ok(envelope.payload)
    }
}

/// Wire encoding for every payload that crosses a rank boundary.
fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    bincode::deserialize(payload).map_err(|e| Error::Serialization(e.to_string()))
}

async fn wait_for_abort(mut rx: watch::Receiver<Option<String>>) -> String {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(reason) = current {
            return reason;
        }
        if rx.changed().await.is_err() {
            return "group torn down".to_string();
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn scatter<T>(&self, root: usize, items: Option<Vec<T>>) -> impl Future<Output = Result<T>> + Send
    where
        T: Serialize + DeserializeOwned + Send,
    {
        async move {
            let seq = self.next_seq();
            self.check_root(root)?;

            if self.rank != root {
                let payload = self.recv(seq, Op::Scatter, root).await?;
                return decode(&payload);
            }

            let items = items.ok_or(Error::MissingInput("scatter items on root"))?;
            if items.len() != self.size {
                return Err(Error::Config(format!(
                    "scatter needs {} items, got {}",
                    self.size,
                    items.len()
                )));
            }

            let mut own = None;
            for (dest, item) in items.into_iter().enumerate() {
                if dest == root {
                    own = Some(item);
                } else {
                    self.send(dest, seq, Op::Scatter, encode(&item)?)?;
                }
            }
            own.ok_or(Error::MissingInput("scatter item for root"))
        }
    }

    fn broadcast<T>(&self, root: usize, value: Option<T>) -> impl Future<Output = Result<T>> + Send
    where
        T: Serialize + DeserializeOwned + Send,
    {
        async move {
            let seq = self.next_seq();
            self.check_root(root)?;

            if self.rank != root {
                let payload = self.recv(seq, Op::Broadcast, root).await?;
                return decode(&payload);
            }

            let value = value.ok_or(Error::MissingInput("broadcast value on root"))?;
            let payload = encode(&value)?;
            for dest in (0..self.size).filter(|&r| r != root) {
                self.send(dest, seq, Op::Broadcast, payload.clone())?;
            }
            Ok(value)
        }
    }

    fn gather<T>(&self, root: usize, value: T) -> impl Future<Output = Result<Option<Vec<T>>>> + Send
    where
        T: Serialize + DeserializeOwned + Send,
    {
        async move {
            let seq = self.next_seq();
            self.check_root(root)?;

            if self.rank != root {
                self.send(root, seq, Op::Gather, encode(&value)?)?;
                return Ok(None);
            }

            let mut own = Some(value);
            let mut gathered = Vec::with_capacity(self.size);
            for source in 0..self.size {
                if source == root {
                    if let Some(v) = own.take() {
                        gathered.push(v);
                    }
                } else {
                    let payload = self.recv(seq, Op::Gather, source).await?;
                    gathered.push(decode(&payload)?);
                }
            }
            Ok(Some(gathered))
        }
    }

    fn abort(&self, reason: &str) {
        self.abort.abort(reason);
    }
}

/// A group of `size` ranks running as tasks on the current Tokio runtime.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    size: usize,
}

/// Check that a collective group of `size` ranks can be formed here.
///
/// Fails with [`Error::RuntimeUnavailable`] when `size` is zero or no Tokio
/// runtime is running on this thread. Callers decide whether to fall back
/// to the worker pool.
pub fn probe_collective(size: usize) -> Result<LocalGroup> {
    if size == 0 {
        return Err(Error::RuntimeUnavailable(
            "group size must be at least 1".to_string(),
        ));
    }
    tokio::runtime::Handle::try_current()
        .map_err(|e| Error::RuntimeUnavailable(format!("no async runtime: {}", e)))?;
    Ok(LocalGroup { size })
}

impl LocalGroup {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Wire up one endpoint per rank, in rank order.
    pub fn communicators(&self) -> Vec<LocalComm> {
        let (abort_tx, abort_rx) = watch::channel(None);
        let abort = AbortHandle {
            tx: Arc::new(abort_tx),
        };

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| mpsc::unbounded_channel()).unzip();
        let peers = Arc::new(senders);

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| LocalComm {
                rank,
                size: self.size,
                seq: AtomicU64::new(0),
                peers: peers.clone(),
                inbox: Mutex::new(Inbox {
                    rx,
                    pending: Vec::new(),
                }),
                abort: abort.clone(),
                abort_rx: abort_rx.clone(),
            })
            .collect()
    }

    /// Run `rank_main` on every rank and wait for all of them.
    ///
    /// A rank that errors or panics aborts the group. The returned error is
    /// the root cause, not the follow-on [`Error::GroupAborted`] seen by the
    /// other ranks.
    pub async fn run<F, Fut, R>(&self, mut rank_main: F) -> Result<Vec<R>>
    where
        F: FnMut(LocalComm) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let mut handles = Vec::with_capacity(self.size);

        for comm in self.communicators() {
            let rank = comm.rank();
            let abort = comm.abort_handle();
            let fut = rank_main(comm);

            handles.push(tokio::spawn(async move {
                let result = match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(Error::RankPanicked {
                        rank,
                        message: panic_message(payload.as_ref()),
                    }),
                };
                if let Err(e) = &result {
                    abort.abort(&format!("rank {} failed: {}", rank, e));
                }
                result
            }));
        }

        let mut outputs = Vec::with_capacity(self.size);
        let mut errors = Vec::new();

        for (rank, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(e)) => errors.push((rank, e)),
                Err(e) => errors.push((
                    rank,
                    Error::GroupAborted {
                        rank,
                        reason: format!("rank task failed: {}", e),
                    },
                )),
            }
        }

        if errors.is_empty() {
            return Ok(outputs);
        }

        for (rank, e) in &errors {
            tracing::debug!("Rank {} error: {}", rank, e);
        }

        let root_cause = errors
            .iter()
            .position(|(_, e)| !is_follow_on(e))
            .unwrap_or(0);
        Err(errors.swap_remove(root_cause).1)
    }
}

fn is_follow_on(error: &Error) -> bool {
    matches!(error, Error::GroupAborted { .. })
}

pub(super) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
