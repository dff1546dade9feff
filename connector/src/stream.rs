//! Registry of background tick loops owned by a connector.
//!
//! Each loop runs on its own thread and stops cooperatively: a per-stream
//! flag plus a session flag shared by all streams of one connection are
//! checked once per iteration. Joining is bounded, so a loop stuck in a
//! slow callback cannot hang `cancel` or `disconnect`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::ConnectorError;

/// Stop conditions seen from inside a stream loop.
pub(crate) struct StopSignal {
    local: Arc<AtomicBool>,
    session: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        self.local.load(Ordering::Acquire) || self.session.load(Ordering::Acquire)
    }

    /// Sleeps for `interval` unless woken by a stop request. Returns `true`
    /// when the loop must exit.
    pub(crate) fn wait(&self, interval: Duration) -> bool {
        match self.wake.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => self.is_stopped(),
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

pub(crate) struct StreamWorker {
    id: u64,
    instrument: String,
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Signals the loop and waits up to `wait` for it to exit.
    pub(crate) fn stop(self, wait: Duration) -> Result<(), ConnectorError> {
        self.stop.store(true, Ordering::Release);
        let _ = self.wake.try_send(());

        // cancelled from its own callback: the loop exits once the callback returns
        if self.handle.thread().id() == thread::current().id() {
            return Ok(());
        }

        match self.done.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => Err(ConnectorError::StopTimeout {
                id: self.id,
                waited: wait,
            }),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct RegistryState {
    /// Present while connected; set to `true` to halt every stream of the session.
    session: Option<Arc<AtomicBool>>,
    workers: Vec<StreamWorker>,
}

#[derive(Default)]
pub(crate) struct StreamRegistry {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl StreamRegistry {
    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().session.is_some()
    }

    pub(crate) fn open_session(&self) {
        let mut state = self.state.lock();
        if state.session.is_none() {
            state.session = Some(Arc::new(AtomicBool::new(false)));
        }
    }

    /// Halts the session and hands back every worker for joining. New
    /// spawns fail from this point on.
    pub(crate) fn close_session(&self) -> Vec<StreamWorker> {
        let mut state = self.state.lock();
        if let Some(session) = state.session.take() {
            session.store(true, Ordering::Release);
        }
        state.workers.drain(..).collect()
    }

    pub(crate) fn spawn<F>(&self, instrument: &str, body: F) -> Result<u64, ConnectorError>
    where
        F: FnOnce(u64, StopSignal) + Send + 'static,
    {
        let mut state = self.state.lock();
        let session = state
            .session
            .clone()
            .ok_or_else(ConnectorError::not_connected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stop = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let signal = StopSignal {
            local: Arc::clone(&stop),
            session,
            wake: wake_rx,
        };

        let handle = thread::Builder::new()
            .name(format!("tick-stream-{id}"))
            .spawn(move || {
                let _done = done_tx;
                body(id, signal);
            })?;

        state.workers.push(StreamWorker {
            id,
            instrument: instrument.to_string(),
            stop,
            wake: wake_tx,
            done: done_rx,
            handle,
        });
        Ok(id)
    }

    /// Stops and removes one worker. Unknown ids are already gone.
    pub(crate) fn cancel(&self, id: u64, wait: Duration) -> Result<(), ConnectorError> {
        let worker = {
            let mut state = self.state.lock();
            let position = state.workers.iter().position(|worker| worker.id == id);
            position.map(|index| state.workers.swap_remove(index))
        };
        match worker {
            Some(worker) => worker.stop(wait),
            None => Ok(()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().workers.len()
    }
}
