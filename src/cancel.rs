use crate::error::PipelineError;
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// A one-shot cancellation flag shared by every participant in a run.
///
/// The token fires at most once. Firing records a reason and disconnects
/// the channel behind [`done`](CancelToken::done), which makes any
/// `select!` arm waiting on it ready immediately. Clones observe the same
/// underlying flag.
pub struct CancelToken {
    shared: Arc<Shared>,
}

struct Shared {
    fired: AtomicBool,
    reason: Mutex<Option<PipelineError>>,
    /// Dropping this sender disconnects `done`; taking it is the fire.
    guard: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl CancelToken {
    /// Create a fresh, unfired token
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            shared: Arc::new(Shared {
                fired: AtomicBool::new(false),
                reason: Mutex::new(None),
                guard: Mutex::new(Some(tx)),
                done: rx,
            }),
        }
    }

    /// Fire the token with a generic cancellation reason
    pub fn cancel(&self) {
        self.cancel_with(PipelineError::Cancelled("cancellation requested".into()));
    }

    /// Fire the token with an explicit reason. Only the first fire, via
    /// either method, takes effect.
    pub fn cancel_with(&self, reason: PipelineError) {
        if self.shared.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.shared.reason.lock() = Some(reason);
        // Dropping the sender disconnects every clone of `done`.
        self.shared.guard.lock().take();
    }

    /// Whether the token has fired
    pub fn is_cancelled(&self) -> bool {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Channel endpoint that disconnects once the token fires.
    ///
    /// Use as a `recv` arm in `select!`; the arm becomes ready (with a
    /// disconnect error) as soon as the token is cancelled.
    pub fn done(&self) -> &Receiver<()> {
        &self.shared.done
    }

    /// The reason the token fired, or a generic reason if it has not
    /// fired or none was recorded.
    pub fn reason(&self) -> PipelineError {
        self.shared
            .reason
            .lock()
            .clone()
            .unwrap_or_else(|| PipelineError::Cancelled("cancellation requested".into()))
    }

    /// Derive a token that fires when either it or `self` fires.
    ///
    /// Parent cancellation propagates to the child along with the
    /// parent's reason; cancelling the child leaves the parent untouched.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() {
            child.cancel_with(self.reason());
            return child;
        }
        let parent = self.clone();
        let downstream = child.clone();
        thread::spawn(move || {
            select! {
                recv(parent.done()) -> _ => downstream.cancel_with(parent.reason()),
                recv(downstream.done()) -> _ => {}
            }
        });
        child
    }
}

impl Clone for CancelToken {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
