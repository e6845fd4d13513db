use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// The message of a query that was cancelled.
pub const ABORTED_MESSAGE: &str = "query aborted";

/// A cancellation token shared by a query, its block queries and the loops working on their buffers.
///
/// Cancellation is cooperative: setting the token never interrupts anything, it is polled between units of work.
#[derive(Clone, Debug, Default)]
pub struct Aborted(Arc<AtomicBool>);

impl Aborted {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a query or block query.
///
/// ```text
/// Created --> Running --> Ok
///                    \--> Failed
/// ```
///
/// `Created` may also go straight to a terminal state.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueryStatus {
    Created,
    Running,
    Failed,
    Ok,
}

impl QueryStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Ok)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Failed | Self::Ok => 2,
        }
    }
}

/// Status, error message and one-shot completion signal, shared between the thread that owns a query and the threads that
/// complete it.
///
/// Transitions only move forward. The first write of a terminal status wins and fires the completion signal; every later write
/// is rejected.
pub struct StatusCell {
    inner: Mutex<StatusInner>,
    fired: Arc<AtomicBool>,
    done: Shared<oneshot::Receiver<()>>,
}

struct StatusInner {
    status: QueryStatus,
    message: String,
    sender: Option<oneshot::Sender<()>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();

        Self {
            inner: Mutex::new(StatusInner {
                status: QueryStatus::Created,
                message: String::new(),
                sender: Some(sender),
            }),
            fired: Arc::new(AtomicBool::new(false)),
            done: receiver.shared(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        // A panic while holding the lock cannot leave the status half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> QueryStatus {
        self.lock().status
    }

    pub fn error_message(&self) -> String {
        self.lock().message.clone()
    }

    /// Returns `false` iff the write was rejected: the cell is already terminal with another status, or `status` would move
    /// backwards. Writing the current status again is accepted and changes nothing.
    pub fn set_status(&self, status: QueryStatus) -> bool {
        let mut inner = self.lock();

        self.transition(&mut inner, status)
    }

    /// Records `message` and moves to `Failed`, unless the cell is already terminal.
    pub fn set_failed(&self, message: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return false;
        }
        inner.message = message.into();

        self.transition(&mut inner, QueryStatus::Failed)
    }

    pub fn set_ok(&self) -> bool {
        self.set_status(QueryStatus::Ok)
    }

    fn transition(&self, inner: &mut StatusInner, status: QueryStatus) -> bool {
        if inner.status == status {
            return true;
        }
        if inner.status.is_terminal() || status.rank() < inner.status.rank() {
            return false;
        }

        inner.status = status;
        if status.is_terminal() {
            self.fired.store(true, Ordering::SeqCst);
            if let Some(sender) = inner.sender.take() {
                // Nobody waiting is fine.
                let _ = sender.send(());
            }
        }

        true
    }

    /// A handle that resolves once the cell reaches a terminal status.
    pub fn completion(&self) -> Completion {
        Completion {
            fired: self.fired.clone(),
            done: self.done.clone(),
        }
    }
}

impl core::fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StatusCell")
            .field("status", &inner.status)
            .field("message", &inner.message)
            .finish()
    }
}

/// Resolves when the associated status becomes terminal. Cloning is cheap and every clone observes the same single event.
#[derive(Clone)]
pub struct Completion {
    fired: Arc<AtomicBool>,
    done: Shared<oneshot::Receiver<()>>,
}

impl Completion {
    /// Blocks the current thread until completion.
    pub fn wait(&self) {
        futures::executor::block_on(self.clone());
    }

    pub fn is_done(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender also ends the wait; the status then says what happened.
        Pin::new(&mut self.done).poll(cx).map(|_| ())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    #[test]
    fn transitions_are_monotonic() {
        let cell = StatusCell::new();
        assert_eq!(cell.status(), QueryStatus::Created);

        assert!(cell.set_status(QueryStatus::Running));
        assert!(cell.set_status(QueryStatus::Running));
        assert!(!cell.set_status(QueryStatus::Created));
        assert_eq!(cell.status(), QueryStatus::Running);

        assert!(cell.set_failed("backend exploded"));
        assert!(!cell.set_ok());
        assert!(!cell.set_failed("second failure"));
        assert!(!cell.set_status(QueryStatus::Running));
        assert_eq!(cell.status(), QueryStatus::Failed);
        assert_eq!(cell.error_message(), "backend exploded");
    }

    #[test]
    fn completion_fires_exactly_once() {
        let cell = Arc::new(StatusCell::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let completion = cell.completion();
                let fired = fired.clone();
                std::thread::spawn(move || {
                    completion.wait();
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let completion = cell.completion();
        assert!(!completion.is_done());

        cell.set_status(QueryStatus::Running);
        assert!(!completion.is_done());
        assert!(cell.set_ok());
        assert!(!cell.set_failed("too late"));
        for waiter in waiters {
            waiter.join().unwrap();
        }

        assert!(completion.is_done());
        assert_eq!(fired.load(Ordering::SeqCst), 4);
        completion.wait();
        assert_eq!(cell.status(), QueryStatus::Ok);
    }

    #[test]
    fn created_can_fail_directly() {
        let cell = StatusCell::new();
        let completion = cell.completion();

        assert!(cell.set_failed(ABORTED_MESSAGE));
        assert!(completion.is_done());
        assert_eq!(cell.error_message(), "query aborted");
    }

    #[test]
    fn aborted_token_is_shared_by_clones() {
        let token = Aborted::new();
        let clone = token.clone();
        assert!(!clone.is_aborted());

        token.abort();
        assert!(clone.is_aborted());
    }
}
