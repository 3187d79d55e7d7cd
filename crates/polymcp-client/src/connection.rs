//! Generic connection lifecycle management.
//!
//! [`ConnectionManager`] wraps a connect/close pair (a [`ConnectionHandler`])
//! in a state machine with cooperative single-flight deduplication: at most
//! one connect attempt and one close attempt are ever in flight, and late
//! callers await the stored attempt instead of starting a redundant one.
//! Every caller that joins an attempt observes the identical outcome.
//!
//! A `stop()` issued while a connect is pending first awaits that attempt's
//! settlement; only a successful connect is followed by a close - a failed
//! connect makes the stop a safe no-op. Close errors are logged and
//! broadcast but never propagated: teardown always converges to `Closed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// The transport-specific connect/close pair a manager drives.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// The live connection type produced by `establish`.
    type Connection: Send + Sync + 'static;

    /// Establish a new connection. Called at most once per attempt.
    async fn establish(&self) -> ClientResult<Self::Connection>;

    /// Close an established connection.
    async fn close(&self, connection: &Self::Connection) -> ClientResult<()>;
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never started
    Idle,
    /// A connect attempt is pending
    Connecting,
    /// Connected and usable
    Ready,
    /// A close attempt is pending
    Closing,
    /// Closed by `stop()`
    Closed,
    /// The last connect attempt failed; `start()` may retry
    Failed,
}

/// Lifecycle events broadcast to observers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connect attempt succeeded
    Ready,
    /// The connection was closed
    Closed,
    /// A connect attempt or a close failed
    Failed {
        /// What went wrong
        reason: String,
    },
}

type SharedAttempt<C> = Shared<BoxFuture<'static, Result<Arc<C>, ClientError>>>;
type SharedClose = Shared<BoxFuture<'static, ()>>;

enum Lifecycle<C> {
    Idle,
    Connecting {
        attempt: SharedAttempt<C>,
        generation: u64,
    },
    Ready(Arc<C>),
    Closing(SharedClose),
    Closed,
    Failed,
}

/// Single-flight lifecycle state machine around a [`ConnectionHandler`].
pub struct ConnectionManager<H: ConnectionHandler> {
    handler: Arc<H>,
    lifecycle: Arc<StdMutex<Lifecycle<H::Connection>>>,
    // Distinguishes attempts so a stale settlement never overwrites the
    // state a newer attempt has already written.
    generation: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

impl<H: ConnectionHandler> ConnectionManager<H> {
    /// Create a manager over the given handler. Nothing connects until
    /// `start()`.
    pub fn new(handler: H) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            handler: Arc::new(handler),
            lifecycle: Arc::new(StdMutex::new(Lifecycle::Idle)),
            generation: AtomicU64::new(0),
            events,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match &*self.lifecycle.lock().expect("lifecycle mutex poisoned") {
            Lifecycle::Idle => ConnectionState::Idle,
            Lifecycle::Connecting { .. } => ConnectionState::Connecting,
            Lifecycle::Ready(_) => ConnectionState::Ready,
            Lifecycle::Closing(_) => ConnectionState::Closing,
            Lifecycle::Closed => ConnectionState::Closed,
            Lifecycle::Failed => ConnectionState::Failed,
        }
    }

    /// The live connection, if the manager is `Ready`.
    pub fn current(&self) -> Option<Arc<H::Connection>> {
        match &*self.lifecycle.lock().expect("lifecycle mutex poisoned") {
            Lifecycle::Ready(connection) => Some(Arc::clone(connection)),
            _ => None,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Record an attempt's outcome, unless a newer attempt or a teardown
    /// already moved the lifecycle on. Idempotent: both `start()` callers
    /// and a racing `stop()` settle through here.
    fn settle_attempt(&self, generation: u64, result: &Result<Arc<H::Connection>, ClientError>) {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle mutex poisoned");
        let Lifecycle::Connecting {
            generation: current,
            ..
        } = &*lifecycle
        else {
            return;
        };
        if *current != generation {
            return;
        }

        match result {
            Ok(connection) => {
                *lifecycle = Lifecycle::Ready(Arc::clone(connection));
                drop(lifecycle);
                debug!("connection established");
                self.emit(ConnectionEvent::Ready);
            }
            Err(e) => {
                // All attempt state is dropped; the manager stays retryable
                *lifecycle = Lifecycle::Failed;
                drop(lifecycle);
                debug!("connection attempt failed: {e}");
                self.emit(ConnectionEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Start the connection.
    ///
    /// Returns the existing connection when already `Ready`; joins the
    /// pending attempt when one is in flight (no duplicate connection is
    /// ever created); otherwise begins a new attempt. On failure the
    /// manager returns to a retryable state and the error propagates to
    /// every joined caller.
    pub async fn start(&self) -> ClientResult<Arc<H::Connection>> {
        loop {
            enum Plan<C> {
                Join {
                    attempt: SharedAttempt<C>,
                    generation: u64,
                },
                AwaitClose(SharedClose),
            }

            let plan = {
                let mut lifecycle = self.lifecycle.lock().expect("lifecycle mutex poisoned");
                match &*lifecycle {
                    Lifecycle::Ready(connection) => return Ok(Arc::clone(connection)),
                    Lifecycle::Connecting {
                        attempt,
                        generation,
                    } => Plan::Join {
                        attempt: attempt.clone(),
                        generation: *generation,
                    },
                    Lifecycle::Closing(close) => Plan::AwaitClose(close.clone()),
                    Lifecycle::Idle | Lifecycle::Closed | Lifecycle::Failed => {
                        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                        let handler = Arc::clone(&self.handler);
                        let attempt: SharedAttempt<H::Connection> =
                            async move { handler.establish().await.map(Arc::new) }
                                .boxed()
                                .shared();
                        *lifecycle = Lifecycle::Connecting {
                            attempt: attempt.clone(),
                            generation,
                        };
                        Plan::Join {
                            attempt,
                            generation,
                        }
                    }
                }
            };

            match plan {
                Plan::Join {
                    attempt,
                    generation,
                } => {
                    let result = attempt.await;
                    self.settle_attempt(generation, &result);
                    return result;
                }
                // A pending teardown finishes before a new attempt begins
                Plan::AwaitClose(close) => {
                    close.await;
                }
            }
        }
    }

    /// Stop the connection.
    ///
    /// No-op when neither connected nor connecting. A pending close is
    /// joined, not duplicated. A pending connect is awaited first: if it
    /// failed, there is nothing to close; if it succeeded, the fresh
    /// connection is closed. The connection reference leaves the lifecycle
    /// before the handler's close side effects can be observed.
    pub async fn stop(&self) -> ClientResult<()> {
        loop {
            enum Plan<C> {
                Done,
                AwaitConnect {
                    attempt: SharedAttempt<C>,
                    generation: u64,
                },
                AwaitClose(SharedClose),
            }

            let plan = {
                let mut lifecycle = self.lifecycle.lock().expect("lifecycle mutex poisoned");
                match &*lifecycle {
                    Lifecycle::Idle | Lifecycle::Closed | Lifecycle::Failed => Plan::Done,
                    Lifecycle::Closing(close) => Plan::AwaitClose(close.clone()),
                    Lifecycle::Connecting {
                        attempt,
                        generation,
                    } => Plan::AwaitConnect {
                        attempt: attempt.clone(),
                        generation: *generation,
                    },
                    Lifecycle::Ready(connection) => {
                        let connection = Arc::clone(connection);
                        let handler = Arc::clone(&self.handler);
                        let events = self.events.clone();
                        let lifecycle_slot = Arc::clone(&self.lifecycle);
                        let close: SharedClose = async move {
                            if let Err(e) = handler.close(&connection).await {
                                warn!("error during connection close: {e}");
                                let _ = events.send(ConnectionEvent::Failed {
                                    reason: e.to_string(),
                                });
                            }
                            let mut lifecycle =
                                lifecycle_slot.lock().expect("lifecycle mutex poisoned");
                            if matches!(*lifecycle, Lifecycle::Closing(_)) {
                                *lifecycle = Lifecycle::Closed;
                            }
                            drop(lifecycle);
                            debug!("connection closed");
                            let _ = events.send(ConnectionEvent::Closed);
                        }
                        .boxed()
                        .shared();
                        *lifecycle = Lifecycle::Closing(close.clone());
                        Plan::AwaitClose(close)
                    }
                }
            };

            match plan {
                Plan::Done => return Ok(()),
                Plan::AwaitClose(close) => {
                    close.await;
                    return Ok(());
                }
                Plan::AwaitConnect {
                    attempt,
                    generation,
                } => {
                    // Observe the pending connect's outcome before acting
                    let result = attempt.await;
                    self.settle_attempt(generation, &result);
                    // Failed connect: the next iteration sees Failed and
                    // stops as a no-op. Success: sees Ready and closes it.
                }
            }
        }
    }
}

impl<H: ConnectionHandler> std::fmt::Debug for ConnectionManager<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FakeConnection(usize);

    struct FakeHandler {
        gate: Arc<Semaphore>,
        establish_calls: AtomicUsize,
        close_calls: AtomicUsize,
        fail_establish: std::sync::atomic::AtomicBool,
        fail_close: std::sync::atomic::AtomicBool,
    }

    impl FakeHandler {
        fn gated() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                establish_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                fail_establish: std::sync::atomic::AtomicBool::new(false),
                fail_close: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn open() -> Self {
            let handler = Self::gated();
            handler.gate.add_permits(100);
            handler
        }
    }

    #[async_trait]
    impl ConnectionHandler for FakeHandler {
        type Connection = FakeConnection;

        async fn establish(&self) -> ClientResult<FakeConnection> {
            let n = self.establish_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.gate
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
            if self.fail_establish.load(Ordering::SeqCst) {
                Err(ClientError::Connection("handler refused".to_string()))
            } else {
                Ok(FakeConnection(n))
            }
        }

        async fn close(&self, _connection: &FakeConnection) -> ClientResult<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_close.load(Ordering::SeqCst) {
                Err(ClientError::Connection("close exploded".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn gate(manager: &ConnectionManager<FakeHandler>) -> Arc<Semaphore> {
        Arc::clone(&manager.handler.gate)
    }

    #[tokio::test]
    async fn concurrent_starts_share_one_attempt() {
        let manager = Arc::new(ConnectionManager::new(FakeHandler::gated()));

        let mut joins = Vec::new();
        for _ in 0..3 {
            let manager = Arc::clone(&manager);
            joins.push(tokio::spawn(async move { manager.start().await }));
        }

        // Give every caller time to join the pending attempt
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(
            manager.handler.establish_calls.load(Ordering::SeqCst),
            1,
            "late callers must join the pending attempt"
        );

        gate(&manager).add_permits(1);

        let mut connections = Vec::new();
        for join in joins {
            connections.push(join.await.unwrap().unwrap());
        }
        assert!(Arc::ptr_eq(&connections[0], &connections[1]));
        assert!(Arc::ptr_eq(&connections[0], &connections[2]));
        assert_eq!(manager.handler.establish_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn concurrent_starts_observe_the_same_failure() {
        let manager = Arc::new(ConnectionManager::new(FakeHandler::gated()));
        manager.handler.fail_establish.store(true, Ordering::SeqCst);

        let a = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        let b = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate(&manager).add_permits(1);

        let a = a.await.unwrap();
        let b = b.await.unwrap();
        assert!(matches!(a, Err(ClientError::Connection(_))));
        assert!(matches!(b, Err(ClientError::Connection(_))));
        assert_eq!(manager.handler.establish_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn stop_during_failing_connect_never_closes() {
        let manager = Arc::new(ConnectionManager::new(FakeHandler::gated()));
        manager.handler.fail_establish.store(true, Ordering::SeqCst);

        let start = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stop = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate(&manager).add_permits(1);

        assert!(start.await.unwrap().is_err());
        stop.await.unwrap().unwrap();
        assert_eq!(
            manager.handler.close_calls.load(Ordering::SeqCst),
            0,
            "a connection that never opened must not be closed"
        );
    }

    #[tokio::test]
    async fn stop_during_successful_connect_closes_after_settlement() {
        let manager = Arc::new(ConnectionManager::new(FakeHandler::gated()));

        let start = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stop = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate(&manager).add_permits(1);

        assert!(start.await.unwrap().is_ok());
        stop.await.unwrap().unwrap();
        assert_eq!(manager.handler.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn failed_attempt_is_retryable() {
        let manager = ConnectionManager::new(FakeHandler::open());
        manager.handler.fail_establish.store(true, Ordering::SeqCst);

        assert!(manager.start().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Failed);

        manager
            .handler
            .fail_establish
            .store(false, Ordering::SeqCst);
        let connection = manager.start().await.unwrap();
        assert_eq!(connection.0, 2);
        assert_eq!(manager.handler.establish_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_is_a_noop_when_idle_and_idempotent() {
        let manager = ConnectionManager::new(FakeHandler::open());
        manager.stop().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.handler.close_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn close_errors_are_swallowed_and_teardown_converges() {
        let manager = ConnectionManager::new(FakeHandler::open());
        manager.handler.fail_close.store(true, Ordering::SeqCst);

        manager.start().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn start_after_stop_reconnects() {
        let manager = ConnectionManager::new(FakeHandler::open());
        manager.start().await.unwrap();
        manager.stop().await.unwrap();

        let connection = manager.start().await.unwrap();
        assert_eq!(connection.0, 2);
        assert_eq!(manager.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn start_when_ready_returns_existing_connection() {
        let manager = ConnectionManager::new(FakeHandler::open());
        let first = manager.start().await.unwrap();
        let second = manager.start().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.handler.establish_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lifecycle_events_are_broadcast() {
        let manager = ConnectionManager::new(FakeHandler::open());
        let mut events = manager.subscribe();

        manager.start().await.unwrap();
        assert!(matches!(events.recv().await, Ok(ConnectionEvent::Ready)));

        manager.stop().await.unwrap();
        assert!(matches!(events.recv().await, Ok(ConnectionEvent::Closed)));
    }
}
