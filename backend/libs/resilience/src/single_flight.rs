/// Single-flight execution
///
/// The first caller installs a shared future in a mutex-guarded slot. Callers
/// arriving while it runs await the same future instead of starting their own.
/// The slot is emptied when the flight finishes, so the next call starts fresh.
///
/// [`run_keyed`](SingleFlight::run_keyed) only joins a flight started under the
/// same key; a caller with another key replaces the slot with its own flight.
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct Flight<T> {
    id: u64,
    key: u64,
    future: Shared<BoxFuture<'static, T>>,
}

pub struct SingleFlight<T: Clone> {
    name: &'static str,
    slot: Mutex<Option<Flight<T>>>,
    next_id: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `make()` unless a flight is already in progress, in which case join it
    ///
    /// `make` is only invoked by the caller that starts a new flight.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.run_keyed(0, make).await
    }

    /// [`run`](Self::run), joining only a flight started under `key`
    ///
    /// A flight under another key is displaced from the slot but keeps running
    /// for the callers already awaiting it.
    pub async fn run_keyed<F, Fut>(&self, key: u64, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, future) = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(flight) if flight.key == key => {
                    debug!(name = self.name, flight = flight.id, key, "Joining in-flight operation");
                    (flight.id, flight.future.clone())
                }
                _ => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = make().boxed().shared();
                    *slot = Some(Flight {
                        id,
                        key,
                        future: future.clone(),
                    });
                    debug!(name = self.name, flight = id, key, "Starting new flight");
                    (id, future)
                }
            }
        };

        let output = future.await;

        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }

        output
    }

    /// Whether a flight is currently installed
    pub fn in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }
}
