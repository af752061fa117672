//! Call recording for mock implementations.

use parking_lot::Mutex;

/// Records calls for verification in tests.
///
/// Methods take `&self`; the log lives behind a `parking_lot::Mutex` so recorders can be
/// embedded in `Send + Sync` mocks.
#[derive(Debug)]
pub struct CallRecorder<T> {
    calls: Mutex<Vec<T>>,
}

impl<T: Clone> CallRecorder<T> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Append a call to the log.
    pub fn record(&self, call: T) {
        self.calls.lock().push(call);
    }

    /// Get a copy of all recorded calls.
    pub fn calls(&self) -> Vec<T> {
        self.calls.lock().clone()
    }

    /// Count calls matching the predicate.
    pub fn count(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Recorded calls matching the predicate, in call order.
    pub fn filtered(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.calls
            .lock()
            .iter()
            .filter(|call| predicate(call))
            .cloned()
            .collect()
    }

    /// Get total number of recorded calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl<T: Clone> Default for CallRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}
