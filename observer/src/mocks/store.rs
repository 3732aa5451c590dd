use super::Error;
use crate::AnchoredOperation;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    puts: Vec<Vec<AnchoredOperation>>,
    failures: usize,
}

/// Operation store that records every successful `put`.
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<Mutex<State>>,
}

impl Store {
    /// Fail the next `n` calls to `put`.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures = n;
    }

    /// Operations of each successful `put`, in call order.
    pub fn puts(&self) -> Vec<Vec<AnchoredOperation>> {
        self.state.lock().unwrap().puts.clone()
    }

    /// Every stored operation, in call order.
    pub fn operations(&self) -> Vec<AnchoredOperation> {
        self.state
            .lock()
            .unwrap()
            .puts
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Stored operations that apply to `unique_suffix`.
    pub fn get(&self, unique_suffix: &str) -> Vec<AnchoredOperation> {
        self.operations()
            .into_iter()
            .filter(|op| op.unique_suffix == unique_suffix)
            .collect()
    }
}

impl crate::OperationStore for Store {
    type Error = Error;

    async fn put(&self, operations: Vec<AnchoredOperation>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::Injected);
        }
        state.puts.push(operations);
        Ok(())
    }
}
