use super::Error;
use crate::SidetreeTxn;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct State {
    transactions: Vec<SidetreeTxn>,
    reads: usize,
    failures: HashSet<usize>,
}

/// Append-only ledger shared by every clone.
///
/// Transaction numbers are assigned sequentially from zero.
#[derive(Clone, Default)]
pub struct Ledger {
    state: Arc<Mutex<State>>,
}

impl Ledger {
    /// Anchor `anchor_string` under `namespace`, returning its transaction number.
    pub fn anchor(&self, namespace: &str, anchor_string: &str, transaction_time: u64) -> u64 {
        let mut state = self.state.lock().unwrap();
        let transaction_number = state.transactions.len() as u64;
        state.transactions.push(SidetreeTxn {
            namespace: namespace.to_string(),
            anchor_string: anchor_string.to_string(),
            transaction_number,
            transaction_time,
        });
        transaction_number
    }

    /// Fail the `call`-th read (counted from zero across all clones).
    pub fn fail_read(&self, call: usize) {
        self.state.lock().unwrap().failures.insert(call);
    }

    /// All anchored transactions.
    pub fn transactions(&self) -> Vec<SidetreeTxn> {
        self.state.lock().unwrap().transactions.clone()
    }
}

impl crate::Ledger for Ledger {
    type Error = Error;

    async fn read(&mut self, since: Option<u64>) -> Result<(bool, Option<SidetreeTxn>), Error> {
        let mut state = self.state.lock().unwrap();
        let call = state.reads;
        state.reads += 1;
        if state.failures.remove(&call) {
            return Err(Error::Injected);
        }
        let next = state
            .transactions
            .iter()
            .position(|txn| since.is_none_or(|since| txn.transaction_number > since));
        Ok(match next {
            Some(index) => (
                index + 1 < state.transactions.len(),
                Some(state.transactions[index].clone()),
            ),
            None => (false, None),
        })
    }
}
