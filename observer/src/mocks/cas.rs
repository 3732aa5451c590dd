use super::Error;
use crate::files::SHA2_256;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct State {
    content: HashMap<String, Bytes>,
    failing: HashSet<String>,
}

/// Content-addressable storage keyed by the base64url sha2-256 multihash of each blob.
#[derive(Clone, Default)]
pub struct Cas {
    state: Arc<Mutex<State>>,
}

impl Cas {
    /// Compute the address of `content`.
    pub fn address(content: &[u8]) -> String {
        let mut multihash = vec![SHA2_256 as u8, 32];
        multihash.extend_from_slice(&Sha256::digest(content));
        multibase::Base::Base64Url.encode(multihash)
    }

    /// Store `content`, returning its address.
    pub fn write(&self, content: &[u8]) -> String {
        let address = Self::address(content);
        self.insert(&address, Bytes::copy_from_slice(content));
        address
    }

    /// Store `content` at an arbitrary `address`.
    pub fn insert(&self, address: &str, content: Bytes) {
        self.state
            .lock()
            .unwrap()
            .content
            .insert(address.to_string(), content);
    }

    /// Fail every read of `address`.
    pub fn fail(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(address.to_string());
    }
}

impl crate::Cas for Cas {
    type Error = Error;

    async fn read(&self, address: &str) -> Result<Bytes, Error> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(address) {
            return Err(Error::Injected);
        }
        state
            .content
            .get(address)
            .cloned()
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }
}
