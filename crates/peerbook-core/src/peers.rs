//! Peer records published by the registry.
//!
//! `PeerTable` is where push updates end up: records of the relevant kind are
//! added the first time a name is seen and merged in place afterwards. An
//! update only overwrites the fields it carries. Nothing here deletes a peer;
//! pruning is the caller's policy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A peer as described by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    #[serde(default)]
    pub user: String,
    pub kind: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub verified_on: i64,
    #[serde(default)]
    pub last_connected: i64,
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Counts from a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
    pub ignored: usize,
}

/// Peers known to this client, in first-seen order.
#[derive(Debug, Clone)]
pub struct PeerTable {
    kind: String,
    peers: Vec<Peer>,
    index: HashMap<String, usize>,
}

impl PeerTable {
    /// Create an empty table accepting peers of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            peers: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Merge a batch of raw records from the registry.
    ///
    /// Records that are not objects, lack a name, or are of another kind are
    /// ignored, as are new records that do not describe a valid peer.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Value>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in incoming {
            let Some(fields) = record.as_object() else {
                summary.ignored += 1;
                continue;
            };
            if fields.get("kind").and_then(Value::as_str) != Some(self.kind.as_str()) {
                summary.ignored += 1;
                continue;
            }
            let Some(name) = fields.get("name").and_then(Value::as_str) else {
                summary.ignored += 1;
                continue;
            };

            let merged = match self.index.get(name) {
                Some(&slot) => overlay(&self.peers[slot], fields).map(|peer| (Some(slot), peer)),
                None => serde_json::from_value::<Peer>(record.clone()).map(|peer| (None, peer)),
            };
            match merged {
                Ok((Some(slot), peer)) => {
                    self.peers[slot] = peer;
                    summary.updated += 1;
                }
                Ok((None, peer)) => {
                    self.index.insert(peer.name.clone(), self.peers.len());
                    self.peers.push(peer);
                    summary.added += 1;
                }
                Err(e) => {
                    warn!(peer = name, error = %e, "Ignoring malformed peer record");
                    summary.ignored += 1;
                }
            }
        }
        summary
    }

    /// Look up a peer by name.
    pub fn get(&self, name: &str) -> Option<&Peer> {
        self.index.get(name).map(|&slot| &self.peers[slot])
    }

    /// All peers in first-seen order.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Copy the fields present in `fields` over `current`.
fn overlay(current: &Peer, fields: &Map<String, Value>) -> serde_json::Result<Peer> {
    let mut merged = serde_json::to_value(current)?;
    if let Value::Object(target) = &mut merged {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged)
}
