use super::chaincode::SimulationResults;
use fabric_wrangler_core::{
    BlockEvent, ChaincodeEvent, TransactionEnvelope, TransactionValidation, ValidationCode,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Height of the transaction that last wrote a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub block: u64,
    pub tx: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: Version,
}

#[derive(Debug, Clone, Default)]
pub struct WorldState {
    entries: BTreeMap<String, VersionedValue>,
}

impl WorldState {
    pub fn get(&self, key: &str) -> Option<&VersionedValue> {
        self.entries.get(key)
    }

    pub fn range<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a VersionedValue)> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    pub fn apply(&mut self, writes: &BTreeMap<String, Option<Vec<u8>>>, version: Version) {
        for (key, value) in writes {
            match value {
                Some(value) => {
                    self.entries.insert(
                        key.clone(),
                        VersionedValue {
                            value: value.clone(),
                            version,
                        },
                    );
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Committed channel ledger shared by every sandbox peer.
#[derive(Debug, Default)]
pub struct Ledger {
    state: WorldState,
    height: u64,
    committed: HashSet<String>,
    deployments: BTreeMap<String, String>,
}

impl Ledger {
    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn deployed_version(&self, chaincode_id: &str) -> Option<&str> {
        self.deployments.get(chaincode_id).map(String::as_str)
    }

    pub fn deploy(&mut self, chaincode_id: &str, version: &str) {
        self.deployments
            .insert(chaincode_id.to_string(), version.to_string());
    }

    /// Validates and appends one block. Transactions are validated in order,
    /// so a later one sees the writes of an earlier valid one.
    pub fn commit_block(
        &mut self,
        envelopes: &[TransactionEnvelope],
    ) -> (BlockEvent, Vec<ChaincodeEvent>) {
        let block_number = self.height;
        let mut transactions = Vec::with_capacity(envelopes.len());
        let mut events = Vec::new();

        for (index, envelope) in envelopes.iter().enumerate() {
            let (code, results) = self.validate(envelope);
            if let (ValidationCode::Valid, Some(results)) = (code, results) {
                let version = Version {
                    block: block_number,
                    tx: index as u32,
                };
                self.state.apply(&results.writes, version);
                if let Some(change) = &results.deployment {
                    self.deploy(&change.chaincode_id, &change.version);
                }
                if let Some(event) = results.event {
                    events.push(ChaincodeEvent {
                        chaincode_id: results.chaincode_id.clone(),
                        event_name: event.name,
                        tx_id: envelope.tx_id.clone(),
                        block_number,
                        payload: event.payload,
                    });
                }
            }
            self.committed.insert(envelope.tx_id.clone());
            debug!(tx_id = %envelope.tx_id, block_number, code = %code, "transaction validated");
            transactions.push(TransactionValidation {
                tx_id: envelope.tx_id.clone(),
                code,
            });
        }

        self.height += 1;
        info!(block_number, txs = transactions.len(), "block committed");
        (
            BlockEvent {
                block_number,
                transactions,
            },
            events,
        )
    }

    fn validate(
        &self,
        envelope: &TransactionEnvelope,
    ) -> (ValidationCode, Option<SimulationResults>) {
        if self.committed.contains(&envelope.tx_id) {
            return (ValidationCode::DuplicateTxid, None);
        }
        if !envelope.proposal.verify() || envelope.proposal.tx_id() != envelope.tx_id {
            return (ValidationCode::BadPayload, None);
        }
        let Some(first) = envelope.endorsements.first() else {
            return (ValidationCode::EndorsementPolicyFailure, None);
        };
        if envelope
            .endorsements
            .iter()
            .any(|e| e.rwset_digest != first.rwset_digest)
        {
            return (ValidationCode::EndorsementPolicyFailure, None);
        }
        let Ok(results) = SimulationResults::from_bytes(&first.results) else {
            return (ValidationCode::BadPayload, None);
        };

        let stale = results
            .reads
            .iter()
            .any(|(key, read)| self.state.get(key).map(|entry| entry.version) != *read);
        if stale {
            return (ValidationCode::MvccReadConflict, None);
        }
        (ValidationCode::Valid, Some(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_stops_at_prefix_boundary() {
        let mut state = WorldState::default();
        let writes = BTreeMap::from([
            ("dfn/a".to_string(), Some(b"1".to_vec())),
            ("dfn/b".to_string(), Some(b"2".to_vec())),
            ("dfo/a".to_string(), Some(b"3".to_vec())),
        ]);
        state.apply(&writes, Version { block: 0, tx: 0 });

        let keys: Vec<&String> = state.range("dfn/").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["dfn/a", "dfn/b"]);
    }

    #[test]
    fn deletes_remove_keys() {
        let mut state = WorldState::default();
        state.apply(
            &BTreeMap::from([("dfn/a".to_string(), Some(b"1".to_vec()))]),
            Version { block: 0, tx: 0 },
        );
        state.apply(
            &BTreeMap::from([("dfn/a".to_string(), None)]),
            Version { block: 1, tx: 0 },
        );
        assert!(state.is_empty());
    }
}
