//! # Canonical Snapshot
//!
//! Bit-exact `postcard` encoding of the complete engine state, the source of
//! truth for determinism checks.
//!
//! Format:
//! ```text
//! [header_len: u32 LE] [SnapshotHeader (postcard)] [EngineSnapshot (postcard)]
//! ```
//!
//! Every collection is emitted in id order and floats are encoded by their
//! bit pattern, so two engines in the same state produce the same bytes. The
//! header carries the BLAKE3 digest of the data section.

use crate::domain::DomainConstants;
use crate::graph::{Graph, GraphOptions};
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::types::{AxiomError, Connection, DomainId, Tick, Token, Version};
use serde::{Deserialize, Serialize};

/// Maximum token count accepted on import.
pub const MAX_IMPORT_TOKEN_COUNT: u64 = 1_000_000;

/// Maximum connection count accepted on import.
pub const MAX_IMPORT_CONNECTION_COUNT: u64 = 10_000_000;

// =============================================================================
// FORMAT
// =============================================================================

/// Header of a canonical snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub token_count: u64,
    pub connection_count: u64,
    pub domain_count: u64,
    /// BLAKE3 digest of the data section.
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    /// Validate magic and version.
    pub fn validate(&self) -> Result<(), AxiomError> {
        if &self.magic != MAGIC_BYTES {
            return Err(AxiomError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(AxiomError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

/// A domain as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: DomainId,
    pub name: String,
    pub constants: DomainConstants,
    pub tick: Tick,
    pub version: Version,
}

/// Complete engine state in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub tick: Tick,
    pub policy_version: u32,
    pub next_token_id: u64,
    pub next_connection_id: u64,
    pub next_signal_id: u64,
    pub next_candidate_id: u64,
    /// Tokens in id order.
    pub tokens: Vec<Token>,
    /// Connections in id order.
    pub connections: Vec<Connection>,
    /// Domains in id order.
    pub domains: Vec<DomainRecord>,
    /// Applied `Create` deduplication keys, sorted.
    pub applied_keys: Vec<String>,
}

impl EngineSnapshot {
    /// Rebuild the Graph Store, preserving ids and versions.
    pub fn restore_graph(&self, options: GraphOptions) -> Result<Graph, AxiomError> {
        for token in &self.tokens {
            if token.embedding.len() != options.embedding_dim
                || token.state.dim() != options.state_dim
            {
                return Err(AxiomError::SerializationError(format!(
                    "token {} does not match the configured dimensions",
                    token.id
                )));
            }
        }
        Graph::restore(
            options,
            self.tokens.clone(),
            self.connections.clone(),
            self.next_token_id,
            self.next_connection_id,
        )
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Encode a snapshot to canonical bytes.
pub fn encode_snapshot(snapshot: &EngineSnapshot) -> Result<Vec<u8>, AxiomError> {
    let data = postcard::to_allocvec(snapshot)
        .map_err(|e| AxiomError::SerializationError(format!("Data: {e}")))?;

    let header = SnapshotHeader {
        magic: *MAGIC_BYTES,
        version: FORMAT_VERSION,
        token_count: snapshot.tokens.len() as u64,
        connection_count: snapshot.connections.len() as u64,
        domain_count: snapshot.domains.len() as u64,
        checksum: *blake3::hash(&data).as_bytes(),
    };
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| AxiomError::SerializationError(format!("Header: {e}")))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data);
    Ok(result)
}

/// Decode and verify canonical bytes.
pub fn decode_snapshot(bytes: &[u8]) -> Result<EngineSnapshot, AxiomError> {
    let Some((len_bytes, rest)) = bytes.split_first_chunk::<4>() else {
        return Err(AxiomError::SerializationError("Data too short".to_string()));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(AxiomError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, data) = rest.split_at(header_len);

    let header: SnapshotHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| AxiomError::SerializationError(format!("Header: {e}")))?;
    header.validate()?;

    // Size limits before decoding the body.
    if header.token_count > MAX_IMPORT_TOKEN_COUNT {
        return Err(AxiomError::SerializationError(format!(
            "Token count {} exceeds maximum allowed {MAX_IMPORT_TOKEN_COUNT}",
            header.token_count
        )));
    }
    if header.connection_count > MAX_IMPORT_CONNECTION_COUNT {
        return Err(AxiomError::SerializationError(format!(
            "Connection count {} exceeds maximum allowed {MAX_IMPORT_CONNECTION_COUNT}",
            header.connection_count
        )));
    }

    if blake3::hash(data).as_bytes() != &header.checksum {
        return Err(AxiomError::SerializationError(
            "Checksum mismatch".to_string(),
        ));
    }

    let snapshot: EngineSnapshot = postcard::from_bytes(data)
        .map_err(|e| AxiomError::SerializationError(format!("Data: {e}")))?;

    if snapshot.tokens.len() as u64 != header.token_count
        || snapshot.connections.len() as u64 != header.connection_count
        || snapshot.domains.len() as u64 != header.domain_count
    {
        return Err(AxiomError::SerializationError(
            "Entity count mismatch".to_string(),
        ));
    }
    Ok(snapshot)
}

/// BLAKE3 hash of canonical bytes, as 64 hex characters.
#[must_use]
pub fn snapshot_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::types::TokenSpec;

    fn snapshot() -> EngineSnapshot {
        let options = GraphOptions {
            embedding_dim: 2,
            state_dim: 2,
            ..GraphOptions::default()
        };
        let mut graph = Graph::new(options);
        let a = graph
            .create_token(TokenSpec::new(DomainId(1), vec![1.0, 0.0]).with_label("a"))
            .expect("token");
        let b = graph
            .create_token(TokenSpec::new(DomainId(1), vec![0.0, 1.0]))
            .expect("token");
        graph.create_connection(a, b, 0.5).expect("edge");
        let (next_token_id, next_connection_id) = graph.next_ids();
        EngineSnapshot {
            tick: Tick(4),
            policy_version: 2,
            next_token_id,
            next_connection_id,
            next_signal_id: 9,
            next_candidate_id: 3,
            tokens: graph.tokens().cloned().collect(),
            connections: graph.connections().cloned().collect(),
            domains: vec![DomainRecord {
                id: DomainId(1),
                name: "default".to_string(),
                constants: DomainConstants::default(),
                tick: Tick(4),
                version: Version::INITIAL,
            }],
            applied_keys: vec!["k".to_string()],
        }
    }

    #[test]
    fn encoding_is_stable() {
        let first = encode_snapshot(&snapshot()).expect("encode");
        let second = encode_snapshot(&snapshot()).expect("encode");
        assert_eq!(first, second);
        assert_eq!(snapshot_hash(&first).len(), 64);
        assert_eq!(decode_snapshot(&first).expect("decode"), snapshot());
    }

    #[test]
    fn corrupted_data_detected() {
        let mut bytes = encode_snapshot(&snapshot()).expect("encode");
        if let Some(last) = bytes.last_mut() {
            *last ^= 0xFF;
        }
        assert!(decode_snapshot(&bytes).is_err());
        assert!(decode_snapshot(&[1, 2]).is_err());
    }

    #[test]
    fn restored_graph_keeps_ids_and_labels() {
        let snap = snapshot();
        let options = GraphOptions {
            embedding_dim: 2,
            state_dim: 2,
            ..GraphOptions::default()
        };
        let graph = snap.restore_graph(options).expect("restore");
        assert_eq!(graph.find_by_label("a").map(|t| t.0), Some(0));
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(graph.next_ids(), (2, 1));

        let wrong = GraphOptions {
            embedding_dim: 3,
            ..options
        };
        assert!(snap.restore_graph(wrong).is_err());
    }
}
