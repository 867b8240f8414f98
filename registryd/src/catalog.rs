use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::Service;

/// Name and address are covered by the id.
#[derive(Serialize)]
struct HashView<'a> {
    id: &'a str,
    metadata: &'a str,
    state: &'a str,
    group: &'a str,
}

/// Computes a SHA-256 fingerprint of a service listing.
/// Services are sorted by id so store ordering does not matter.
pub fn compute_hash(services: &[Service]) -> String {
    let mut indices: Vec<usize> = (0..services.len()).collect();
    indices.sort_by(|&a, &b| services[a].id.cmp(&services[b].id));

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let s = &services[i];
            HashView {
                id: &s.id,
                metadata: &s.metadata,
                state: &s.state,
                group: &s.group,
            }
        })
        .collect();

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize services for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
