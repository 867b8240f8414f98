use serde::{Deserialize, Serialize};

use crate::protocol::STATE_ACTIVE;

/// One endpoint of a named service, as read from the key-value store.
/// Built fresh on every listing; the store only holds the raw metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Reversible encoding of "name@address"
    pub id: String,

    /// Service name, the middle segment of the key
    pub name: String,

    /// Endpoint address, the last segment of the key
    pub address: String,

    /// Raw stored value, query-string encoded
    pub metadata: String,

    /// Liveness state, "active" unless the metadata says otherwise
    pub state: String,

    /// Grouping label, empty when not set
    pub group: String,
}

impl Service {
    pub fn is_active(&self) -> bool {
        self.state == STATE_ACTIVE
    }
}
