use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one node process.
///
/// Generated once at startup and never changed. The total order on
/// identities is the election tie-break: when two candidates meet, the
/// lower identity wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first block is enough to tell nodes apart in logs.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}
