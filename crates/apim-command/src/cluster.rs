use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Membership view of the local node.
///
/// Primary status may change between two calls; callers read it once per
/// decision and never cache it.
pub trait ClusterOracle: Send + Sync {
    fn node_id(&self) -> &str;
    fn is_primary(&self) -> bool;
}

/// Oracle with a fixed node id and a primary flag that can be flipped at
/// runtime. Cloned handles share the flag.
#[derive(Debug, Clone)]
pub struct StaticCluster {
    node_id: String,
    primary: Arc<AtomicBool>,
}

impl StaticCluster {
    pub fn new(node_id: impl Into<String>, primary: bool) -> Self {
        Self {
            node_id: node_id.into(),
            primary: Arc::new(AtomicBool::new(primary)),
        }
    }

    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }
}

impl ClusterOracle for StaticCluster {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn is_primary(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }
}
