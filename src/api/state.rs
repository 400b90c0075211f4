use std::sync::Arc;

use crate::cache::SnapshotCache;
use crate::market_data::delta::DeltaBroadcaster;
use crate::persist::KvStore;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SnapshotCache>,
    pub kv: Arc<dyn KvStore>,
    pub broadcaster: Arc<DeltaBroadcaster>,
}

impl AppState {
    pub fn new(cache: Arc<SnapshotCache>, kv: Arc<dyn KvStore>, broadcaster: Arc<DeltaBroadcaster>) -> Self {
        Self { cache, kv, broadcaster }
    }
}
