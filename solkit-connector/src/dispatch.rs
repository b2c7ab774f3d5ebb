use crate::{cluster::ClusterClient, connectors::Connector, error::Result};
use std::{future::Future, sync::Arc};

/// Runs `op` against the active connector if it is available.
///
/// Resolves to `Ok(None)` without calling `op` when the active connector
/// reports itself unavailable. This is the one availability gate every public
/// action goes through.
pub async fn with_connector<T, F, Fut>(cluster: &ClusterClient, op: F) -> Result<Option<T>>
where
    F: FnOnce(Arc<Connector>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let connector = cluster.store().active_connector();
    if !connector.is_available() {
        tracing::debug!("Connector {} is unavailable, skipping", connector.name());
        return Ok(None);
    }
    op(connector).await.map(Some)
}
