//! Store change feed: turns [`StoreChange`]s into load intents.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tsuzuri_window::{LoadIntent, MemoryStore, PipelineHandle, StoreChange};

/// Map one store change to the intent that keeps the window current.
pub fn intent_for(change: &StoreChange) -> LoadIntent {
    match change {
        StoreChange::Inserted(id) | StoreChange::Updated(id) => LoadIntent::reload_updated([*id]),
        StoreChange::Deleted(id) => LoadIntent::reload_deleted([*id]),
        StoreChange::Reset => LoadIntent::ResetAndReload,
    }
}

/// Forward store changes to the pipeline until either side goes away.
pub fn spawn_change_feed(store: &Arc<MemoryStore>, handle: PipelineHandle) -> JoinHandle<()> {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        loop {
            let intent = match changes.recv().await {
                Ok(change) => intent_for(&change),
                Err(RecvError::Lagged(skipped)) => {
                    // individual changes were lost, so nothing can be trusted
                    warn!(skipped, "change feed lagged, resetting");
                    LoadIntent::ResetAndReload
                }
                Err(RecvError::Closed) => break,
            };
            if handle.submit(intent).is_err() {
                break;
            }
        }
        debug!("change feed stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tsuzuri_types::EntryId;

    #[test]
    fn test_intent_for_changes() {
        let id = EntryId::from_u128(7);
        assert_eq!(
            intent_for(&StoreChange::Inserted(id)),
            LoadIntent::reload_updated([id])
        );
        assert_eq!(
            intent_for(&StoreChange::Deleted(id)),
            LoadIntent::reload_deleted([id])
        );
        assert_eq!(intent_for(&StoreChange::Reset), LoadIntent::ResetAndReload);
    }
}
