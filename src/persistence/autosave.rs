//! Keeps the flat-file store in step with the live [`Lands`] by following
//! its change channel.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::record::{capture_records, LandRecord};
use super::{LandStore, StoreError};
use crate::collisions::SharedLands;
use crate::lands::{LandChange, Lands};

/// Write or delete the record touched by one change.
pub fn persist_change(
    lands: &Lands,
    store: &dyn LandStore,
    change: &LandChange,
) -> Result<(), StoreError> {
    match lands.get_land(change.land) {
        Some(land) if !change.kind.is_removal() => store.save_land(&LandRecord::from_land(land)),
        // A land removed after this change was queued has nothing left to save.
        _ => store.remove_land(change.land),
    }
}

/// Rewrite every record and approval, and delete files of lands that no
/// longer exist.
pub fn resync(lands: &Lands, store: &dyn LandStore) -> Result<(), StoreError> {
    let records = capture_records(lands);
    let live: BTreeSet<_> = records.iter().map(|r| r.uuid).collect();
    for record in &records {
        store.save_land(record)?;
    }
    for stale in store.load_all_lands()? {
        if !live.contains(&stale.uuid) {
            store.remove_land(stale.uuid)?;
        }
    }
    store.save_approvals(lands.approvals())?;
    info!(lands = records.len(), "store resynchronised");
    Ok(())
}

/// Apply every change already queued on `rx`. Falls back to a full
/// [`resync`] when the receiver lagged. Returns the number of changes seen.
pub fn drain_changes(
    lands: &Lands,
    store: &dyn LandStore,
    rx: &mut broadcast::Receiver<LandChange>,
) -> Result<usize, StoreError> {
    let mut seen = 0;
    loop {
        match rx.try_recv() {
            Ok(change) => {
                persist_change(lands, store, &change)?;
                seen += 1;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "change log lagged, resyncing store");
                resync(lands, store)?;
                seen += skipped as usize;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    Ok(seen)
}

/// Persist changes in the background until the change channel closes.
pub fn spawn_autosave(
    lands: SharedLands,
    store: Arc<dyn LandStore>,
    mut rx: broadcast::Receiver<LandChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let guard = lands.read().await;
                    if let Err(e) = persist_change(&guard, store.as_ref(), &change) {
                        error!(land = %change.land_name, error = %e, "failed to persist land");
                    } else {
                        debug!(land = %change.land_name, kind = ?change.kind, "land persisted");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "autosave lagged, resyncing store");
                    let guard = lands.read().await;
                    if let Err(e) = resync(&guard, store.as_ref()) {
                        error!(error = %e, "resync failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
