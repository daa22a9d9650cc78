//! Realtime wallet snapshots for the client layer.

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{ProviderId, WalletSnapshot};

/// Stream of wallet snapshots. Yields the current snapshot first, then every
/// newer one that is published; intermediate snapshots may be skipped.
pub type SnapshotStream = WatchStream<WalletSnapshot>;

/// Latest published snapshot of one wallet.
///
/// The engine publishes while it still holds the wallet lock, after the unit of
/// work has been verified, so readers never observe a half-applied change.
#[derive(Debug)]
pub struct WalletFeed {
    tx: watch::Sender<WalletSnapshot>,
}

impl WalletFeed {
    pub fn new(provider: ProviderId) -> Self {
        let (tx, _rx) = watch::channel(WalletSnapshot::empty(provider));
        Self { tx }
    }

    /// Publish `snapshot` if it is newer and differs from the current one.
    pub fn publish(&self, snapshot: WalletSnapshot) -> bool {
        self.tx.send_if_modified(|current| {
            if snapshot.revision < current.revision || *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    pub fn current(&self) -> WalletSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotStream {
        WatchStream::new(self.tx.subscribe())
    }
}
