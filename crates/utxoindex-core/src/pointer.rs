//! Latest pointer — the atomically swapped `(height, hash)` readers tag
//! responses with, plus a write sequence readers use to detect a moving
//! snapshot.
//!
//! The sequence works like a seqlock: it is odd while the writer is between
//! `begin_write` and the end of the guard, even otherwise. A reader whose
//! sequence differs before and after its reads saw a concurrent write.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::types::LatestPointer;

/// Pause between loads while a write section is open.
const SETTLE_PAUSE: Duration = Duration::from_millis(1);

/// Upper bound on pauses before a reader proceeds against an open section.
const SETTLE_ATTEMPTS: u32 = 2_000;

/// What a reader captures before touching the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub latest: LatestPointer,
    pub sequence: u64,
}

impl Snapshot {
    /// `true` while a write section is open.
    pub fn is_writing(&self) -> bool {
        self.sequence % 2 == 1
    }
}

/// Shared cell published by the sync loop, read by every query.
pub struct LatestCell {
    current: ArcSwap<Snapshot>,
}

impl LatestCell {
    pub fn new(latest: LatestPointer) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                latest,
                sequence: 0,
            }),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn latest(&self) -> LatestPointer {
        self.current.load().latest.clone()
    }

    /// Load a snapshot taken while no write section is open, pausing until
    /// the writer closes the current one. After `SETTLE_ATTEMPTS` pauses the
    /// last load is returned as is.
    pub async fn load_settled(&self) -> Arc<Snapshot> {
        let mut snapshot = self.load();
        let mut attempts = 0;
        while snapshot.is_writing() && attempts < SETTLE_ATTEMPTS {
            tokio::time::sleep(SETTLE_PAUSE).await;
            snapshot = self.load();
            attempts += 1;
        }
        if snapshot.is_writing() {
            tracing::warn!(sequence = snapshot.sequence, "write section still open, reading anyway");
        }
        snapshot
    }

    /// Open a write section. Only the single writer calls this.
    pub fn begin_write(&self) -> WriteSection<'_> {
        self.bump(None);
        WriteSection {
            cell: self,
            publish: None,
        }
    }

    /// Replace the pointer outside of any index mutation (start-up restore).
    pub fn reset(&self, latest: LatestPointer) {
        let sequence = self.current.load().sequence;
        self.current.store(Arc::new(Snapshot {
            latest,
            sequence: sequence + 2 - sequence % 2,
        }));
    }

    fn bump(&self, latest: Option<LatestPointer>) {
        let prev = self.current.load_full();
        let latest = match latest {
            Some(next) => {
                if next.height < prev.latest.height {
                    tracing::warn!(
                        from = prev.latest.height,
                        to = next.height,
                        "latest pointer moving backwards"
                    );
                }
                next
            }
            None => prev.latest.clone(),
        };
        self.current.store(Arc::new(Snapshot {
            latest,
            sequence: prev.sequence + 1,
        }));
    }
}

impl Default for LatestCell {
    fn default() -> Self {
        Self::new(LatestPointer::default())
    }
}

/// An open write section. Closing it (explicitly or on drop, e.g. on an
/// error path) makes the sequence even again.
pub struct WriteSection<'a> {
    cell: &'a LatestCell,
    publish: Option<LatestPointer>,
}

impl WriteSection<'_> {
    /// Close the section and publish a new latest pointer.
    pub fn publish(mut self, latest: LatestPointer) {
        self.publish = Some(latest);
    }

    /// Close the section, keeping the current pointer.
    pub fn finish(self) {}
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        self.cell.bump(self.publish.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(height: u64) -> LatestPointer {
        LatestPointer {
            height,
            hash: format!("h{height}"),
        }
    }

    #[test]
    fn write_section_brackets_sequence() {
        let cell = LatestCell::new(ptr(1));
        let before = cell.load();
        assert!(!before.is_writing());

        let section = cell.begin_write();
        assert!(cell.load().is_writing());
        assert_eq!(cell.latest(), ptr(1));
        section.publish(ptr(2));

        let after = cell.load();
        assert!(!after.is_writing());
        assert_eq!(after.latest, ptr(2));
        assert_eq!(after.sequence, before.sequence + 2);
    }

    #[test]
    fn dropped_section_keeps_pointer() {
        let cell = LatestCell::new(ptr(5));
        {
            let _section = cell.begin_write();
        }
        let snap = cell.load();
        assert!(!snap.is_writing());
        assert_eq!(snap.latest, ptr(5));
    }

    #[tokio::test]
    async fn load_settled_returns_immediately_when_idle() {
        let cell = LatestCell::new(ptr(3));
        let snap = cell.load_settled().await;
        assert!(!snap.is_writing());
        assert_eq!(snap.latest, ptr(3));
    }

    #[test]
    fn reset_keeps_sequence_even() {
        let cell = LatestCell::default();
        cell.reset(ptr(9));
        let snap = cell.load();
        assert!(!snap.is_writing());
        assert_eq!(snap.latest.height, 9);
    }
}
