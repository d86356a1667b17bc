// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Left-right snapshot of the local/remote classification.
//!
//! The reconciler publishes whole-set swaps from behind its mutex; readers
//! (one per ARP responder task) classify per frame without taking a lock.

use ahash::AHashSet;
use left_right::{Absorb, ReadHandle, ReadHandleFactory, WriteHandle};
use std::net::Ipv4Addr;

/// The classification sets as of the last published refresh.
#[derive(Clone, Debug, Default)]
pub struct ClassSets {
    local: AHashSet<Ipv4Addr>,
    remote: AHashSet<Ipv4Addr>,
}

impl ClassSets {
    fn is_remote(&self, ip: Ipv4Addr) -> bool {
        if self.local.contains(&ip) {
            return false;
        }
        self.remote.contains(&ip)
    }
}

enum ClassOp {
    Replace(ClassSets),
}

impl Absorb<ClassOp> for ClassSets {
    fn absorb_first(&mut self, op: &mut ClassOp, _: &Self) {
        match op {
            ClassOp::Replace(sets) => *self = sets.clone(),
        }
    }

    fn drop_first(self: Box<Self>) {}

    fn sync_with(&mut self, first: &Self) {
        *self = first.clone();
    }
}

/// Writer half of the classifier; owned by the reconciler.
pub struct ClassifierWriter(WriteHandle<ClassSets, ClassOp>);

impl ClassifierWriter {
    /// Create an empty classifier and the handle readers are minted from.
    #[must_use]
    pub fn new() -> (ClassifierWriter, ClassifierHandle) {
        let (w, r) = left_right::new::<ClassSets, ClassOp>();
        let factory = r.factory();
        (ClassifierWriter(w), ClassifierHandle(factory))
    }

    /// Atomically replace both classification sets.
    pub fn replace(
        &mut self,
        local: impl IntoIterator<Item = Ipv4Addr>,
        remote: impl IntoIterator<Item = Ipv4Addr>,
    ) {
        let sets = ClassSets {
            local: local.into_iter().collect(),
            remote: remote.into_iter().collect(),
        };
        self.0.append(ClassOp::Replace(sets));
        self.0.publish();
    }
}

/// Cloneable, thread-safe source of [`ClassifierReader`]s.
#[derive(Clone)]
pub struct ClassifierHandle(ReadHandleFactory<ClassSets>);

impl ClassifierHandle {
    /// Mint a reader for one consumer task.
    #[must_use]
    pub fn reader(&self) -> ClassifierReader {
        ClassifierReader(self.0.handle())
    }
}

/// Reader half of the classifier; one per consumer task.
pub struct ClassifierReader(ReadHandle<ClassSets>);

impl ClassifierReader {
    /// Classify an IP against the last published refresh.
    ///
    /// Returns false before the first publish and after the writer is gone.
    #[must_use]
    pub fn is_remote(&self, ip: Ipv4Addr) -> bool {
        self.0.enter().is_some_and(|sets| sets.is_remote(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::ClassifierWriter;
    use std::net::Ipv4Addr;

    #[test]
    fn publishes_whole_set_swaps() {
        let (mut writer, handle) = ClassifierWriter::new();
        let reader = handle.reader();
        let local = Ipv4Addr::new(10, 42, 1, 1);
        let remote = Ipv4Addr::new(10, 42, 2, 2);

        assert!(!reader.is_remote(remote));

        writer.replace([local], [remote]);
        assert!(reader.is_remote(remote));
        assert!(!reader.is_remote(local));
        assert!(!reader.is_remote(Ipv4Addr::new(10, 42, 9, 9)));

        writer.replace([local], []);
        assert!(!reader.is_remote(remote));
    }

    #[test]
    fn local_wins_over_remote_membership() {
        let (mut writer, handle) = ClassifierWriter::new();
        let reader = handle.reader();
        let ip = Ipv4Addr::new(10, 42, 3, 3);
        writer.replace([ip], [ip]);
        assert!(!reader.is_remote(ip));
    }
}
