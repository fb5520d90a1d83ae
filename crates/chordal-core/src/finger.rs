//! The finger table: `m` routing shortcuts at exponentially growing
//! distances around the ring. Purely advisory; lookups stay correct through
//! the successor pointer even when every entry here is stale.

use chordal_types::Peer;

use crate::id;

/// One routing shortcut. `start` is fixed at construction; `peer` is the
/// node currently believed to be `find_successor(start)`.
#[derive(Debug, Clone)]
pub(crate) struct FingerEntry {
    pub start: Vec<u8>,
    pub peer: Peer,
}

pub(crate) struct FingerTable {
    owner: Peer,
    entries: Vec<FingerEntry>,
}

impl FingerTable {
    /// A fresh table in which every entry points at the owner itself; the
    /// fix-fingers task repairs it from there.
    pub fn new(owner: Peer, key_size: u32) -> Self {
        let entries = (0..key_size)
            .map(|i| FingerEntry {
                start: id::finger_start(&owner.id, i, key_size),
                peer: owner.clone(),
            })
            .collect();
        FingerTable { owner, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, i: usize) -> &FingerEntry {
        &self.entries[i]
    }

    pub fn replace(&mut self, i: usize, peer: Peer) {
        self.entries[i].peer = peer;
    }

    /// Scan from the farthest shortcut down, returning the first peer that
    /// lies on the open arc between the owner and `target`. Falls back to
    /// the owner when no entry qualifies.
    pub fn closest_preceding(&self, target: &[u8]) -> Peer {
        for entry in self.entries.iter().rev() {
            if id::between(&entry.peer.id, &self.owner.id, target) {
                return entry.peer.clone();
            }
        }
        self.owner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u8) -> Peer {
        Peer::new(vec![id], format!("127.0.0.1:{}", 9000 + id as u16))
    }

    #[test]
    fn new_table_points_at_owner() {
        let owner = peer(10);
        let table = FingerTable::new(owner.clone(), 8);

        assert_eq!(table.len(), 8);
        assert_eq!(table.entry(0).start, vec![11]);
        for i in 0..table.len() {
            assert_eq!(table.entry(i).peer, owner);
            assert_eq!(table.entry(i).start, id::finger_start(&[10], i as u32, 8));
        }
    }

    #[test]
    fn closest_preceding_ignores_entries_past_target() {
        let owner = peer(0);
        let mut table = FingerTable::new(owner.clone(), 8);
        table.replace(3, peer(0x37)); // start 8 → node 55
        table.replace(7, peer(0xaa)); // start 128 → node 170

        // Target 100: 170 is past it, 55 precedes it.
        assert_eq!(table.closest_preceding(&[100]), peer(0x37));
        // Target 200: 170 precedes it.
        assert_eq!(table.closest_preceding(&[200]), peer(0xaa));
        // Target 40: no populated entry precedes it.
        assert_eq!(table.closest_preceding(&[40]), owner);
    }

    #[test]
    fn closest_preceding_on_fresh_table_is_owner() {
        let owner = peer(50);
        let table = FingerTable::new(owner.clone(), 8);
        for target in [0u8, 49, 50, 51, 255] {
            assert_eq!(table.closest_preceding(&[target]), owner);
        }
    }
}
