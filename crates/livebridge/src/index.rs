//! Name hashing and hash-keyed slot lookup.
//!
//! Joints and properties are matched across processes by a 32-bit hash of
//! their name, never by array position, because each side may order its
//! channels differently. [`NameIndex`] resolves a hash to its array slot in
//! O(1) with a small open-addressed table.

// FNV-1a constants
const FNV_OFFSET_32: u32 = 0x811c9dc5;
const FNV_PRIME_32: u32 = 0x01000193;

/// Hash value reserved for "empty" table entries and unbound joints.
pub const EMPTY_HASH: u32 = 0;

/// FNV-1a 32-bit hash of a byte string.
///
/// Stable across processes, platforms and builds, which is all the record
/// needs from it.
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_32;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash
}

/// Hash of a joint, property or model name as stored in the record.
#[inline]
pub fn name_hash(name: &str) -> u32 {
    fnv1a_32(name.as_bytes())
}

/// Hash of a pair name, for hosts that key their own tables by it.
#[inline]
pub fn hash_pair_name(pair_name: &str) -> u32 {
    name_hash(pair_name)
}

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    hash: u32,
    slot: u32,
}

/// Open-addressed (linear probing) map from name hash to array slot.
///
/// The table is sized to at least twice the expected capacity so probe
/// chains stay short. Hash [`EMPTY_HASH`] cannot be stored. When two slots
/// share a hash the first one wins.
#[derive(Debug, Clone)]
pub struct NameIndex {
    entries: Box<[Entry]>,
    mask: usize,
    len: usize,
}

impl NameIndex {
    /// Create an index able to hold `capacity` names.
    pub fn with_capacity(capacity: usize) -> Self {
        let size = (capacity.max(4) * 2).next_power_of_two();
        Self {
            entries: vec![Entry::default(); size].into_boxed_slice(),
            mask: size - 1,
            len: 0,
        }
    }

    /// Number of stored names.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.entries.fill(Entry::default());
        self.len = 0;
    }

    /// Map `hash` to `slot`.
    ///
    /// Returns `false` if the hash is [`EMPTY_HASH`], already present, or the
    /// table is at its load limit.
    pub fn insert(&mut self, hash: u32, slot: usize) -> bool {
        if hash == EMPTY_HASH || self.len * 2 >= self.entries.len() {
            return false;
        }

        let mut pos = hash as usize & self.mask;
        loop {
            let entry = &mut self.entries[pos];
            if entry.hash == EMPTY_HASH {
                *entry = Entry {
                    hash,
                    slot: slot as u32,
                };
                self.len += 1;
                return true;
            }
            if entry.hash == hash {
                return false;
            }
            pos = (pos + 1) & self.mask;
        }
    }

    /// Slot stored for `hash`.
    pub fn get(&self, hash: u32) -> Option<usize> {
        if hash == EMPTY_HASH {
            return None;
        }

        let mut pos = hash as usize & self.mask;
        for _ in 0..self.entries.len() {
            let entry = &self.entries[pos];
            if entry.hash == hash {
                return Some(entry.slot as usize);
            }
            if entry.hash == EMPTY_HASH {
                return None;
            }
            pos = (pos + 1) & self.mask;
        }
        None
    }

    /// Replace the contents with `hashes`, each mapped to its position.
    pub fn rebuild<I>(&mut self, hashes: I)
    where
        I: IntoIterator<Item = u32>,
    {
        self.clear();
        for (slot, hash) in hashes.into_iter().enumerate() {
            self.insert(hash, slot);
        }
    }
}
