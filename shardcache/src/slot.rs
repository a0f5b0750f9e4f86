//! Hash Slot Routing - CRC16 mod 16384
//!
//! Redis Cluster compatible key-to-slot mapping, including `{tag}` hash tags
//! that force related keys onto the same shard.

use std::collections::BTreeMap;

/// Total number of hash slots (Redis-compatible)
pub const TOTAL_SLOTS: u16 = 16384;

/// CRC16/XMODEM lookup table (polynomial 0x1021), built at compile time
const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Calculate CRC16/XMODEM checksum
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let idx = ((crc >> 8) ^ u16::from(byte)) as usize;
        (crc << 8) ^ CRC16_TABLE[idx]
    })
}

/// Extract the hash tag from a key
///
/// The tag is the text between the first `{` and the first `}` after it.
/// Empty tags (`{}`) and unmatched braces yield `None`.
pub fn hash_tag(key: &str) -> Option<&str> {
    let start = key.find('{')?;
    let end = key[start + 1..].find('}')?;
    let tag = &key[start + 1..start + 1 + end];
    (!tag.is_empty()).then_some(tag)
}

/// Calculate the hash slot for a key (0-16383)
///
/// # Example
/// ```
/// use shardcache::slot::compute_slot;
///
/// let slot = compute_slot("user:1001");
/// assert!(slot < 16384);
///
/// // Hash tags ensure same slot
/// assert_eq!(compute_slot("{user}:1"), compute_slot("{user}:2"));
/// ```
pub fn compute_slot(key: &str) -> u16 {
    let hashed = hash_tag(key).unwrap_or(key);
    crc16(hashed.as_bytes()) % TOTAL_SLOTS
}

/// Group items by the slot of their key
///
/// Relative input order is preserved inside each group; groups are ordered
/// by slot number.
pub fn group_by_shard<T, I, F>(items: I, key_of: F) -> BTreeMap<u16, Vec<T>>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> &str,
{
    let mut groups: BTreeMap<u16, Vec<T>> = BTreeMap::new();
    for item in items {
        let slot = compute_slot(key_of(&item));
        groups.entry(slot).or_default().push(item);
    }
    groups
}

/// Hash slot type wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashSlot(u16);

impl HashSlot {
    /// Create a slot, returning `None` when out of range
    pub fn new(slot: u16) -> Option<Self> {
        (slot < TOTAL_SLOTS).then_some(Self(slot))
    }

    /// Calculate hash slot from key
    pub fn from_key(key: &str) -> Self {
        Self(compute_slot(key))
    }

    /// Get the slot number
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl From<HashSlot> for u16 {
    fn from(slot: HashSlot) -> Self {
        slot.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // Standard CRC16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn test_known_redis_slots() {
        assert_eq!(compute_slot("foo"), 12182);
        assert_eq!(compute_slot("hello"), 866);
    }

    #[test]
    fn test_slot_range() {
        for i in 0..5000 {
            let key = format!("key:{}:{}", i, i * 31);
            assert!(compute_slot(&key) < TOTAL_SLOTS);
        }
        assert!(compute_slot("") < TOTAL_SLOTS);
        assert!(compute_slot("ключ:üñí") < TOTAL_SLOTS);
    }

    #[test]
    fn test_hash_tag_colocation() {
        assert_eq!(compute_slot("{user}:1"), compute_slot("{user}:2"));
        assert_eq!(compute_slot("a{user}b"), compute_slot("user"));
        assert_eq!(
            compute_slot("user:{1001}:profile"),
            compute_slot("user:{1001}:settings")
        );
    }

    #[test]
    fn test_hash_tag_first_brace_pair_only() {
        assert_eq!(hash_tag("{a}{b}"), Some("a"));
        assert_eq!(hash_tag("x{a{b}y"), Some("a{b"));
    }

    #[test]
    fn test_malformed_tags_hash_whole_key() {
        assert_eq!(hash_tag("{}"), None);
        assert_eq!(hash_tag("{}user"), None);
        assert_eq!(hash_tag("user{"), None);
        assert_eq!(hash_tag("}user{"), None);

        assert_eq!(compute_slot("{}user"), crc16(b"{}user") % TOTAL_SLOTS);
        assert_eq!(compute_slot("user{"), crc16(b"user{") % TOTAL_SLOTS);
        assert_eq!(compute_slot("}a{b"), crc16(b"}a{b") % TOTAL_SLOTS);
    }

    #[test]
    fn test_hash_slot_distribution() {
        let mut slots = std::collections::HashSet::new();
        for i in 0..1000 {
            slots.insert(compute_slot(&format!("key:{}", i)));
        }
        assert!(slots.len() > 100);
    }

    #[test]
    fn test_group_by_shard_preserves_order() {
        let keys = vec!["{a}3", "{b}1", "{a}1", "{b}2", "{a}2"];
        let groups = group_by_shard(keys, |k| *k);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&compute_slot("a")], vec!["{a}3", "{a}1", "{a}2"]);
        assert_eq!(groups[&compute_slot("b")], vec!["{b}1", "{b}2"]);
    }

    #[test]
    fn test_hash_slot_wrapper() {
        let slot = HashSlot::from_key("user:1001");
        assert!(slot.value() < TOTAL_SLOTS);
        assert_eq!(HashSlot::new(5000).map(u16::from), Some(5000));
        assert!(HashSlot::new(TOTAL_SLOTS).is_none());
    }
}
