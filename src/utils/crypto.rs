use crate::utils::types::Id;

/// Bit mask selecting the low `ring_bits` bits of an identifier.
pub fn ring_mask(ring_bits: u32) -> Id {
    if ring_bits >= Id::BITS {
        Id::MAX
    } else {
        (1u64 << ring_bits) - 1
    }
}

/// Hashes arbitrary bytes onto the m-bit identifier circle.
///
/// The digest is truncated to the leading word and reduced mod 2^m, so the
/// same byte string always lands on the same ring position regardless of
/// the configured width.
pub fn hash(bytes: &[u8], ring_bits: u32) -> Id {
    let digest = blake3::hash(bytes);
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(word) & ring_mask(ring_bits)
}

/// Tests whether `x` lies on the clockwise arc from `start` to `end`.
///
/// The arc is open at `start` and open or closed at `end` per `include_end`.
/// When `start >= end` the arc wraps through zero; for `start == end` the
/// exclusive arc is the whole circle minus `start` itself.
pub fn in_range(x: Id, start: Id, end: Id, include_end: bool) -> bool {
    if start < end {
        if include_end {
            x > start && x <= end
        } else {
            x > start && x < end
        }
    } else if include_end {
        x > start || x <= end
    } else {
        x > start || x < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stays_on_ring() {
        for key in ["127.0.0.1:5000", "username", "", "a b c"] {
            let id = hash(key.as_bytes(), 8);
            assert!(id < 256, "{key:?} hashed to {id}, outside the 8-bit ring");
        }
        assert_eq!(
            hash(b"127.0.0.1:5000", 8),
            hash(b"127.0.0.1:5000", 8),
            "hashing must be deterministic"
        );
    }

    #[test]
    fn test_hash_respects_width() {
        let wide = hash(b"some key", 16);
        assert!(wide < 1 << 16);
        let full = hash(b"some key", 64);
        assert_eq!(full & ring_mask(64), full);
    }

    #[test]
    fn test_in_range_plain_arc() {
        assert!(in_range(5, 3, 8, false));
        assert!(!in_range(3, 3, 8, false));
        assert!(!in_range(8, 3, 8, false));
        assert!(in_range(8, 3, 8, true));
        assert!(!in_range(9, 3, 8, true));
    }

    #[test]
    fn test_in_range_wrapping_arc() {
        // Arc from 250 through 0 to 5 on an 8-bit ring.
        assert!(in_range(253, 250, 5, false));
        assert!(in_range(0, 250, 5, false));
        assert!(in_range(4, 250, 5, false));
        assert!(!in_range(5, 250, 5, false));
        assert!(in_range(5, 250, 5, true));
        assert!(!in_range(100, 250, 5, true));
    }

    #[test]
    fn test_in_range_degenerate_arc() {
        // start == end spans the whole circle except the start point.
        assert!(in_range(7, 42, 42, false));
        assert!(!in_range(42, 42, 42, false));
        assert!(in_range(42, 42, 42, true));
    }
}
