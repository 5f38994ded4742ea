// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2024 Code Construct
 */

//! Helper functions

/// Packs a set of small integers into a little-endian bitmap.
///
/// Bit `n` lands in byte `n / 8`, bit position `n % 8`. Values that don't
/// fit in `N` bytes are ignored.
pub fn encode_bitmap<const N: usize>(
    bits: impl IntoIterator<Item = u8>,
) -> [u8; N] {
    let mut map = [0u8; N];
    for b in bits {
        if let Some(byte) = map.get_mut(b as usize / 8) {
            *byte |= 1 << (b % 8);
        }
    }
    map
}

/// Lists the set bits of a bitmap packed by [`encode_bitmap`], ascending.
pub fn decode_bitmap(map: &[u8]) -> Vec<u8> {
    (0..map.len() * 8)
        .filter(|n| map[n / 8] & (1 << (n % 8)) != 0)
        .filter_map(|n| u8::try_from(n).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn types_bitmap() {
        let m: [u8; 8] = encode_bitmap([0, 1, 4]);
        assert_eq!(m[0], 0b0001_0011);
        assert!(m[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_ignored() {
        let m: [u8; 1] = encode_bitmap([3, 8, 200]);
        assert_eq!(m, [0b1000]);
    }

    proptest! {
        #[test]
        fn commands_bitmap(set in proptest::collection::btree_set(any::<u8>(), 0..64)) {
            let m: [u8; 32] = encode_bitmap(set.iter().copied());
            let back: BTreeSet<u8> = decode_bitmap(&m).into_iter().collect();
            prop_assert_eq!(back, set);
        }
    }
}
