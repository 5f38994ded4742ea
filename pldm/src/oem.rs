// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * PLDM OEM payload helpers.
 *
 * Copyright (c) 2025 Code Construct
 */

//! OEM (type 0x3f) payloads are scoped by a manufacturer IANA enterprise
//! number, sent as the first three payload bytes, little-endian.

use crate::{CCode, PldmCommandError};

/// PLDM type code for OEM commands
pub const PLDM_TYPE_OEM: u8 = 0x3f;

/// Length of the IANA prefix
pub const IANA_LEN: usize = 3;

/// A 3-byte IANA enterprise number, in wire order
pub type Iana = [u8; IANA_LEN];

/// Converts an enterprise number to its wire form.
///
/// Returns `None` for numbers that don't fit in three bytes.
pub fn iana_from_u32(n: u32) -> Option<Iana> {
    let b = n.to_le_bytes();
    if b[3] != 0 {
        return None;
    }
    Some([b[0], b[1], b[2]])
}

/// Validates the IANA prefix of `payload`, returning the remainder.
///
/// Short payloads and mismatched identifiers are both invalid data.
pub fn split_iana<'a>(
    payload: &'a [u8],
    iana: &Iana,
) -> Result<&'a [u8], PldmCommandError> {
    match payload.split_first_chunk::<IANA_LEN>() {
        Some((prefix, rest)) if prefix == iana => Ok(rest),
        _ => Err(CCode::ERROR_INVALID_DATA.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const IANA: Iana = [0x15, 0xa0, 0x00];

    #[test]
    fn iana_wire() {
        assert_eq!(iana_from_u32(40981), Some(IANA));
        assert_eq!(iana_from_u32(0x0100_0000), None);
    }

    #[test]
    fn split() {
        assert_eq!(split_iana(&[0x15, 0xa0, 0x00, 0x06], &IANA), Ok(&[0x06][..]));
        assert_eq!(split_iana(&[0x15, 0xa0, 0x00], &IANA), Ok(&[][..]));
    }

    proptest! {
        #[test]
        fn rejects_short_or_foreign(p in proptest::collection::vec(any::<u8>(), 0..8)) {
            let r = split_iana(&p, &IANA);
            if p.len() < IANA_LEN || p[..IANA_LEN] != IANA {
                prop_assert_eq!(r, Err(PldmCommandError(CCode::ERROR_INVALID_DATA as u8)));
            } else {
                prop_assert!(r.is_ok());
            }
        }
    }
}
