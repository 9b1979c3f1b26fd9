//! CRC-24 implementation for Mode S messages
//!
//! This module ports the CRC calculation from the original C code.
//! The CRC is computed by XORing precomputed values for each set bit.

use lazy_static::lazy_static;

/// Downlink Formats for which CRC validation/correction is attempted at all.
pub const PERMITTED_DFS: [u8; 10] = [0, 4, 5, 11, 16, 17, 18, 20, 21, 24];

pub fn df_permitted(df: u8) -> bool {
    PERMITTED_DFS.contains(&df)
}

/// Precomputed CRC table for Mode S messages.
/// Each entry corresponds to a bit position in the message.
/// For 112-bit messages, all entries are used.
/// For 56-bit messages, only the last 56 entries are used.
///
/// The last 24 entries are zero because the CRC field itself
/// should not affect the computation.
pub const MODES_CHECKSUM_TABLE: [u32; 112] = [
    0x3935ea, 0x1c9af5, 0xf1b77e, 0x78dbbf, 0xc397db, 0x9e31e9, 0xb0e2f0, 0x587178,
    0x2c38bc, 0x161c5e, 0x0b0e2f, 0xfa7d13, 0x82c48d, 0xbe9842, 0x5f4c21, 0xd05c14,
    0x682e0a, 0x341705, 0xe5f186, 0x72f8c3, 0xc68665, 0x9cb936, 0x4e5c9b, 0xd8d449,
    0x939020, 0x49c810, 0x24e408, 0x127204, 0x093902, 0x049c81, 0xfdb444, 0x7eda22,
    0x3f6d11, 0xe04c8c, 0x702646, 0x381323, 0xe3f395, 0x8e03ce, 0x4701e7, 0xdc7af7,
    0x91c77f, 0xb719bb, 0xa476d9, 0xadc168, 0x56e0b4, 0x2b705a, 0x15b82d, 0xf52612,
    0x7a9309, 0xc2b380, 0x6159c0, 0x30ace0, 0x185670, 0x0c2b38, 0x06159c, 0x030ace,
    0x018567, 0xff38b7, 0x80665f, 0xbfc92b, 0xa01e91, 0xaff54c, 0x57faa6, 0x2bfd53,
    0xea04ad, 0x8af852, 0x457c29, 0xdd4410, 0x6ea208, 0x375104, 0x1ba882, 0x0dd441,
    0xf91024, 0x7c8812, 0x3e4409, 0xe0d800, 0x706c00, 0x383600, 0x1c1b00, 0x0e0d80,
    0x0706c0, 0x038360, 0x01c1b0, 0x00e0d8, 0x00706c, 0x003836, 0x001c1b, 0xfff409,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
];

lazy_static! {
    /// Maps a single flipped bit position (0..112) to the residue it produces
    /// when the message is otherwise all-zero with a correct checksum trailer.
    /// Built once at startup straight from MODES_CHECKSUM_TABLE.
    static ref SINGLE_BIT_TABLE: [u32; 112] = {
        let mut table = [0u32; 112];
        for (j, slot) in table.iter_mut().enumerate() {
            *slot = MODES_CHECKSUM_TABLE[j];
        }
        table
    };

    /// Maps an ordered pair (j < i) of flipped bit positions to the residue
    /// produced by flipping both. DF17/18 long messages only, hence 112 bits
    /// and 112*111/2 pairs.
    static ref TWO_BIT_TABLE: Vec<(u32, usize, usize)> = {
        let mut table = Vec::with_capacity(112 * 111 / 2);
        for j in 0..112 {
            for i in (j + 1)..112 {
                let residue = MODES_CHECKSUM_TABLE[j] ^ MODES_CHECKSUM_TABLE[i];
                table.push((residue, j, i));
            }
        }
        table
    };
}

/// Calculate the Mode S checksum for a message.
///
/// # Arguments
/// * `msg` - The message bytes (must be at least `bits/8` bytes long)
/// * `bits` - Number of bits in the message (56 or 112)
///
/// # Returns
/// The 24-bit CRC value
pub fn modes_checksum(msg: &[u8], bits: usize) -> u32 {
    debug_assert!(bits == 56 || bits == 112);
    debug_assert!(msg.len() >= bits / 8);

    let mut crc: u32 = 0;
    // For 56-bit messages, skip the first 56 entries in the table
    let offset = if bits == 112 { 0 } else { 112 - 56 };

    for j in 0..bits {
        let byte_idx = j / 8;
        let bit_idx = j % 8;
        // Bit 0 is the MSB in Mode S encoding
        let bitmask = 1u8 << (7 - bit_idx);

        if msg[byte_idx] & bitmask != 0 {
            crc ^= MODES_CHECKSUM_TABLE[j + offset];
        }
    }

    crc
}

/// Extract the CRC from a message (last 3 bytes).
pub fn extract_crc(msg: &[u8], bits: usize) -> u32 {
    let len = bits / 8;
    debug_assert!(msg.len() >= len);

    ((msg[len - 3] as u32) << 16) | ((msg[len - 2] as u32) << 8) | (msg[len - 1] as u32)
}

pub fn recover_icao_from_crc(msg: &[u8], bits: usize) -> u32 {
    let crc = modes_checksum(msg, bits);
    let received = extract_crc(msg, bits);
    crc ^ received
}

/// The residue of a message is `modes_checksum(msg) ^ extract_crc(msg)`; for a
/// valid 112-bit message it is zero, and flipping bit `j` XORs it with
/// `MODES_CHECKSUM_TABLE[j]`. This inverts that: given a nonzero residue,
/// find the single bit whose table entry matches it.
fn residue(msg: &[u8], bits: usize) -> u32 {
    modes_checksum(msg, bits) ^ extract_crc(msg, bits)
}

/// Attempt to fix a single-bit error using the precomputed signature table.
///
/// # Returns
/// * `Some(bit_position)` if an error was fixed
/// * `None` if no single-bit fix was possible
pub fn fix_single_bit_errors(msg: &mut [u8], bits: usize) -> Option<usize> {
    let offset = if bits == 112 { 0 } else { 112 - 56 };
    let want = residue(msg, bits);

    for j in 0..bits {
        if SINGLE_BIT_TABLE[j + offset] == want {
            let byte_idx = j / 8;
            let bitmask = 1u8 << (7 - (j % 8));
            msg[byte_idx] ^= bitmask;
            return Some(j);
        }
    }

    None
}

/// Attempt to fix a two-bit error (DF17/18 only) using the precomputed
/// ordered-pair signature table.
///
/// # Returns
/// * `Some((bit1, bit2))` if errors were fixed
/// * `None` if no two-bit fix was possible
pub fn fix_two_bit_errors(msg: &mut [u8], bits: usize) -> Option<(usize, usize)> {
    debug_assert_eq!(bits, 112, "two-bit correction is DF17/18 only");
    let want = residue(msg, bits);

    for &(sig, j, i) in TWO_BIT_TABLE.iter() {
        if sig == want {
            msg[j / 8] ^= 1u8 << (7 - (j % 8));
            msg[i / 8] ^= 1u8 << (7 - (i % 8));
            return Some((j, i));
        }
    }

    None
}

/// Verify CRC of a message.
pub fn verify_crc(msg: &[u8], bits: usize) -> bool {
    let crc_in_msg = extract_crc(msg, bits);
    let computed_crc = modes_checksum(msg, bits);
    crc_in_msg == computed_crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_good() {
        let msg = [0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3,
                   0x71, 0xC3, 0x2C, 0xE0, 0x57, 0x60, 0x98];
        let crc = modes_checksum(&msg, 112);
        let expected = extract_crc(&msg, 112);
        assert_eq!(crc, expected);
    }

    #[test]
    fn test_single_bit_error_correction() {
        let mut msg = [0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3,
                       0x71, 0xC3, 0x2C, 0xE0, 0x57, 0x60, 0x98];
        let original = msg;

        msg[5] ^= 0x04;

        let bit_pos = fix_single_bit_errors(&mut msg, 112);
        assert!(bit_pos.is_some());
        assert_eq!(msg, original);
    }

    #[test]
    fn test_two_bit_error_correction() {
        let mut msg = [0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3,
                       0x71, 0xC3, 0x2C, 0xE0, 0x57, 0x60, 0x98];
        let original = msg;

        msg[5] ^= 0x04;
        msg[8] ^= 0x10;

        assert!(fix_single_bit_errors(&mut msg, 112).is_none());
        let fixed = fix_two_bit_errors(&mut msg, 112);
        assert!(fixed.is_some());
        assert_eq!(msg, original);
    }

    #[test]
    fn test_all_zero_message_crc_is_zero() {
        let msg = [0u8; 14];
        assert_eq!(modes_checksum(&msg, 112), 0);
    }

    #[test]
    fn test_single_bit_table_self_consistency() {
        for j in 0..112usize {
            let mut msg = [0u8; 14];
            msg[j / 8] ^= 1u8 << (7 - (j % 8));
            let want = residue(&msg, 112);
            assert_eq!(want, SINGLE_BIT_TABLE[j]);
        }
    }

    #[test]
    fn test_df_permitted() {
        assert!(df_permitted(17));
        assert!(!df_permitted(15));
    }
}
