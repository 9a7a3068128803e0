//! The 40-byte handshake frame and its CRC32, shared by the flash transfer
//! engine (component F). See spec §4.F.

use crate::variant::HandshakeLayout;

pub const HANDSHAKE_FRAME_LEN: usize = 40;

/// Calculates the CRC32 checksum for the given slice of `bytes`.
///
/// Standard Ethernet CRC32: polynomial `0xEDB88320`, initial value
/// `0xFFFFFFFF`, final XOR `0xFFFFFFFF`. Grounded on the teacher's own
/// `crc32()` in `isp.rs`/`bl/firmware.rs`, which implements the identical
/// bit-reversed algorithm.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;

    for byte in bytes {
        crc ^= *byte as u32;

        for _ in 0..8 {
            if crc & 1 > 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}

/// Builds the 40-byte read-handshake frame (T31-family and T41; the A1
/// read path reuses the same shape since spec §4.F only defines a distinct
/// write layout for A1). Sent as the `FW_WRITE1` control-OUT payload.
///
/// Layout (little-endian):
/// - `[0..8)` zero
/// - `[8..12)` flash offset
/// - `[12..16)` zero
/// - `[16..20)` chunk size
/// - `[20..24)` zero
/// - `[24..28)` constant `{0x00,0x00,0x06,0x00}`
/// - `[28..32)` constant `{0xAF,0x7F,0x00,0x00}`
/// - `[32..40)` zero
pub fn read_handshake_frame(flash_offset: u32, chunk_size: u32) -> [u8; HANDSHAKE_FRAME_LEN] {
    let mut frame = [0u8; HANDSHAKE_FRAME_LEN];

    frame[8..12].copy_from_slice(&flash_offset.to_le_bytes());
    frame[16..20].copy_from_slice(&chunk_size.to_le_bytes());
    frame[24..28].copy_from_slice(&[0x00, 0x00, 0x06, 0x00]);
    frame[28..32].copy_from_slice(&[0xAF, 0x7F, 0x00, 0x00]);

    frame
}

/// Builds the 40-byte write-handshake frame for the given variant layout
/// and trailer, per spec §4.F.
///
/// `chunk_offset` and `chunk_size` are always in bytes; the T31-family and
/// T41 layouts encode them in 64KiB units internally, while A1 encodes the
/// offset in bytes directly.
pub fn write_handshake_frame(
    layout: HandshakeLayout,
    trailer: [u8; 8],
    chunk_offset: u32,
    chunk_size: u32,
    chunk_data: &[u8],
) -> [u8; HANDSHAKE_FRAME_LEN] {
    let mut frame = [0u8; HANDSHAKE_FRAME_LEN];
    let inverted_crc = !crc32(chunk_data);

    match layout {
        HandshakeLayout::T31Family | HandshakeLayout::T41 => {
            let offset_units = (chunk_offset / 65536) as u16;
            let size_units = ((chunk_size as u64 + 65535) / 65536) as u16;

            frame[10..12].copy_from_slice(&offset_units.to_le_bytes());
            frame[18..20].copy_from_slice(&size_units.to_le_bytes());
            frame[24..28].copy_from_slice(&[0x00, 0x00, 0x06, 0x00]);
            frame[28..32].copy_from_slice(&inverted_crc.to_le_bytes());
            frame[32..40].copy_from_slice(&trailer);
        }
        HandshakeLayout::A1 => {
            frame[8..12].copy_from_slice(&[0x00, 0x00, 0x06, 0x00]);
            frame[12..16].copy_from_slice(&chunk_offset.to_le_bytes());
            frame[16..20].copy_from_slice(&chunk_size.to_le_bytes());
            frame[20..24].copy_from_slice(&inverted_crc.to_le_bytes());
            frame[32..40].copy_from_slice(&trailer);
        }
    }

    frame
}

/// Splits a 32-bit address into the `(wValue, wIndex)` pair used by
/// `SET_DATA_ADDR`/`SET_DATA_LEN`/`PROG_STAGE1`/`PROG_STAGE2` (spec §4.C).
pub fn split_address(addr: u32) -> (u16, u16) {
    ((addr >> 16) as u16, (addr & 0xFFFF) as u16)
}

/// Recombines a `(wValue, wIndex)` pair back into a 32-bit address —
/// used by the address-splitting idempotence test (testable property #3).
pub fn join_address(value: u16, index: u16) -> u32 {
    ((value as u32) << 16) | index as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::HandshakeLayout;
    use assert_hex::assert_eq_hex;
    use std::convert::TryInto;

    /// Testable property #1: handshake frame CRC for empty, 1-byte, and
    /// large inputs.
    #[test]
    fn write_frame_encodes_inverted_crc32() {
        for data in [
            Vec::new(),
            vec![0x5A],
            vec![0x5A; 131072],
            vec![0xFF; 1024 * 1024],
        ] {
            let frame = write_handshake_frame(
                HandshakeLayout::T31Family,
                [0u8; 8],
                0,
                data.len() as u32,
                &data,
            );
            let stored = u32::from_le_bytes(frame[28..32].try_into().unwrap());
            assert_eq!(stored, !crc32(&data));
        }
    }

    /// Testable property #2: offset/size encoding for the T31-family write
    /// frame and the read frame.
    #[test]
    fn write_frame_encodes_offset_and_size_in_64kib_units() {
        let frame =
            write_handshake_frame(HandshakeLayout::T31Family, [0u8; 8], 3 * 65536, 2 * 65536, &[]);

        let offset_units = u16::from_le_bytes(frame[10..12].try_into().unwrap());
        let size_units = u16::from_le_bytes(frame[18..20].try_into().unwrap());

        assert_eq!(offset_units, 3);
        assert_eq!(size_units, 2);
    }

    #[test]
    fn read_frame_encodes_offset_and_size_directly() {
        let frame = read_handshake_frame(0x0010_0000, 0x0010_0000);

        let offset = u32::from_le_bytes(frame[8..12].try_into().unwrap());
        let size = u32::from_le_bytes(frame[16..20].try_into().unwrap());

        assert_eq!(offset, 0x0010_0000);
        assert_eq!(size, 0x0010_0000);
    }

    /// Testable property #3: address splitting idempotence.
    #[test]
    fn split_address_round_trips() {
        for addr in [0u32, 0x8000_1000, 0xFFFF_FFFF, 0x0000_8010] {
            let (value, index) = split_address(addr);
            assert_eq!(join_address(value, index), addr);
        }
    }

    #[test]
    fn t31_write_frame_uses_documented_trailer() {
        let trailer = [0x20, 0xFB, 0x00, 0x08, 0xA2, 0x77, 0x00, 0x00];
        let frame = write_handshake_frame(HandshakeLayout::T31Family, trailer, 0, 131072, &[0x5A; 131072]);
        assert_eq_hex!(&frame[32..40], &trailer);
    }

    #[test]
    fn a1_write_frame_uses_byte_offset_and_documented_trailer() {
        let trailer = [0x30, 0x24, 0x00, 0xD4, 0x02, 0x75, 0x00, 0x00];
        let data = vec![0u8; 1024 * 1024];
        let frame = write_handshake_frame(HandshakeLayout::A1, trailer, 0x0010_0000, 0x0010_0000, &data);

        let offset = u32::from_le_bytes(frame[12..16].try_into().unwrap());
        assert_eq!(offset, 0x0010_0000);
        assert_eq_hex!(&frame[32..40], &trailer);
    }
}
