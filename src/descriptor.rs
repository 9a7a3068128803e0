//! Component G — the flash descriptor prelude sent before the first write
//! chunk on T31-family and A1 variants. See spec §4.G.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::identity::Variant;

/// `GBD` magic at offset 0 of the flash descriptor blob.
pub const GBD_MAGIC: u32 = 0x0047_4244;
/// `ILOP` tag magic, present at offset 0x1C in every descriptor and at the
/// head of the 172-byte partition marker.
pub const ILOP_MAGIC: u32 = 0x494C_4F50;
/// Number of partition entries the descriptor reserves room for.
pub const ENTRY_COUNT: u32 = 20;

const PARTITION_MARKER_LEN: usize = 172;
const DESCRIPTOR_LEN_DEFAULT: usize = 972;
const DESCRIPTOR_LEN_A1: usize = 984;
/// Offset of A1's additional "nor" tag, absent from the T31-family layout.
const NOR_TAG_OFFSET: usize = 0xF0;
const NOR_TAG: &[u8; 4] = b"nor\0";

/// Builds the 172-byte partition marker prepended to the descriptor blob on
/// every variant that uses one (§4.G).
pub fn partition_marker() -> [u8; PARTITION_MARKER_LEN] {
    let mut marker = [0u8; PARTITION_MARKER_LEN];
    marker[0..4].copy_from_slice(&ILOP_MAGIC.to_le_bytes());
    marker
}

/// Builds the flash descriptor blob for `variant`: 972 bytes for the
/// T31-family layout, or 984 bytes for A1 (which carries the extra "nor"
/// tag at 0xF0).
pub fn build_descriptor(variant: Variant) -> Vec<u8> {
    let len = if variant == Variant::A1 {
        DESCRIPTOR_LEN_A1
    } else {
        DESCRIPTOR_LEN_DEFAULT
    };

    let mut blob = vec![0u8; len];
    (&mut blob[0..4]).write_u32::<LittleEndian>(GBD_MAGIC).unwrap();
    (&mut blob[0x1C..0x20])
        .write_u32::<LittleEndian>(ILOP_MAGIC)
        .unwrap();
    (&mut blob[0x20..0x24])
        .write_u32::<LittleEndian>(ENTRY_COUNT)
        .unwrap();

    if variant == Variant::A1 {
        blob[NOR_TAG_OFFSET..NOR_TAG_OFFSET + NOR_TAG.len()].copy_from_slice(NOR_TAG);
    }

    blob
}

/// Concatenates the partition marker and the flash descriptor into the
/// single prelude buffer sent as the first write-phase bulk-out (§4.F write
/// sequence, §4.G).
pub fn build_prelude(variant: Variant) -> Vec<u8> {
    let mut prelude = partition_marker().to_vec();
    prelude.extend(build_descriptor(variant));
    prelude
}
