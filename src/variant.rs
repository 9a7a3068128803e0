//! Per-variant constants (component D): stage addresses, chunk geometry,
//! timing, and handshake trailers. See spec §4.D's constants table and
//! §4.F's per-variant frame/geometry tables.

use crate::identity::Variant;

/// How the erase-ready wait before the first write chunk is performed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EraseWaitPolicy {
    /// Poll `FW_READ_STATUS2` until the status word stabilizes (§4.F).
    StatusPoll,
    /// Wait a fixed duration with no polling (A1: 60s after `FW_HANDSHAKE`).
    FixedDelay(std::time::Duration),
}

/// Which 40-byte write-handshake layout and trailer a variant uses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeLayout {
    /// T31-family layout: offset/size in 64KiB units, 8-byte trailer.
    T31Family,
    /// T41/XBurst2 layout: same field shapes as T31Family but a different trailer.
    T41,
    /// A1 layout: byte-unit offset, fixed 1 MiB chunk size field.
    A1,
}

/// The full set of per-variant constants consulted by the orchestrator and
/// transfer engine.
#[derive(Debug, Copy, Clone)]
pub struct VariantProfile {
    pub variant: Variant,
    pub dram_init_addr: u32,
    pub stage1_addr: u32,
    pub stage2_addr_default: u32,
    pub stage1_exec_length: u32,
    pub post_stage1_wait_ms: u64,
    /// If true, the orchestrator closes and re-opens the device after
    /// stage-1 execution (§4.E step 5).
    pub reenumerates_after_stage1: bool,
    /// If true, `FLUSH_CACHE` is sent before `PROG_STAGE2` (§4.E step 7).
    pub flush_cache_before_stage2: bool,
    pub erase_wait_policy: EraseWaitPolicy,
    pub write_chunk_size: usize,
    pub handshake_layout: HandshakeLayout,
    pub handshake_trailer: [u8; 8],
}

const TRAILER_T31: [u8; 8] = [0x20, 0xFB, 0x00, 0x08, 0xA2, 0x77, 0x00, 0x00];
const TRAILER_T41: [u8; 8] = [0xF0, 0x17, 0x00, 0x44, 0x70, 0x7A, 0x00, 0x00];
const TRAILER_A1: [u8; 8] = [0x30, 0x24, 0x00, 0xD4, 0x02, 0x75, 0x00, 0x00];

const DEFAULT_DRAM_INIT_ADDR: u32 = 0x8000_1000;
const DEFAULT_STAGE1_ADDR: u32 = 0x8000_1800;
const DEFAULT_STAGE2_ADDR: u32 = 0x8010_0000;

impl VariantProfile {
    /// Resolves the per-variant constants table from spec §4.D/§4.F.
    pub fn for_variant(variant: Variant) -> VariantProfile {
        use Variant::*;

        // Variants whose erase-ready column in the §4.D table reads "fixed"
        // (T20 and the generic "Others" row) get a fixed, non-adaptive
        // pre-write wait rather than the T31-family stabilization poller.
        // The spec table names the policy but not a duration; 2000ms
        // mirrors the generic post-stage1 wait and is recorded as an Open
        // Question resolution in DESIGN.md.
        const FIXED_ERASE_WAIT: std::time::Duration = std::time::Duration::from_millis(2000);

        let base = VariantProfile {
            variant,
            dram_init_addr: DEFAULT_DRAM_INIT_ADDR,
            stage1_addr: DEFAULT_STAGE1_ADDR,
            stage2_addr_default: DEFAULT_STAGE2_ADDR,
            stage1_exec_length: 0x7000,
            post_stage1_wait_ms: 2000,
            reenumerates_after_stage1: false,
            flush_cache_before_stage2: true,
            erase_wait_policy: EraseWaitPolicy::FixedDelay(FIXED_ERASE_WAIT),
            write_chunk_size: 128 * 1024,
            handshake_layout: HandshakeLayout::T31Family,
            handshake_trailer: TRAILER_T31,
        };

        match variant {
            T20 => VariantProfile {
                stage1_exec_length: 0x4000,
                post_stage1_wait_ms: 1100,
                erase_wait_policy: EraseWaitPolicy::FixedDelay(FIXED_ERASE_WAIT),
                ..base
            },
            T41 => VariantProfile {
                // XBurst2 / T41N (T41/T41N/X2580): polled post-stage1 wait,
                // re-enumerates, skips the pre-stage-2 cache flush, and
                // uses 64 KiB write chunks with the T41 handshake trailer.
                post_stage1_wait_ms: 0, // polled, see bootstrap::wait_for_stage1
                reenumerates_after_stage1: true,
                flush_cache_before_stage2: false,
                erase_wait_policy: EraseWaitPolicy::StatusPoll,
                write_chunk_size: 64 * 1024,
                handshake_layout: HandshakeLayout::T41,
                handshake_trailer: TRAILER_T41,
                ..base
            },
            T31ZX => VariantProfile {
                reenumerates_after_stage1: true,
                erase_wait_policy: EraseWaitPolicy::StatusPoll,
                handshake_layout: HandshakeLayout::T31Family,
                handshake_trailer: TRAILER_T31,
                ..base
            },
            T31 | T31X => VariantProfile {
                erase_wait_policy: EraseWaitPolicy::StatusPoll,
                ..base
            },
            A1 => VariantProfile {
                write_chunk_size: 1024 * 1024,
                erase_wait_policy: EraseWaitPolicy::FixedDelay(std::time::Duration::from_secs(60)),
                handshake_layout: HandshakeLayout::A1,
                handshake_trailer: TRAILER_A1,
                ..base
            },
            // T21/T23/T30/T40 and the X-series track the generic "Others"
            // row of spec §4.D's table: default addresses, 2000ms
            // post-stage1 wait, 128 KiB T31-family-shaped chunks.
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t31zx_reenumerates_and_uses_t31_trailer() {
        let p = VariantProfile::for_variant(Variant::T31ZX);
        assert!(p.reenumerates_after_stage1);
        assert_eq!(p.handshake_trailer, TRAILER_T31);
        assert_eq!(p.write_chunk_size, 128 * 1024);
    }

    #[test]
    fn t41_uses_64k_chunks_and_skips_flush() {
        let p = VariantProfile::for_variant(Variant::T41);
        assert_eq!(p.write_chunk_size, 64 * 1024);
        assert!(!p.flush_cache_before_stage2);
        assert_eq!(p.handshake_trailer, TRAILER_T41);
    }

    #[test]
    fn a1_uses_1mib_chunks_and_fixed_delay() {
        let p = VariantProfile::for_variant(Variant::A1);
        assert_eq!(p.write_chunk_size, 1024 * 1024);
        assert_eq!(
            p.erase_wait_policy,
            EraseWaitPolicy::FixedDelay(std::time::Duration::from_secs(60))
        );
        assert_eq!(p.handshake_trailer, TRAILER_A1);
    }
}
