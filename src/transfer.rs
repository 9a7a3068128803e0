//! Component F — the flash transfer engine: chunked reads, chunked writes,
//! erase-ready polling, and the whole-image sequences built on top of them.
//! See spec §4.F.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::descriptor::build_prelude;
use crate::error::Error;
use crate::flash::{read_handshake_frame, write_handshake_frame, HANDSHAKE_FRAME_LEN};
use crate::identity::Stage;
use crate::protocol::{accept_complete_timeout, Request, VendorProtocol};
use crate::transport::{Transport, ENDPOINT_BULK_IN, ENDPOINT_BULK_OUT};
use crate::variant::{EraseWaitPolicy, VariantProfile};

/// Number of 1 MiB banks the whole-image read sequence partitions flash
/// into (spec §4.F whole-image read).
pub const READ_BANK_COUNT: usize = 16;
pub const READ_BANK_SIZE: usize = 1024 * 1024;

const ERASE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ERASE_MIN_WAIT: Duration = Duration::from_secs(5);
const ERASE_HARD_CAP: Duration = Duration::from_secs(60);
const ERASE_STABLE_READS_REQUIRED: usize = 3;

const HANDSHAKE_SETTLE: Duration = Duration::from_millis(50);
const POST_WRITE_SETTLE: Duration = Duration::from_millis(100);
const LOG_DRAIN_SETTLE: Duration = Duration::from_millis(300);
const LOG_DRAIN_TRIES: usize = 16;
const LOG_DRAIN_INTERVAL: Duration = Duration::from_millis(5);
const WRITE_CHUNK_TIMEOUT: Duration = Duration::from_secs(6);
const T41_PRE_WRITE_LEN: u32 = 65536;

/// Reads one chunk starting at `offset` of length `chunk_data.len()` into
/// `chunk_data`, following spec §4.F's read-chunk protocol: read-handshake
/// via `FW_WRITE1`, a tolerated `FW_READ_STATUS2` probe, the bulk-IN
/// itself (timeout scaled by chunk size), then a tolerated `FW_READ`.
pub fn read_chunk<T: Transport>(
    transport: &T,
    protocol: &VendorProtocol<'_, T>,
    offset: u32,
    chunk_data: &mut [u8],
) -> Result<(), Error> {
    let frame = read_handshake_frame(offset, chunk_data.len() as u32);
    protocol.send_handshake_frame(Request::FwWrite1, &frame)?;
    thread::sleep(HANDSHAKE_SETTLE);

    if let Err(e) = protocol.fw_read_status(Request::FwReadStatus2, 8) {
        debug!("FW_READ_STATUS2 probe failed (tolerated): {}", e);
    }
    thread::sleep(HANDSHAKE_SETTLE);

    let bulk_timeout = read_bulk_timeout(chunk_data.len());
    let mut received = 0;
    while received < chunk_data.len() {
        let remaining = chunk_data.len() - received;
        let n = accept_complete_timeout(
            transport.bulk_in(ENDPOINT_BULK_IN, &mut chunk_data[received..], bulk_timeout),
            remaining,
        )?;
        if n == 0 {
            return Err(Error::ProtocolViolation(
                "device returned zero bytes mid read-chunk".into(),
            ));
        }
        received += n;
    }

    protocol.fw_read().ok();

    Ok(())
}

/// `clamp(5000 + floor(size / 65536) * 1000, 5000, 60000)` milliseconds,
/// the read-chunk bulk-IN timeout from spec §4.F.
fn read_bulk_timeout(size: usize) -> Duration {
    let scaled = 5000 + (size as u64 / 65536) * 1000;
    Duration::from_millis(scaled.clamp(5000, 60000))
}

/// Writes one chunk of `chunk_data` at `chunk_offset`, following the
/// per-variant write-chunk protocol from spec §4.F: `VR_WRITE` handshake,
/// bulk-OUT, settle sleeps, an extra tolerated `FW_READ` for T41, and a
/// brief bulk-IN drain to absorb burner log traffic.
pub fn write_chunk<T: Transport>(
    transport: &T,
    protocol: &VendorProtocol<'_, T>,
    profile: &VariantProfile,
    chunk_offset: u32,
    chunk_data: &[u8],
) -> Result<(), Error> {
    let frame: [u8; HANDSHAKE_FRAME_LEN] = write_handshake_frame(
        profile.handshake_layout,
        profile.handshake_trailer,
        chunk_offset,
        chunk_data.len() as u32,
        chunk_data,
    );

    protocol.send_handshake_frame(Request::VrWrite, &frame)?;
    thread::sleep(HANDSHAKE_SETTLE);

    accept_complete_timeout(
        transport.bulk_out(ENDPOINT_BULK_OUT, chunk_data, WRITE_CHUNK_TIMEOUT),
        chunk_data.len(),
    )?;
    thread::sleep(POST_WRITE_SETTLE);

    if profile.handshake_layout == crate::variant::HandshakeLayout::T41 {
        protocol.fw_read().ok();
    }

    drain_log_traffic(transport);
    thread::sleep(LOG_DRAIN_SETTLE);

    Ok(())
}

/// Briefly drains any burner log traffic the device pushed onto the
/// bulk-IN endpoint between chunks (spec §4.F write-chunk protocol step 4).
fn drain_log_traffic<T: Transport>(transport: &T) {
    let mut sink = [0u8; 64];
    for _ in 0..LOG_DRAIN_TRIES {
        match transport.bulk_in(ENDPOINT_BULK_IN, &mut sink, LOG_DRAIN_INTERVAL) {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

/// Waits for the device to report the flash erase as complete before the
/// first write chunk is sent, per spec §4.F: always waits at least
/// `ERASE_MIN_WAIT`, then either polls `FW_READ_STATUS2` until the status
/// word has been stable for `ERASE_STABLE_READS_REQUIRED` consecutive
/// reads, or (A1) just sleeps the variant's fixed delay. Hard-capped at
/// `ERASE_HARD_CAP` regardless of policy.
pub fn wait_erase_ready<T: Transport>(
    protocol: &VendorProtocol<'_, T>,
    policy: EraseWaitPolicy,
) -> Result<(), Error> {
    thread::sleep(ERASE_MIN_WAIT);

    match policy {
        EraseWaitPolicy::FixedDelay(d) => {
            let remaining = d.saturating_sub(ERASE_MIN_WAIT);
            thread::sleep(remaining.min(ERASE_HARD_CAP.saturating_sub(ERASE_MIN_WAIT)));
            Ok(())
        }
        EraseWaitPolicy::StatusPoll => {
            let deadline = Instant::now() + ERASE_HARD_CAP;
            let mut last_status: Option<Vec<u8>> = None;
            let mut stable_count = 0;

            loop {
                let status = protocol.fw_read_status(Request::FwReadStatus2, 4)?;

                match &last_status {
                    Some(prev) if *prev == status => stable_count += 1,
                    _ => stable_count = 1,
                }
                last_status = Some(status);

                if stable_count >= ERASE_STABLE_READS_REQUIRED {
                    debug!("erase-ready status stabilized after {} polls", stable_count);
                    return Ok(());
                }

                if Instant::now() >= deadline {
                    debug!("erase-ready poll hit hard cap without stabilizing, proceeding anyway");
                    return Ok(());
                }

                thread::sleep(ERASE_POLL_INTERVAL);
            }
        }
    }
}

/// Reads the entire flash image, bank by bank, into `out` — `out.len()`
/// must be a multiple of [`READ_BANK_SIZE`] and no larger than
/// `READ_BANK_COUNT * READ_BANK_SIZE` (spec §4.F whole-image read).
pub fn read_image<T: Transport>(
    transport: &T,
    protocol: &VendorProtocol<'_, T>,
    out: &mut [u8],
) -> Result<(), Error> {
    if out.len() % READ_BANK_SIZE != 0 {
        return Err(Error::BadParameter(format!(
            "read buffer length {} is not a multiple of the {} byte bank size",
            out.len(),
            READ_BANK_SIZE
        )));
    }

    for (bank_index, bank) in out.chunks_mut(READ_BANK_SIZE).enumerate() {
        let offset = (bank_index * READ_BANK_SIZE) as u32;
        info!("reading bank {} at offset {:#010x}", bank_index, offset);
        read_chunk(transport, protocol, offset, bank)?;
    }

    Ok(())
}

/// Writes `image` to flash starting at offset 0, chunked per
/// `profile.write_chunk_size`, preceded by the variant's descriptor
/// prelude and the erase-ready wait, and followed by a final
/// `FLUSH_CACHE` (spec §4.F whole-image write).
pub fn write_image<T: Transport>(
    transport: &T,
    protocol: &VendorProtocol<'_, T>,
    profile: &VariantProfile,
    image: &[u8],
) -> Result<(), Error> {
    use crate::variant::HandshakeLayout;

    let prelude = build_prelude(profile.variant);

    if profile.handshake_layout == HandshakeLayout::T41 {
        // T41 sends its partition marker and descriptor as discrete
        // bulk-OUTs bracketed by status reads, rather than through the
        // ordinary write-chunk handshake (spec §4.F whole-image write
        // step 1).
        protocol.fw_read_status(Request::FwReadStatus4, 4).ok();
        accept_complete_timeout(
            transport.bulk_out(ENDPOINT_BULK_OUT, &prelude, WRITE_CHUNK_TIMEOUT),
            prelude.len(),
        )?;
        protocol.fw_read().ok();
        protocol.fw_handshake()?;
        protocol.fw_read().ok();
    } else {
        // Sent as a plain bulk-OUT, not through write_chunk's VR_WRITE
        // handshake framing — the prelude has no per-chunk handshake of
        // its own (spec §4.F whole-image write step 2).
        accept_complete_timeout(
            transport.bulk_out(ENDPOINT_BULK_OUT, &prelude, WRITE_CHUNK_TIMEOUT),
            prelude.len(),
        )?;
        protocol.fw_handshake()?;
    }

    protocol.set_data_addr(0x0000_8010)?;
    wait_erase_ready(protocol, profile.erase_wait_policy)?;

    let set_len = if profile.handshake_layout == HandshakeLayout::T41 {
        T41_PRE_WRITE_LEN
    } else {
        image.len() as u32
    };
    protocol.set_data_len(set_len)?;

    let mut offset = 0u32;
    for chunk in image.chunks(profile.write_chunk_size) {
        write_chunk(transport, protocol, profile, offset, chunk)?;
        offset += chunk.len() as u32;
    }

    protocol.flush_cache().ok();

    info!("wrote {} bytes to flash ({:?})", image.len(), profile.variant);
    Ok(())
}
