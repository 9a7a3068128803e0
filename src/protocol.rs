//! Component C — the vendor protocol. Encodes the request catalog from
//! spec §4.C over a [`Transport`], applying the documented per-request
//! timeout and retry policy.

use std::convert::TryFrom;
use std::thread;
use std::time::Duration;

use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::Error;
use crate::identity::Stage;
use crate::transport::{RequestType, Transport};

/// Single-byte vendor request codes (spec §4.C table).
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Request {
    GetCpuInfo = 0x00,
    SetDataAddr = 0x01,
    SetDataLen = 0x02,
    FlushCache = 0x03,
    ProgStage1 = 0x04,
    ProgStage2 = 0x05,
    NandOps = 0x07,
    FwRead = 0x10,
    FwHandshake = 0x11,
    VrWrite = 0x12,
    FwWrite1 = 0x13,
    FwWrite2 = 0x14,
    FwReadStatus1 = 0x16,
    FwReadStatus2 = 0x19,
    FwReadStatus3 = 0x25,
    FwReadStatus4 = 0x26,
}

impl Request {
    /// Recovers a `Request` from a raw wire byte, for logging/diagnostics
    /// when a caller only has the numeric code (e.g. from a captured USB
    /// trace being replayed).
    pub fn from_byte(byte: u8) -> Option<Request> {
        Request::try_from(byte).ok()
    }
}

/// NAND sub-operation selector used by `NAND_OPS`'s `wValue` (out of scope
/// per spec §9 Open Question — kept only so the request table is complete).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum NandOp {
    Read = 0x05,
    Write = 0x06,
}

const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_millis(5000);
const ADDR_LEN_PROG_TIMEOUT: Duration = Duration::from_millis(12000);
const CPU_INFO_TIMEOUT: Duration = Duration::from_millis(1500);
const CPU_INFO_QUICK_TIMEOUT: Duration = Duration::from_millis(50);

const RETRY_BACKOFF_MS: [u64; 5] = [500, 1000, 2000, 3000, 5000];
const MAX_RETRIES: usize = 5;

/// Applies the "timeout but complete" quirk (spec §4.A/§7): a transfer that
/// reports a timeout after moving exactly the number of bytes that were
/// requested is treated as a successful transfer of that length rather
/// than a failure. Shared by the control-retry loop here and the bulk
/// transfer call sites in `transfer` and `bootstrap`.
pub fn accept_complete_timeout(result: Result<usize, Error>, requested_len: usize) -> Result<usize, Error> {
    match result {
        Err(Error::Timeout { bytes_transferred }) if bytes_transferred == requested_len => {
            debug!(
                "timeout reported after moving all {} requested bytes, treating as success",
                requested_len
            );
            Ok(bytes_transferred)
        }
        other => other,
    }
}

/// The driver for a single open device: wraps a [`Transport`] and applies
/// the retry/timeout/quirk rules from spec §4.C and §7. Tracks `stage` so
/// the firmware-stage timeout-as-success quirks can be applied.
pub struct VendorProtocol<'t, T: Transport> {
    transport: &'t T,
    pub stage: Stage,
}

impl<'t, T: Transport> VendorProtocol<'t, T> {
    pub fn new(transport: &'t T, stage: Stage) -> Self {
        VendorProtocol { transport, stage }
    }

    /// Issues a vendor control transfer with the full retry/back-off/
    /// fallback policy from spec §4.C, for commands sent with the device
    /// recipient and no special timeout-as-success treatment.
    fn control_with_retry(
        &self,
        direction_in: bool,
        request: Request,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
        allow_interface_fallback: bool,
    ) -> Result<usize, Error> {
        let base_request_type = if direction_in {
            RequestType::VendorIn
        } else {
            RequestType::VendorOut
        };

        let requested_len = buffer.len();
        let mut attempt = 0usize;
        loop {
            let result = self.transport.control(
                base_request_type,
                request as u8,
                value,
                index,
                buffer,
                timeout,
            );
            let result = accept_complete_timeout(result, requested_len);

            let error = match result {
                Ok(n) => return Ok(n),
                Err(e) => e,
            };

            if !error.is_recoverable() {
                return Err(error);
            }

            if allow_interface_fallback {
                if let Some(fallback) = base_request_type.as_interface_fallback() {
                    debug!(
                        "request {:?} failed on device recipient ({}), retrying once on interface recipient",
                        request, error
                    );
                    if let Ok(n) =
                        self.transport
                            .control(fallback, request as u8, value, index, buffer, timeout)
                    {
                        return Ok(n);
                    }
                }
            }

            self.retry_or_fail(&mut attempt, request, error)?;
        }
    }

    /// Applies the back-off table; sleeps and returns `Ok(())` to let the
    /// caller retry, or bubbles the error once `MAX_RETRIES` is exceeded.
    fn retry_or_fail(
        &self,
        attempt: &mut usize,
        request: Request,
        last_error: Error,
    ) -> Result<(), Error> {
        if *attempt >= MAX_RETRIES {
            return Err(last_error);
        }

        let delay = RETRY_BACKOFF_MS[*attempt];
        debug!(
            "request {:?} failed ({}), retrying in {}ms (attempt {}/{})",
            request,
            last_error,
            delay,
            *attempt + 1,
            MAX_RETRIES
        );
        *attempt += 1;
        thread::sleep(Duration::from_millis(delay));
        Ok(())
    }

    /// `GET_CPU_INFO` (0x00, IN). Requests 16 bytes but accepts as few as
    /// 8; returns the raw magic bytes actually received.
    pub fn get_cpu_info(&self) -> Result<Vec<u8>, Error> {
        let mut buf = [0u8; 16];
        let n = self.control_with_retry(
            true,
            Request::GetCpuInfo,
            0,
            0,
            &mut buf,
            CPU_INFO_TIMEOUT,
            true,
        )?;

        if n < 8 {
            return Err(Error::ProtocolViolation(format!(
                "GET_CPU_INFO returned {} bytes, expected >= 8",
                n
            )));
        }

        Ok(buf[..n].to_vec())
    }

    /// A fast, short-timeout `GET_CPU_INFO` used for polling during
    /// stage-1 bring-up (spec §4.E step 4).
    pub fn get_cpu_info_quick(&self) -> Result<Vec<u8>, Error> {
        let mut buf = [0u8; 16];
        let n = self.transport.control(
            RequestType::VendorIn,
            Request::GetCpuInfo as u8,
            0,
            0,
            &mut buf,
            CPU_INFO_QUICK_TIMEOUT,
        )?;

        if n < 8 {
            return Err(Error::ProtocolViolation(format!(
                "GET_CPU_INFO (quick) returned {} bytes, expected >= 8",
                n
            )));
        }

        Ok(buf[..n].to_vec())
    }

    /// `SET_DATA_ADDR(a)` — splits `a` into `wValue = a >> 16`,
    /// `wIndex = a & 0xFFFF`. Firmware-stage timeouts are swallowed as
    /// success (chip-erase in progress, spec §4.C/§7).
    pub fn set_data_addr(&self, addr: u32) -> Result<(), Error> {
        let (value, index) = crate::flash::split_address(addr);
        let result = self.control_with_retry(
            false,
            Request::SetDataAddr,
            value,
            index,
            &mut [],
            ADDR_LEN_PROG_TIMEOUT,
            true,
        );

        self.handle_firmware_stage_timeout_quirk(Request::SetDataAddr, result)?;
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// `SET_DATA_LEN(n)` — same address split, encodes a 32-bit length.
    pub fn set_data_len(&self, len: u32) -> Result<(), Error> {
        let (value, index) = crate::flash::split_address(len);
        self.control_with_retry(
            false,
            Request::SetDataLen,
            value,
            index,
            &mut [],
            ADDR_LEN_PROG_TIMEOUT,
            true,
        )?;
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// `FLUSH_CACHE` — no payload. Failures are tolerated by callers per
    /// spec §4.E step 8 / §4.F whole-image write step 6.
    pub fn flush_cache(&self) -> Result<(), Error> {
        self.control_with_retry(
            false,
            Request::FlushCache,
            0,
            0,
            &mut [],
            DEFAULT_CONTROL_TIMEOUT,
            false,
        )?;
        Ok(())
    }

    /// `PROG_STAGE1(a)` — executes the uploaded stage-1 image at `a`.
    pub fn prog_stage1(&self, addr: u32) -> Result<(), Error> {
        let (value, index) = crate::flash::split_address(addr);
        self.control_with_retry(
            false,
            Request::ProgStage1,
            value,
            index,
            &mut [],
            ADDR_LEN_PROG_TIMEOUT,
            true,
        )?;
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// `PROG_STAGE2(a)` — jumps to the stage-2 entry point. A timeout or
    /// pipe error is reported as success because the device is expected to
    /// disconnect after the jump (spec §4.C/§7).
    pub fn prog_stage2(&self, addr: u32) -> Result<(), Error> {
        let (value, index) = crate::flash::split_address(addr);
        let result = self.control_with_retry(
            false,
            Request::ProgStage2,
            value,
            index,
            &mut [],
            ADDR_LEN_PROG_TIMEOUT,
            true,
        );

        match result {
            Ok(_) => {}
            Err(Error::Timeout { .. }) | Err(Error::Usb(rusb::Error::Pipe)) => {
                debug!("PROG_STAGE2 disconnected as expected, treating as success");
            }
            Err(e) => return Err(e),
        }

        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// `FW_HANDSHAKE` (0x11, OUT) — enters burner read/write mode.
    pub fn fw_handshake(&self) -> Result<(), Error> {
        self.control_with_retry(
            false,
            Request::FwHandshake,
            0,
            0,
            &mut [],
            DEFAULT_CONTROL_TIMEOUT,
            false,
        )?;
        Ok(())
    }

    /// Sends a pre-built 40-byte handshake frame as a control-OUT using
    /// `request`. `VR_WRITE` timeouts in firmware stage are swallowed as
    /// success (burner accepted the frame and is processing the bulk-out).
    pub fn send_handshake_frame(
        &self,
        request: Request,
        frame: &[u8; crate::flash::HANDSHAKE_FRAME_LEN],
    ) -> Result<(), Error> {
        let mut buf = *frame;
        let result = self.control_with_retry(
            false,
            request,
            0,
            0,
            &mut buf,
            DEFAULT_CONTROL_TIMEOUT,
            false,
        );

        if request == Request::VrWrite {
            self.handle_firmware_stage_timeout_quirk(request, result)?;
        } else {
            result?;
        }

        Ok(())
    }

    /// `FW_READ` (0x10, IN) — 4-byte status read. Transport errors are
    /// non-fatal per spec §4.F read-chunk and write-chunk protocols.
    pub fn fw_read(&self) -> Result<[u8; 4], Error> {
        let mut buf = [0u8; 4];
        match self.control_with_retry(
            true,
            Request::FwRead,
            0,
            0,
            &mut buf,
            Duration::from_millis(1000),
            false,
        ) {
            Ok(_) => Ok(buf),
            Err(e) => {
                debug!("FW_READ failed (tolerated): {}", e);
                Ok(buf)
            }
        }
    }

    /// Reads one of the `FW_READ_STATUS{1,2,3,4}` words. `len` is 4 or 8
    /// per spec §4.C.
    pub fn fw_read_status(&self, request: Request, len: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; len];
        let n = self.control_with_retry(
            true,
            request,
            0,
            0,
            &mut buf,
            DEFAULT_CONTROL_TIMEOUT,
            false,
        )?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Applies the firmware-stage timeout-as-success quirk (spec §4.C/§7)
    /// shared by `SET_DATA_ADDR` and `VR_WRITE`.
    fn handle_firmware_stage_timeout_quirk(
        &self,
        request: Request,
        result: Result<usize, Error>,
    ) -> Result<(), Error> {
        match result {
            Ok(_) => Ok(()),
            Err(Error::Timeout { .. }) if self.stage == Stage::Firmware => {
                debug!(
                    "{:?} timed out in firmware stage, treating as success",
                    request
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock::{MockTransport, ScriptedReply};

    /// Testable property #5: retry table — N timeouts then success.
    #[test]
    fn retries_up_to_five_times_then_succeeds() {
        for n in 0..5 {
            let mock = MockTransport::new();
            mock.push_control_script(
                Request::FlushCache as u8,
                (0..n)
                    .map(|_| ScriptedReply::Timeout)
                    .chain(std::iter::once(ScriptedReply::Ok(0)))
                    .collect(),
            );

            let protocol = VendorProtocol::new(&mock, Stage::RomBoot);
            assert!(protocol.flush_cache().is_ok());
        }
    }

    #[test]
    fn fails_after_five_timeouts() {
        let mock = MockTransport::new();
        mock.push_control_script(
            Request::FlushCache as u8,
            (0..6).map(|_| ScriptedReply::Timeout).collect(),
        );

        let protocol = VendorProtocol::new(&mock, Stage::RomBoot);
        assert!(protocol.flush_cache().is_err());
    }

    /// Testable property #7: firmware-stage VR_WRITE timeout is success.
    #[test]
    fn vr_write_timeout_in_firmware_stage_is_success() {
        let mock = MockTransport::new();
        mock.push_control_script(Request::VrWrite as u8, vec![ScriptedReply::Timeout; 6]);

        let protocol = VendorProtocol::new(&mock, Stage::Firmware);
        let frame = [0u8; crate::flash::HANDSHAKE_FRAME_LEN];
        assert!(protocol
            .send_handshake_frame(Request::VrWrite, &frame)
            .is_ok());
    }

    /// Testable property #8: PROG_STAGE2 disconnect (Pipe) is success.
    #[test]
    fn prog_stage2_pipe_error_is_success() {
        let mock = MockTransport::new();
        mock.push_control_script(Request::ProgStage2 as u8, vec![ScriptedReply::Pipe; 6]);

        let protocol = VendorProtocol::new(&mock, Stage::RomBoot);
        assert!(protocol.prog_stage2(0x8010_0000).is_ok());
    }

    /// Testable property #6 / scenario S6: a control transfer that times
    /// out after moving exactly the requested number of bytes is treated
    /// as a success, with no retry consumed.
    #[test]
    fn control_timeout_with_full_byte_count_is_success() {
        let mock = MockTransport::new();
        let frame = [0u8; crate::flash::HANDSHAKE_FRAME_LEN];
        mock.push_control_script(
            Request::VrWrite as u8,
            vec![ScriptedReply::TimeoutBytes(frame.len())],
        );

        let protocol = VendorProtocol::new(&mock, Stage::RomBoot);
        assert!(protocol
            .send_handshake_frame(Request::VrWrite, &frame)
            .is_ok());
    }

    #[test]
    fn set_data_addr_succeeds_immediately() {
        let mock = MockTransport::new();
        mock.push_control_script(Request::SetDataAddr as u8, vec![ScriptedReply::Ok(0)]);
        let protocol = VendorProtocol::new(&mock, Stage::RomBoot);
        assert!(protocol.set_data_addr(0x8000_1000).is_ok());
    }

    #[test]
    fn request_round_trips_through_its_wire_byte() {
        assert_eq!(Request::from_byte(0x19), Some(Request::FwReadStatus2));
        assert_eq!(Request::from_byte(0xFE), None);
    }
}
