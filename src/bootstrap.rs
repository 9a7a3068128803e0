//! Component E — the bootstrap orchestrator state machine that walks a
//! device from ROM boot through DRAM init, stage1, re-enumeration, stage2,
//! and into the firmware burner. See spec §4.E.

use std::thread;
use std::time::Duration;

use log::info;

use crate::blob::{BlobKind, BlobProvider};
use crate::error::Error;
use crate::identity::{DeviceIdentity, Stage};
use crate::protocol::{accept_complete_timeout, VendorProtocol};
use crate::registry;
use crate::transport::{Transport, UsbTransport, ENDPOINT_BULK_OUT};
use crate::variant::VariantProfile;

/// Where the device sits in the boot sequence (spec §4.E's state diagram).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootstrapState {
    Disconnected,
    RomBoot,
    DramReady,
    Stage1Loaded,
    Stage1Running,
    ReEnumerating,
    Stage2Loaded,
    Stage2Running,
    Firmware,
    Failed,
}

const CHUNK_SIZE: usize = 1024 * 1024;
const CHUNK_RETRIES: usize = 3;
const INTER_CHUNK_PAUSE: Duration = Duration::from_millis(10);
const CHUNK_TIMEOUT_MIN_MS: u64 = 5000;
const CHUNK_TIMEOUT_MAX_MS: u64 = 30000;

/// Drives a single device from whatever state it's currently observed in
/// through to the firmware burner stage. Already being in firmware stage
/// is a no-op success, making the whole walk idempotent (spec §4.E).
pub struct BootstrapPlan<'a> {
    pub profile: VariantProfile,
    blobs: &'a dyn BlobProvider,
    /// Skips the DRAM-init upload entirely (device already has working
    /// DRAM, e.g. a warm re-flash). Spec §3/§4.E step 2.
    skip_dram_init: bool,
    /// Overrides `profile.stage2_addr_default` when set; the override wins
    /// over the variant default per spec §9.
    stage2_address: Option<u32>,
}

impl<'a> BootstrapPlan<'a> {
    pub fn new(
        profile: VariantProfile,
        blobs: &'a dyn BlobProvider,
        skip_dram_init: bool,
        stage2_address: Option<u32>,
    ) -> Self {
        BootstrapPlan {
            profile,
            blobs,
            skip_dram_init,
            stage2_address,
        }
    }

    /// Resolves the stage-2 entry address: the caller-supplied override if
    /// one was given, otherwise the variant's default (spec §9).
    fn stage2_address(&self) -> u32 {
        self.stage2_address.unwrap_or(self.profile.stage2_addr_default)
    }

    /// Runs the full ROM→firmware walk, returning the final device identity
    /// and an open transport once the device reports itself in firmware
    /// stage. If `identity` is already in firmware stage this returns
    /// immediately without touching the device (idempotence).
    ///
    /// Bound to [`UsbTransport`] rather than the generic [`Transport`]
    /// trait because the re-enumeration step (§4.E step 5) must close and
    /// physically reopen a libusb handle; the per-stage upload helpers
    /// below stay generic for unit testing against mock transports.
    pub fn ensure_firmware_stage(
        &self,
        mut identity: DeviceIdentity,
        transport: UsbTransport,
    ) -> Result<(DeviceIdentity, UsbTransport), Error> {
        if identity.stage == Stage::Firmware {
            info!("device already in firmware stage, skipping bootstrap");
            return Ok((identity, transport));
        }

        let mut state = BootstrapState::RomBoot;
        let mut current_transport = transport;

        loop {
            state = match state {
                BootstrapState::RomBoot => {
                    if !self.skip_dram_init {
                        self.init_dram(&current_transport)?;
                    }
                    BootstrapState::DramReady
                }
                BootstrapState::DramReady => {
                    self.upload_stage1(&current_transport)?;
                    BootstrapState::Stage1Loaded
                }
                BootstrapState::Stage1Loaded => {
                    self.exec_stage1(&current_transport)?;
                    BootstrapState::Stage1Running
                }
                BootstrapState::Stage1Running => {
                    if self.profile.reenumerates_after_stage1 {
                        BootstrapState::ReEnumerating
                    } else {
                        thread::sleep(Duration::from_millis(self.profile.post_stage1_wait_ms));
                        BootstrapState::Stage2Loaded
                    }
                }
                BootstrapState::ReEnumerating => {
                    let (new_identity, new_transport) = registry::reopen(identity.clone())?;
                    identity = new_identity;
                    current_transport = new_transport;
                    BootstrapState::Stage2Loaded
                }
                BootstrapState::Stage2Loaded => {
                    self.upload_stage2(&current_transport)?;
                    BootstrapState::Stage2Running
                }
                BootstrapState::Stage2Running => {
                    self.exec_stage2(&current_transport)?;
                    BootstrapState::Firmware
                }
                BootstrapState::Firmware => {
                    identity.stage = Stage::Firmware;
                    info!(
                        "bootstrap reached firmware stage for {:?}",
                        self.profile.variant
                    );
                    return Ok((identity, current_transport));
                }
                BootstrapState::Disconnected | BootstrapState::Failed => {
                    return Err(Error::DeviceNotFound);
                }
            };
        }
    }

    fn init_dram<T: Transport>(&self, transport: &T) -> Result<(), Error> {
        let protocol = VendorProtocol::new(transport, Stage::RomBoot);
        let blob = self.blobs.blob(self.profile.variant, BlobKind::DramInit)?;
        protocol.set_data_addr(self.profile.dram_init_addr)?;
        upload_chunked(transport, blob)?;
        protocol.flush_cache().ok();
        Ok(())
    }

    fn upload_stage1<T: Transport>(&self, transport: &T) -> Result<(), Error> {
        let protocol = VendorProtocol::new(transport, Stage::RomBoot);
        let blob = self.blobs.blob(self.profile.variant, BlobKind::Stage1)?;
        protocol.set_data_addr(self.profile.stage1_addr)?;
        protocol.set_data_len(blob.len() as u32)?;
        upload_chunked(transport, blob)?;
        Ok(())
    }

    fn exec_stage1<T: Transport>(&self, transport: &T) -> Result<(), Error> {
        let protocol = VendorProtocol::new(transport, Stage::RomBoot);
        protocol.set_data_len(self.profile.stage1_exec_length)?;
        protocol.prog_stage1(self.profile.stage1_addr)
    }

    fn upload_stage2<T: Transport>(&self, transport: &T) -> Result<(), Error> {
        let protocol = VendorProtocol::new(transport, Stage::RomBoot);
        let blob = self.blobs.blob(self.profile.variant, BlobKind::Stage2)?;
        protocol.set_data_addr(self.stage2_address())?;
        protocol.set_data_len(blob.len() as u32)?;
        upload_chunked(transport, blob)?;
        Ok(())
    }

    fn exec_stage2<T: Transport>(&self, transport: &T) -> Result<(), Error> {
        let protocol = VendorProtocol::new(transport, Stage::RomBoot);
        if self.profile.flush_cache_before_stage2 {
            protocol.flush_cache().ok();
        }
        protocol.prog_stage2(self.stage2_address())
    }
}

/// Uploads `data` over the bulk-OUT endpoint in `CHUNK_SIZE` pieces, with
/// the size-scaled timeout and 3-retry policy from spec §4.E's upload
/// sub-procedure.
fn upload_chunked<T: Transport>(transport: &T, data: &[u8]) -> Result<(), Error> {
    for chunk in data.chunks(CHUNK_SIZE) {
        let timeout = chunk_timeout(chunk.len());

        let mut attempt = 0;
        loop {
            match accept_complete_timeout(
                transport.bulk_out(ENDPOINT_BULK_OUT, chunk, timeout),
                chunk.len(),
            ) {
                Ok(_) => break,
                Err(e) if attempt + 1 < CHUNK_RETRIES => {
                    attempt += 1;
                    thread::sleep(Duration::from_millis(100));
                    let _ = e;
                }
                Err(e) => return Err(e),
            }
        }

        thread::sleep(INTER_CHUNK_PAUSE);
    }

    Ok(())
}

/// `clamp(5000 + floor(bytes / 65536) * 1000, 5000, 30000)` milliseconds.
fn chunk_timeout(bytes: usize) -> Duration {
    let scaled = CHUNK_TIMEOUT_MIN_MS + (bytes as u64 / 65536) * 1000;
    Duration::from_millis(scaled.clamp(CHUNK_TIMEOUT_MIN_MS, CHUNK_TIMEOUT_MAX_MS))
}
