//! Component B — device discovery and open/reopen, over real `rusb` USB
//! context enumeration. See spec §4.B.

use std::time::Duration;

use log::{debug, info};
use rusb::UsbContext;

use crate::error::Error;
use crate::identity::{CpuInfo, DeviceIdentity, RECOGNIZED_PRODUCT_IDS, RECOGNIZED_VENDOR_IDS};
use crate::protocol::VendorProtocol;
use crate::transport::UsbTransport;

const REENUMERATION_TIMEOUT: Duration = Duration::from_secs(10);
const REENUMERATION_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Enumerates the system's USB devices and returns every one whose
/// vendor/product ID pair is recognized (§4.B.1).
pub fn enumerate() -> Result<Vec<DeviceIdentity>, Error> {
    let devices = rusb::devices()?;
    let mut found = Vec::new();

    for device in devices.iter() {
        let descriptor = device.device_descriptor()?;
        let vendor_id = descriptor.vendor_id();
        let product_id = descriptor.product_id();

        if !RECOGNIZED_VENDOR_IDS.contains(&vendor_id) || !RECOGNIZED_PRODUCT_IDS.contains(&product_id)
        {
            continue;
        }

        found.push(DeviceIdentity {
            bus: device.bus_number(),
            address: device.address(),
            vendor_id,
            product_id,
            stage: DeviceIdentity::tentative_stage_from_product_id(product_id),
            variant: Default::default(),
        });
    }

    debug!("enumerate: found {} recognized device(s)", found.len());
    Ok(found)
}

/// A quick re-scan used while waiting for a device to re-enumerate after a
/// stage transition (§4.B.3): returns as soon as any recognized device with
/// a different bus/address than `previous` shows up, or `None` on timeout.
pub fn fast_enumerate(
    previous: Option<(u8, u8)>,
    timeout: Duration,
) -> Result<Option<DeviceIdentity>, Error> {
    let deadline = std::time::Instant::now() + timeout;

    loop {
        let candidates = enumerate()?;
        if let Some(found) = candidates
            .into_iter()
            .find(|d| Some((d.bus, d.address)) != previous)
        {
            return Ok(Some(found));
        }

        if std::time::Instant::now() >= deadline {
            return Ok(None);
        }

        std::thread::sleep(REENUMERATION_POLL_INTERVAL);
    }
}

/// Opens a USB handle for `identity` and probes it with `GET_CPU_INFO`,
/// resolving the authoritative stage and variant (§4.B.2).
pub fn open(identity: &mut DeviceIdentity) -> Result<UsbTransport, Error> {
    let handle = open_raw_handle(identity.bus, identity.address, identity.vendor_id, identity.product_id)?;
    let transport = UsbTransport::new(handle);

    let probe = VendorProtocol::new(&transport, identity.stage);
    match probe.get_cpu_info() {
        Ok(magic) => {
            let cpu_info = CpuInfo::from_raw(&magic);
            identity.stage = cpu_info.stage;
            identity.variant = crate::identity::classify_variant(&cpu_info.magic_clean);
            info!(
                "opened device {}:{} as {:?} ({:?})",
                identity.bus, identity.address, identity.variant, identity.stage
            );
        }
        Err(e) => {
            debug!("GET_CPU_INFO probe failed on open ({}), keeping tentative stage", e);
        }
    }

    Ok(transport)
}

/// Waits for the device to disappear and a new recognized device to appear
/// (a real re-enumeration, not just a handle re-open), then opens it. Used
/// after stage-1 execution on variants where `reenumerates_after_stage1` is
/// set (§4.E step 5).
pub fn reopen(previous: DeviceIdentity) -> Result<(DeviceIdentity, UsbTransport), Error> {
    let found = fast_enumerate(Some((previous.bus, previous.address)), REENUMERATION_TIMEOUT)?
        .ok_or(Error::DeviceNotFound)?;

    let mut identity = found;
    let transport = open(&mut identity)?;
    Ok((identity, transport))
}

fn open_raw_handle(
    bus: u8,
    address: u8,
    vendor_id: u16,
    product_id: u16,
) -> Result<rusb::DeviceHandle<rusb::GlobalContext>, Error> {
    let devices = rusb::devices()?;

    for device in devices.iter() {
        if device.bus_number() != bus || device.address() != address {
            continue;
        }
        let descriptor = device.device_descriptor()?;
        if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
            continue;
        }
        return device
            .open()
            .map_err(|e| Error::OpenFailed(e.to_string()));
    }

    Err(Error::DeviceNotFound)
}
