mod cli;

use std::fs;
use std::time::Duration;

use anyhow::{bail, Context};
use structopt::StructOpt;

use xburst_flash::identity::Stage;
use xburst_flash::protocol::VendorProtocol;
use xburst_flash::registry;
use xburst_flash::transfer;
use xburst_flash::transport::UsbTransport;
use xburst_flash::variant::VariantProfile;

use cli::{Command, FlashCommand, Opts};

/// Enumerates recognized devices and opens the first one found, waiting up
/// to `timeout` for one to appear. Demonstrative only: the full bootstrap
/// walk (ROM -> firmware) needs caller-supplied stage blobs, which this
/// binary doesn't source — it only drives devices already in firmware
/// stage. See `bootstrap::BootstrapPlan` for the full walk.
fn open_first_device(timeout: Duration) -> Result<(xburst_flash::identity::DeviceIdentity, UsbTransport), anyhow::Error> {
    let deadline = std::time::Instant::now() + timeout;

    loop {
        let candidates = registry::enumerate().context("failed to enumerate USB devices")?;
        if let Some(mut identity) = candidates.into_iter().next() {
            let transport = registry::open(&mut identity).context("failed to open device")?;
            return Ok((identity, transport));
        }

        if std::time::Instant::now() >= deadline {
            bail!("no recognized device found within {:?}", timeout);
        }

        std::thread::sleep(Duration::from_millis(200));
    }
}

fn main() -> Result<(), anyhow::Error> {
    pretty_env_logger::init();

    let opts = Opts::from_args();
    let timeout = Duration::from_secs(opts.timeout_secs);

    let (identity, transport) = open_first_device(timeout)?;

    match opts.command {
        Command::Info => {
            println!(
                "bus {} address {}: {:?} stage, variant {:?}",
                identity.bus, identity.address, identity.stage, identity.variant
            );
        }
        Command::Flash(flash_command) => {
            if identity.stage != Stage::Firmware {
                bail!(
                    "device is in {:?} stage, not firmware; run the bootstrap walk first",
                    identity.stage
                );
            }

            let profile = VariantProfile::for_variant(identity.variant);
            let protocol = VendorProtocol::new(&transport, identity.stage);

            match flash_command {
                FlashCommand::Read { size, filename } => {
                    let mut buffer = vec![0u8; size as usize];
                    transfer::read_image(&transport, &protocol, &mut buffer)
                        .context("flash read failed")?;
                    fs::write(&filename, &buffer)
                        .with_context(|| format!("failed to write {}", filename.display()))?;
                    println!("read {} bytes to {}", buffer.len(), filename.display());
                }
                FlashCommand::Write { filename } => {
                    let image = fs::read(&filename)
                        .with_context(|| format!("failed to read {}", filename.display()))?;
                    transfer::write_image(&transport, &protocol, &profile, &image)
                        .context("flash write failed")?;
                    println!("wrote {} bytes from {}", image.len(), filename.display());
                }
            }
        }
    }

    Ok(())
}
