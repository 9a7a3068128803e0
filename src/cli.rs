use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Probe a connected device and print its stage and variant
    Info,
    /// Read or write the external flash
    Flash(FlashCommand),
}

#[derive(StructOpt, Debug)]
pub enum FlashCommand {
    /// Read flash contents to a file
    Read {
        /// Number of bytes to read (must be a multiple of 1 MiB)
        #[structopt(required = true)]
        size: u32,
        /// The name of the file to save the contents to
        #[structopt(required = true, default_value = "flash.bin")]
        filename: PathBuf,
    },
    /// Write a firmware image to flash
    Write {
        /// The name of the file to read the image from
        #[structopt(required = true)]
        filename: PathBuf,
    },
}

#[derive(StructOpt, Debug)]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// Maximum time to wait for a device to appear, in seconds
    #[structopt(short = "t", long = "timeout", default_value = "30")]
    pub timeout_secs: u64,
}
