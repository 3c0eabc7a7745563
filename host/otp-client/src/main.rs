// Licensed under the Apache-2.0 license

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use core::time::Duration;
use image_format::{KeySlot, OtpSegment, RevocationEntry};
use log::{info, warn, LevelFilter};
use otp_client::serial::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use otp_client::{
    ProvisioningClient, SerialConfig, SerialTransport, Transport, DEFAULT_BLOCK_SIZE,
};
use provisioning_common::config_script::{ConfigEntry, SecureBootFlags};
use provisioning_common::message::OTP_KEY_LEN;
use simple_logger::SimpleLogger;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "otp-tool", version, about = "Provision OTP keys, OTP configuration and flash over UART", long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct PortArgs {
    /// Serial port the board's provisioning UART is on
    #[arg(short, long)]
    uart: String,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Response timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,
}

impl PortArgs {
    fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.uart.clone(),
            baud_rate: self.baud,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a single key from an OTP key segment
    OtpReadKey {
        #[command(flatten)]
        port: PortArgs,
        /// OTP segment: signature, data or qspi
        #[arg(short, long)]
        segment: OtpSegment,
        /// Key slot index (0-7)
        #[arg(short, long)]
        index: KeySlot,
    },

    /// Write a single 32-byte key file to an OTP key segment
    OtpWriteKey {
        #[command(flatten)]
        port: PortArgs,
        #[arg(short, long)]
        segment: OtpSegment,
        #[arg(short, long)]
        index: KeySlot,
        /// Raw key file; only its first 32 bytes are written
        infile: PathBuf,
    },

    /// Read the OTP configuration script area into a file
    OtpReadConfig {
        #[command(flatten)]
        port: PortArgs,
        outfile: PathBuf,
    },

    /// Append a register write to the OTP configuration script
    OtpAppendRegister {
        #[command(flatten)]
        port: PortArgs,
        /// Register address, hexadecimal
        #[arg(short, long, value_parser = parse_hex)]
        address: u32,
        /// Register value, hexadecimal
        #[arg(long, value_parser = parse_hex)]
        value: u32,
    },

    /// Append trim values to the OTP configuration script
    OtpAppendTrim {
        #[command(flatten)]
        port: PortArgs,
        /// Trim value id
        #[arg(short, long)]
        index: u8,
        /// Trim value, hexadecimal. Repeatable
        #[arg(short, long = "trim", value_parser = parse_hex, required = true)]
        trims: Vec<u32>,
    },

    /// Append a key revocation to the OTP configuration script
    OtpAppendRevocation {
        #[command(flatten)]
        port: PortArgs,
        /// Key to revoke as <type>:<slot>
        entry: RevocationEntry,
    },

    /// Disable development mode
    DisableDevelopmentMode {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Enable secure boot
    EnableSecureBoot {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Write lock OTP QSPI key area
    DisableQspiKeyWrite {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Read lock OTP QSPI key area
    DisableQspiKeyRead {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Write lock OTP user key area
    DisableUserKeyWrite {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Read lock OTP user key area
    DisableUserKeyRead {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Write lock OTP signature key area
    DisableSignatureKeyWrite {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Disable CMAC debugger
    DisableCmacDebugger {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Disable SWD debugger
    DisableSwdDebugger {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Close out the OTP configuration script
    CloseConfigScript {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Initialize a blank OTP configuration script
    InitConfigScript {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Read flash into a file
    FlashRead {
        #[command(flatten)]
        port: PortArgs,
        /// Flash address, hexadecimal
        #[arg(short, long, value_parser = parse_hex)]
        address: u32,
        /// Number of bytes to read
        #[arg(short, long, value_parser = maybe_hex::<u32>)]
        length: u32,
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        outfile: PathBuf,
    },

    /// Write a file to flash
    FlashWrite {
        #[command(flatten)]
        port: PortArgs,
        /// Flash address, hexadecimal
        #[arg(short, long, value_parser = parse_hex)]
        address: u32,
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        infile: PathBuf,
    },

    /// Erase a flash range
    FlashErase {
        #[command(flatten)]
        port: PortArgs,
        /// Flash address, hexadecimal
        #[arg(short, long, value_parser = parse_hex)]
        address: u32,
        /// Number of bytes to erase
        #[arg(short, long, value_parser = maybe_hex::<u32>)]
        length: u32,
    },
}

/// Hexadecimal number with or without a `0x` prefix.
fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("'{}' is not a hexadecimal value: {}", s, e))
}

/// A validated command, ready to run once its input files are loaded and
/// the port is open.
#[derive(Debug, Clone, PartialEq)]
enum Operation {
    ReadKey {
        segment: OtpSegment,
        slot: KeySlot,
    },
    WriteKey {
        segment: OtpSegment,
        slot: KeySlot,
        infile: PathBuf,
    },
    ReadConfig {
        outfile: PathBuf,
    },
    AppendConfig(ConfigEntry),
    InitConfig,
    FlashRead {
        address: u32,
        length: u32,
        block_size: usize,
        outfile: PathBuf,
    },
    FlashWrite {
        address: u32,
        block_size: usize,
        infile: PathBuf,
    },
    FlashErase {
        address: u32,
        length: u32,
    },
}

#[derive(Debug)]
struct Plan {
    serial: SerialConfig,
    operation: Operation,
}

fn secure_boot(port: PortArgs, flags: SecureBootFlags) -> (PortArgs, Operation) {
    (port, Operation::AppendConfig(ConfigEntry::SecureBoot(flags)))
}

/// Turns the parsed command line into a plan without touching files or ports.
fn plan(command: Commands) -> Result<Plan> {
    let (port, operation) = match command {
        Commands::OtpReadKey {
            port,
            segment,
            index,
        } => (
            port,
            Operation::ReadKey {
                segment,
                slot: index,
            },
        ),
        Commands::OtpWriteKey {
            port,
            segment,
            index,
            infile,
        } => (
            port,
            Operation::WriteKey {
                segment,
                slot: index,
                infile,
            },
        ),
        Commands::OtpReadConfig { port, outfile } => (port, Operation::ReadConfig { outfile }),
        Commands::OtpAppendRegister {
            port,
            address,
            value,
        } => (
            port,
            Operation::AppendConfig(ConfigEntry::Register { address, value }),
        ),
        Commands::OtpAppendTrim { port, index, trims } => (
            port,
            Operation::AppendConfig(ConfigEntry::Trim {
                id: index,
                values: trims,
            }),
        ),
        Commands::OtpAppendRevocation { port, entry } => {
            (port, Operation::AppendConfig(ConfigEntry::Revocation(entry)))
        }
        Commands::DisableDevelopmentMode { port } => {
            (port, Operation::AppendConfig(ConfigEntry::DisableDevelopmentMode))
        }
        Commands::EnableSecureBoot { port } => {
            secure_boot(port, SecureBootFlags::ENABLE_SECURE_BOOT)
        }
        Commands::DisableQspiKeyWrite { port } => {
            secure_boot(port, SecureBootFlags::LOCK_QSPI_KEY_WRITE)
        }
        Commands::DisableQspiKeyRead { port } => {
            secure_boot(port, SecureBootFlags::LOCK_QSPI_KEY_READ)
        }
        Commands::DisableUserKeyWrite { port } => {
            secure_boot(port, SecureBootFlags::LOCK_USER_KEY_WRITE)
        }
        Commands::DisableUserKeyRead { port } => {
            secure_boot(port, SecureBootFlags::LOCK_USER_KEY_READ)
        }
        Commands::DisableSignatureKeyWrite { port } => {
            secure_boot(port, SecureBootFlags::LOCK_SIGNATURE_KEY_WRITE)
        }
        Commands::DisableCmacDebugger { port } => {
            secure_boot(port, SecureBootFlags::DISABLE_CMAC_DEBUGGER)
        }
        Commands::DisableSwdDebugger { port } => {
            secure_boot(port, SecureBootFlags::DISABLE_SWD_DEBUGGER)
        }
        Commands::CloseConfigScript { port } => {
            (port, Operation::AppendConfig(ConfigEntry::EndOfScript))
        }
        Commands::InitConfigScript { port } => (port, Operation::InitConfig),
        Commands::FlashRead {
            port,
            address,
            length,
            block_size,
            outfile,
        } => (
            port,
            Operation::FlashRead {
                address,
                length,
                block_size,
                outfile,
            },
        ),
        Commands::FlashWrite {
            port,
            address,
            block_size,
            infile,
        } => (
            port,
            Operation::FlashWrite {
                address,
                block_size,
                infile,
            },
        ),
        Commands::FlashErase {
            port,
            address,
            length,
        } => (port, Operation::FlashErase { address, length }),
    };

    match &operation {
        Operation::AppendConfig(entry) => {
            entry.words()?;
        }
        Operation::FlashRead { block_size, .. } | Operation::FlashWrite { block_size, .. }
            if *block_size == 0 =>
        {
            bail!("Block size must be greater than zero");
        }
        _ => {}
    }
    Ok(Plan {
        serial: port.serial_config(),
        operation,
    })
}

/// OTP location of the key a revocation entry invalidates.
fn revocation_target(entry: &RevocationEntry) -> String {
    format!("{:?} segment slot {}", entry.key_type.segment(), entry.slot)
}

/// Input file contents an operation sends to the device.
enum Input {
    None,
    Key([u8; OTP_KEY_LEN]),
    Data(Vec<u8>),
}

fn load_input(operation: &Operation) -> Result<Input> {
    match operation {
        Operation::WriteKey { infile, .. } => {
            let bytes = std::fs::read(infile)
                .map_err(|e| anyhow!("Unable to read key from {}: {}", infile.display(), e))?;
            let key: [u8; OTP_KEY_LEN] = bytes
                .get(..OTP_KEY_LEN)
                .and_then(|key| key.try_into().ok())
                .ok_or_else(|| {
                    anyhow!(
                        "Key file {} is {} bytes, expected at least {}",
                        infile.display(),
                        bytes.len(),
                        OTP_KEY_LEN
                    )
                })?;
            if bytes.len() > OTP_KEY_LEN {
                warn!(
                    "Key file {} is {} bytes, using the first {}",
                    infile.display(),
                    bytes.len(),
                    OTP_KEY_LEN
                );
            }
            Ok(Input::Key(key))
        }
        Operation::FlashWrite { infile, .. } => {
            let data = std::fs::read(infile)
                .map_err(|e| anyhow!("Unable to read {}: {}", infile.display(), e))?;
            Ok(Input::Data(data))
        }
        _ => Ok(Input::None),
    }
}

fn execute<T: Transport>(
    mut client: ProvisioningClient<T>,
    operation: Operation,
    input: Input,
) -> Result<()> {
    match (operation, input) {
        (Operation::ReadKey { segment, slot }, _) => {
            let key = client.read_key(segment, slot)?;
            println!("key:{}", hex::encode(key));
        }
        (Operation::WriteKey { segment, slot, .. }, Input::Key(key)) => {
            client.write_key(segment, slot, &key)?;
        }
        (Operation::ReadConfig { outfile }, _) => {
            let data = client.read_config()?;
            std::fs::write(&outfile, data)
                .map_err(|e| anyhow!("Unable to write {}: {}", outfile.display(), e))?;
            info!("Wrote configuration script to {}", outfile.display());
        }
        (Operation::AppendConfig(entry), _) => {
            if let ConfigEntry::Revocation(revocation) = &entry {
                info!("Revoking key in {}", revocation_target(revocation));
            }
            client.append_config(&entry)?;
        }
        (Operation::InitConfig, _) => {
            client.init_config()?;
        }
        (
            Operation::FlashRead {
                address,
                length,
                block_size,
                outfile,
            },
            _,
        ) => {
            client = client.with_block_size(block_size)?;
            let read = client.flash_read(address, length as usize)?;
            std::fs::write(&outfile, &read.data)
                .map_err(|e| anyhow!("Unable to write {}: {}", outfile.display(), e))?;
            info!("Wrote flash contents to {}", outfile.display());
        }
        (
            Operation::FlashWrite {
                address,
                block_size,
                ..
            },
            Input::Data(data),
        ) => {
            client = client.with_block_size(block_size)?;
            client.flash_write(address, &data)?;
        }
        (Operation::FlashErase { address, length }, _) => {
            client.flash_erase(address, length)?;
        }
        (operation, _) => bail!("No input loaded for {:?}", operation),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let plan = plan(cli.command)?;
    let input = load_input(&plan.operation)?;
    let timeout = plan.serial.timeout;
    let transport = SerialTransport::open(plan.serial)?;
    execute(
        ProvisioningClient::new(transport, timeout),
        plan.operation,
        input,
    )
}
