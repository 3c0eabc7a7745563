// Licensed under the Apache-2.0 license

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use image_builder::keys::{generate_keys, load_aes_key, load_signing_key, load_verifying_key};
use image_builder::{
    build_image, verify_image, ImageConfig, ImageError, ProductHeaderConfig, SecureBootKeys,
};
use image_format::{encode_version, KeySlot, RevocationEntry};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mkimage", version, about = "Build and check secure-boot firmware images", long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a flashable image from a raw firmware binary
    Create(CreateArgs),

    /// Parse an image and check its CRCs, and optionally its signature and encryption
    Verify {
        /// Image to check
        image: PathBuf,

        /// Ed25519 public key used to check the signature
        #[arg(long)]
        verifying_key: Option<PathBuf>,

        /// AES-128 key used to decrypt the payload and check its nonce
        #[arg(long)]
        aes_key: Option<PathBuf>,

        /// Write the decrypted payload here
        #[arg(long, requires = "aes_key")]
        decrypted_output: Option<PathBuf>,
    },

    /// Write a random AES key and Ed25519 key pair for development boards
    GenerateKeys {
        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct CreateArgs {
    /// Raw firmware binary
    input: PathBuf,

    /// Output image
    output: PathBuf,

    /// AES-128 key file; encrypts the payload
    #[arg(long)]
    aes_key: Option<PathBuf>,

    /// Ed25519 private key file; signs the image
    #[arg(long)]
    signing_key: Option<PathBuf>,

    /// OTP slot of the public key the device checks the signature with
    #[arg(long, default_value = "0")]
    signature_slot: KeySlot,

    /// OTP slot of the key the device decrypts the payload with
    #[arg(long, default_value = "0")]
    decryption_slot: KeySlot,

    /// Key to revoke, as <type>:<slot> with type one of signature, user, qspi. Repeatable
    #[arg(long = "revoke", value_name = "TYPE:SLOT")]
    revocations: Vec<RevocationEntry>,

    /// Version string stored in the firmware header (at most 15 bytes)
    #[arg(long, default_value = "")]
    image_version: String,

    /// Build timestamp in seconds since the epoch; defaults to now
    #[arg(long)]
    timestamp: Option<u32>,

    /// TOML file overriding the product header values
    #[arg(long)]
    product_header: Option<PathBuf>,
}

/// Checks a `create` invocation before any file is touched.
fn validate(args: &CreateArgs) -> Result<(), ImageError> {
    encode_version(&args.image_version)?;
    match (&args.aes_key, &args.signing_key) {
        (Some(_), None) => return Err(ImageError::MissingSigningKey),
        (None, Some(_)) => return Err(ImageError::MissingEncryptionKey),
        _ => {}
    }
    Ok(())
}

fn create(args: CreateArgs) -> Result<()> {
    validate(&args)?;

    let keys = SecureBootKeys::pair(
        args.aes_key.as_deref().map(load_aes_key).transpose()?,
        args.signing_key.as_deref().map(load_signing_key).transpose()?,
        args.signature_slot,
        args.decryption_slot,
    )?;
    let product_header = match &args.product_header {
        Some(path) => ProductHeaderConfig::load(path)?,
        None => ProductHeaderConfig::default(),
    };
    let timestamp = match args.timestamp {
        Some(timestamp) => timestamp,
        None => u32::try_from(chrono::Utc::now().timestamp())
            .map_err(|_| anyhow!("Current time does not fit in a 32-bit timestamp"))?,
    };
    let payload = std::fs::read(&args.input)
        .map_err(|e| anyhow!("Unable to read {}: {}", args.input.display(), e))?;

    let config = ImageConfig {
        version: args.image_version,
        timestamp,
        product_header,
        keys,
        revocations: args.revocations,
    };
    let image = build_image(&payload, &config)?;
    image.write_to_file(&args.output)?;
    info!("Wrote {} bytes to {}", image.len(), args.output.display());
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

    match cli.command {
        Commands::Create(args) => create(args),
        Commands::Verify {
            image,
            verifying_key,
            aes_key,
            decrypted_output,
        } => {
            let verifying_key = verifying_key.as_deref().map(load_verifying_key).transpose()?;
            let aes_key = aes_key.as_deref().map(load_aes_key).transpose()?;
            let bytes = std::fs::read(&image)
                .map_err(|e| anyhow!("Unable to read {}: {}", image.display(), e))?;
            let report = verify_image(&bytes, verifying_key.as_ref(), aes_key.as_ref())?;
            for entry in &report.revocations {
                info!("Revokes {}", entry);
            }
            if let (Some(path), Some(plaintext)) = (decrypted_output, &report.plaintext) {
                std::fs::write(&path, plaintext)
                    .map_err(|e| anyhow!("Unable to write {}: {}", path.display(), e))?;
            }
            Ok(())
        }
        Commands::GenerateKeys { out_dir } => generate_keys(&out_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_format::KeyError;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("mkimage").chain(args.iter().copied()))
    }

    fn create_args(args: &[&str]) -> CreateArgs {
        match parse(args).unwrap().command {
            Commands::Create(args) => args,
            _ => panic!("not a create command"),
        }
    }

    #[test]
    fn test_parse_create() {
        let args = create_args(&[
            "create",
            "fw.bin",
            "image.img",
            "--aes-key",
            "aes.key",
            "--signing-key",
            "ed25519.key",
            "--signature-slot",
            "3",
            "--revoke",
            "signature:1",
            "--revoke",
            "qspi:7",
            "--image-version",
            "1.2.3",
        ]);
        assert_eq!(args.signature_slot.index(), 3);
        assert_eq!(args.decryption_slot.index(), 0);
        assert_eq!(args.revocations.len(), 2);
        assert!(validate(&args).is_ok());
    }

    #[test]
    fn test_slot_out_of_range_rejected_by_parser() {
        assert!(parse(&["create", "a", "b", "--signature-slot", "8"]).is_err());
        assert!(parse(&["create", "a", "b", "--revoke", "user:9"]).is_err());
        assert!(parse(&["create", "a", "b", "--revoke", "user"]).is_err());
    }

    #[test]
    fn test_validate_key_pairing() {
        let args = create_args(&["create", "a", "b", "--aes-key", "k"]);
        assert_eq!(validate(&args), Err(ImageError::MissingSigningKey));
        let args = create_args(&["create", "a", "b", "--signing-key", "k"]);
        assert_eq!(validate(&args), Err(ImageError::MissingEncryptionKey));
        // non-secure images still carry an administration section
        let args = create_args(&["create", "a", "b", "--revoke", "sig:0"]);
        assert_eq!(validate(&args), Ok(()));
    }

    #[test]
    fn test_validate_version_before_io() {
        // neither input nor key files exist; validation still fails on the version first
        let args = create_args(&[
            "create",
            "/nonexistent/fw.bin",
            "/nonexistent/out.img",
            "--image-version",
            "this-version-is-too-long",
        ]);
        assert!(matches!(validate(&args), Err(ImageError::Layout(_))));
        assert!(create(args).is_err());
    }

    #[test]
    fn test_slot_parse_error_message() {
        assert_eq!(
            "9".parse::<KeySlot>(),
            Err(KeyError::SlotOutOfRange(9))
        );
    }
}
