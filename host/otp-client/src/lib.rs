// Licensed under the Apache-2.0 license

//! Host side of the boot loader provisioning protocol: OTP key and
//! configuration script programming, and flash access over a serial link.

pub mod client;
pub mod serial;
pub mod transport;

pub use client::{
    FlashRead, ProvisionError, ProvisioningClient, DEFAULT_BLOCK_SIZE, MAX_RESPONSE_LEN,
};
pub use serial::{SerialConfig, SerialTransport};
pub use transport::{Transport, TransportError};
