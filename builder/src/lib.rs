// Licensed under the Apache-2.0 license

pub mod crypto;
mod error;
mod image;
pub mod keys;
mod product_header;
mod verify;

pub use crypto::{AesKey, ProtectedPayload, SecureBootKeys};
pub use error::ImageError;
pub use image::{build_image, FirmwareImage, ImageConfig};
pub use product_header::ProductHeaderConfig;
pub use verify::{verify_image, VerificationReport};
