// Licensed under the Apache-2.0 license

//! Wire records and configuration-script encoding shared by the OTP
//! provisioning client and its tests.

pub mod codec;
pub mod config_script;
pub mod message;

pub use codec::{CodecError, WireCodec};
