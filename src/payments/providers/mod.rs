pub mod marzpay;
pub mod sandbox;

pub use marzpay::{MarzPayConfig, MarzPayProvider};
pub use sandbox::{SandboxProvider, SandboxReply};
