//! Core types shared by every OCapN crate in this workspace.
//!
//! This crate defines the network location model, the signed self-identity a
//! peer presents during session establishment, and client configuration. It
//! contains no protocol logic.

pub mod config;
pub mod error;
pub mod identity;
pub mod location;
pub mod serde_compat;

pub use config::ClientConfig;
pub use error::{IdentityError, IdentityResult};
pub use identity::{
    KeyPair, LocationSignature, PublicKey, PublicKeyDescriptor, PublicKeyId, SelfIdentity,
    SessionId,
};
pub use location::{Location, LocationId, SwissNum};
