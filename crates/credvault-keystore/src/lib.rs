//! Concrete key provisioning and cipher implementations.
//! AES-256-GCM bound to key material provisioned at a configured filesystem
//! path, plus the lazily-initialized handle application code holds.

pub mod cipher;
pub mod keystore;
pub mod shared;
