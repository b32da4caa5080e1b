//! # quorumvault
//!
//! secret store whose root key only exists after a quorum of independent
//! share holders hand their shares back to the store.
//!
//! ## architecture
//!
//! ```text
//!   client ──mtls──▶ proxy ──identity header──▶ ┌──────────────┐
//!                                               │ secret store │
//!                                               │  policy gate │
//!                                               │  chacha20    │
//!                                               └──────┬───────┘
//!                                                      │ root key
//!                                               ┌──────┴───────┐
//!                                               │  recovery    │
//!                                               │ coordinator  │
//!                                               └──┬───┬───┬───┘
//!                                                  │   │   │   (T of N)
//!                                                ┌─┴┐┌─┴┐┌─┴┐
//!                                                │H1││H2││H3│  share holders
//!                                                └──┘└──┘└──┘
//! ```
//!
//! ## security properties
//!
//! - root key split with shamir over gf(256); fewer than T shares reveal nothing
//! - holders never see each other's shares and never combine
//! - every share carries a checksum, and a hash tag of the key is split along
//!   with it, so corrupted or forged shares are detected before the key is
//!   installed
//! - records are aead ciphertext bound to their path
//! - access is denied unless some policy grants it
//!
//! ## usage
//!
//! ```rust,ignore
//! use quorumvault::{vss, store::{RootKey, SecretStore}};
//!
//! let key = RootKey::generate();
//! let shares = vss::split(key.as_bytes(), 3, 5)?;
//! // ... hand shares[i] to holder i ...
//!
//! let recovered = vss::combine(&shares[1..4], 3)?;
//! let store = SecretStore::in_memory();
//! store.unseal(RootKey::from_slice(&recovered)?)?;
//! ```

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod holder;
pub mod identity;
pub mod policy;
pub mod recovery;
pub mod share;
pub mod store;
pub mod vss;

#[cfg(feature = "network")]
pub mod client;
#[cfg(feature = "network")]
pub mod network;

pub use error::{Error, Result};
pub use identity::Identity;
pub use share::Share;
