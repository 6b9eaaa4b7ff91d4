//! Identity keys for drivecast
//!
//! Every drive is named by the public half of an Ed25519 keypair. The
//! secret half is what makes a drive writable: log entries are signed with
//! it, and peers replicating the drive verify each entry against the
//! public key.
//!
//! Callers hand us drive keys in whatever shape they have them (hex from a
//! command line, raw bytes from another program). [`KeyInput`] captures
//! that shape and is normalized exactly once into a [`DriveIdentity`].

mod keys;

pub use ed25519_dalek::Signature;
pub use keys::{DriveIdentity, KeyError, KeyInput, PublicKey, SecretKey};
pub use keys::{PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
