/**
 * Identity keys.
 *  - Public and secret ed25519 keys naming drives
 *    and peers
 *  - Normalization of caller supplied drive keys
 */
pub mod crypto;
/**
 * Peer plumbing.
 *  The swarm seam, an iroh backed swarm, and the
 *  replication protocol spoken over every inbound
 *  peer connection.
 */
pub mod peer;
/**
 * Storage layer implementation.
 *  An append-only log per drive, a key/value view
 *  over it, and the corestore that owns them all.
 */
pub mod store;
/**
 * In-process stand-ins for the network, for tests.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::crypto::{DriveIdentity, KeyInput, PublicKey, SecretKey};
    pub use crate::peer::{PeerConnection, PeerSocket, Swarm, SwarmProvider};
    pub use crate::store::{Corestore, Drive, Entry, ListOptions, Storage, StoreKey};
}
