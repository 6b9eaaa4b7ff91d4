/// In-process stand-ins for peer networking
///
/// [`MemorySwarm`] implements the swarm seam without a network, so a
/// lifecycle can be opened, replicated from and closed inside a single
/// test.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::MemorySwarm;
///
/// #[tokio::test]
/// async fn test_replicate_in_process() -> anyhow::Result<()> {
///     let swarm = MemorySwarm::new();
///     // hand `SwarmProvider::Custom(swarm.clone())` to the lifecycle
///
///     // Dial it like a remote peer would
///     let mut socket = swarm.connect(SecretKey::generate().public())?;
///     let entries = fetch_entries(&mut socket, drive, 0).await?;
///     Ok(())
/// }
/// ```
mod swarm;

pub use swarm::MemorySwarm;
