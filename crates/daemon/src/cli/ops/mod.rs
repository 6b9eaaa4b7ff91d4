pub mod publish;
pub mod rm;
pub mod serve;

pub use publish::Publish;
pub use rm::Rm;
pub use serve::Serve;

use drivecast::lifecycle::{LifecycleError, Orchestrator};

/// Wait for the drive to open and print its key, so the same drive can
///  be reopened with `--key`. A failed open is closed out before returning.
async fn announce_ready(orchestrator: &Orchestrator) -> Result<(), LifecycleError> {
    match orchestrator.ready().await {
        Ok(identity) => {
            println!("{}", identity);
            Ok(())
        }
        Err(e) => {
            orchestrator.close().await;
            Err(e)
        }
    }
}
