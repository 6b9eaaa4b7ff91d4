mod corestore;
mod drive;
mod file_log;
mod key;
mod log;

pub use corestore::{Corestore, CorestoreError, Storage};
pub use drive::{Drive, DriveError, Entry, ListOptions};
pub use file_log::FileLog;
pub use key::StoreKey;
pub use log::{LogEntry, LogError, LogOp, LogStorage, MemoryLog, MAX_ENTRY_SIZE};
