use crate::domain::lead_directory::LeadDirectory;
use std::sync::{Arc, RwLock};

/// Shared holder of the current lead directory snapshot.
///
/// Snapshots are swapped whole; a reader holding an `Arc` keeps seeing the
/// directory it started with.
#[derive(Debug, Default)]
pub struct LeadDirectoryCache {
    snapshot: RwLock<Arc<LeadDirectory>>,
}

impl LeadDirectoryCache {
    pub fn snapshot(&self) -> Arc<LeadDirectory> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn replace(&self, directory: LeadDirectory) {
        let next = Arc::new(directory);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
