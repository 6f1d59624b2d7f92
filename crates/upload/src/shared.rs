//! Optional process-wide engine instance.
//!
//! Nothing in the engine reads this; it exists for front ends that want a
//! single [`TransferSession`] reachable from anywhere.

use std::sync::{Arc, OnceLock};

use crate::session::TransferSession;

static SHARED: OnceLock<Arc<TransferSession>> = OnceLock::new();

/// Installs the shared engine. Fails with the rejected engine if one is
/// already installed.
pub fn install(engine: Arc<TransferSession>) -> Result<(), Arc<TransferSession>> {
    SHARED.set(engine)
}

/// Returns the shared engine, if installed.
pub fn get() -> Option<Arc<TransferSession>> {
    SHARED.get().cloned()
}
