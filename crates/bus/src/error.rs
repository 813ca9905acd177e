use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("timed out after {timeout:?} waiting for '{event}'")]
    WaitTimeout { event: String, timeout: Duration },

    #[error("wait for '{event}' cancelled before a matching publish")]
    WaitCancelled { event: String },
}
