//! Shared utility functions.

use tokio::task::{spawn_blocking, JoinError};

/// Run blocking file or git work off the async runtime.
pub async fn blocking<F, T, E>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    spawn_blocking(f).await.map_err(E::from)?
}
