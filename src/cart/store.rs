use super::Cart;
use crate::errors::ServiceError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Persistence boundary for buyer carts.
///
/// Implementations store whole snapshots; there is no partial update.
#[async_trait]
pub trait CartStore: Send + Sync + 'static {
    /// Returns the saved cart, or an empty one if nothing was stored.
    async fn load(&self, user_id: Uuid) -> Result<Cart, ServiceError>;
    async fn save(&self, user_id: Uuid, cart: &Cart) -> Result<(), ServiceError>;
    async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError>;
}

/// Process-local carts; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCartStore {
    carts: DashMap<Uuid, Cart>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn load(&self, user_id: Uuid) -> Result<Cart, ServiceError> {
        Ok(self
            .carts
            .get(&user_id)
            .map(|cart| cart.value().clone())
            .unwrap_or_default())
    }

    async fn save(&self, user_id: Uuid, cart: &Cart) -> Result<(), ServiceError> {
        if cart.is_empty() {
            self.carts.remove(&user_id);
        } else {
            self.carts.insert(user_id, cart.clone());
        }
        Ok(())
    }

    async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.carts.remove(&user_id);
        Ok(())
    }
}

/// One JSON document per buyer at `<dir>/<user_id>.json`.
#[derive(Debug, Clone)]
pub struct FileCartStore {
    dir: PathBuf,
}

impl FileCartStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", user_id))
    }
}

#[async_trait]
impl CartStore for FileCartStore {
    async fn load(&self, user_id: Uuid) -> Result<Cart, ServiceError> {
        let path = self.path_for(user_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Cart::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(cart) => Ok(cart),
            Err(e) => {
                // Unreadable snapshot reads as an empty cart.
                warn!(path = %path.display(), error = %e, "discarding corrupt cart file");
                Ok(Cart::default())
            }
        }
    }

    async fn save(&self, user_id: Uuid, cart: &Cart) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(user_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(cart)
            .map_err(|e| ServiceError::StorageError(e.to_string()))?;

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "cart saved");
        Ok(())
    }

    async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
