//! Read access to location and item records owned by the catalog/CRUD layer.

use async_trait::async_trait;

use gasflow_core::{ItemId, LocationId};
use gasflow_inventory::{ItemSpec, Location};

use crate::error::StoreError;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve a warehouse or vehicle by id.
    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError>;

    async fn item(&self, id: ItemId) -> Result<Option<ItemSpec>, StoreError>;
}
