use crate::db::Storage;
use crate::error::RasidError;
use crate::types::{ApiConnection, ConnectionId, ConnectionInput};
use tracing::info;

/// CRUD over `api_connections`. Ownership follows from these writes through the
/// change feed; nothing here touches balances.
#[derive(Clone)]
pub struct ConnectionRegistry {
    storage: Storage,
}

impl ConnectionRegistry {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn list(&self) -> Result<Vec<ApiConnection>, RasidError> {
        self.storage.list_connections().await
    }

    pub async fn get(&self, id: ConnectionId) -> Result<ApiConnection, RasidError> {
        self.storage.get_connection(id).await
    }

    pub async fn create(&self, input: ConnectionInput) -> Result<ApiConnection, RasidError> {
        input.validate()?;
        self.ensure_source(&input).await?;
        let created = self.storage.insert_connection(&input).await?;
        info!(
            id = created.id,
            name = %created.name,
            source_id = created.source_id,
            active = created.is_active,
            "connection created"
        );
        Ok(created)
    }

    /// Replace the configuration of `id`. Omitted secrets keep their stored values,
    /// so validation runs against the merged record.
    pub async fn update(
        &self,
        id: ConnectionId,
        mut input: ConnectionInput,
    ) -> Result<ApiConnection, RasidError> {
        let existing = self.storage.get_connection(id).await?;
        if input.password.is_none() {
            input.password = existing.password;
        }
        if input.auth_token.is_none() {
            input.auth_token = existing.auth_token;
        }
        input.validate()?;
        self.ensure_source(&input).await?;
        let updated = self.storage.update_connection(id, &input).await?;
        info!(id, name = %updated.name, active = updated.is_active, "connection updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: ConnectionId) -> Result<(), RasidError> {
        self.storage.delete_connection(id).await?;
        info!(id, "connection deleted");
        Ok(())
    }

    /// Toggle `isActive` without resending the whole configuration.
    pub async fn set_active(
        &self,
        id: ConnectionId,
        active: bool,
    ) -> Result<ApiConnection, RasidError> {
        let existing = self.storage.get_connection(id).await?;
        if existing.is_active == active {
            return Ok(existing);
        }
        let input = ConnectionInput {
            source_id: existing.source_id,
            name: existing.name,
            api_url: existing.api_url,
            api_method: existing.api_method,
            email: existing.email,
            password: None,
            auth_token: None,
            currency: existing.currency,
            is_active: active,
            auto_sync: existing.auto_sync,
            sync_interval_seconds: existing.sync_interval_seconds,
        };
        let updated = self.storage.update_connection(id, &input).await?;
        info!(id, active, "connection activation changed");
        Ok(updated)
    }

    async fn ensure_source(&self, input: &ConnectionInput) -> Result<(), RasidError> {
        match self.storage.get_source(input.source_id).await? {
            Some(_) => Ok(()),
            None => Err(RasidError::Configuration(format!(
                "unknown source {}",
                input.source_id
            ))),
        }
    }
}
