use super::{PgStore, backend, decode};
use async_trait::async_trait;
use flowforge_core::{CredentialId, UserId};
use flowforge_workflow::StoreError;
use flowforge_workflow::credential::{CredentialStore, StoredCredential};
use sqlx::FromRow;

#[derive(FromRow)]
struct CredentialRow {
    id: String,
    user_id: String,
    name: String,
    value: String,
}

impl CredentialRow {
    fn try_into_credential(self) -> Result<StoredCredential, sqlx::Error> {
        Ok(StoredCredential {
            id: decode("credential id", &self.id)?,
            user_id: decode("user id", &self.user_id)?,
            name: self.name,
            value: self.value,
        })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn credential(
        &self,
        user_id: UserId,
        credential_id: CredentialId,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT id, user_id, name, value FROM credentials WHERE id = $1 AND user_id = $2",
        )
        .bind(credential_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(CredentialRow::try_into_credential)
            .transpose()
            .map_err(backend)
    }
}
