//! Off-chain bounty metadata.
//!
//! Records are a denormalized cache keyed by the bounty address. The chain
//! is authoritative for `status`, `assignee`, `amount` and `deadline`; only
//! the reconciler writes those fields.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solana_program::pubkey::Pubkey;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    error::{EscrowError, EscrowResult},
    identity::{Identity, OwnerRef},
    state::BountyStatus,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BountyMetadata {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub tags: Vec<String>,
    /// Payout share per severity label, in basis points.
    pub severity_weights: BTreeMap<String, u16>,
    /// Display name per wallet address.
    pub display_names: BTreeMap<String, String>,
    pub address: Option<Identity>,
    /// Last confirmed transaction that touched the bounty.
    pub transaction_signature: Option<String>,
    pub status: Option<BountyStatus>,
    pub assignee: Option<Identity>,
    pub amount: Option<u64>,
    pub deadline: Option<i64>,
    pub owner: Option<OwnerRef>,
    pub owner_migrated: bool,
    /// Fields this crate does not interpret, kept so upserts do not drop them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BountyMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Whether the cache already records a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(BountyStatus::is_terminal)
    }
}

/// The external document store. Upserts are idempotent and keyed by the
/// bounty address.
pub trait MetadataStore: Send + Sync {
    fn upsert_bounty_metadata(
        &self,
        address: &Pubkey,
        metadata: BountyMetadata,
    ) -> impl Future<Output = EscrowResult<()>> + Send;

    fn read_bounty_metadata(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = EscrowResult<Option<BountyMetadata>>> + Send;
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<Pubkey, BountyMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a raw JSON document, normalizing legacy field shapes.
    pub async fn insert_document(&self, address: &Pubkey, document: Value) -> EscrowResult<()> {
        let metadata: BountyMetadata =
            serde_json::from_value(document).map_err(|e| EscrowError::ReconciliationFailure {
                address: *address,
                reason: format!("unreadable metadata document: {e}"),
            })?;
        self.records.write().await.insert(*address, metadata);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    async fn upsert_bounty_metadata(&self, address: &Pubkey, metadata: BountyMetadata) -> EscrowResult<()> {
        debug!(address = %address, "upsert metadata");
        self.records.write().await.insert(*address, metadata);
        Ok(())
    }

    async fn read_bounty_metadata(&self, address: &Pubkey) -> EscrowResult<Option<BountyMetadata>> {
        Ok(self.records.read().await.get(address).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_read() {
        let store = InMemoryMetadataStore::new();
        let address = Pubkey::new_unique();
        assert_eq!(store.read_bounty_metadata(&address).await.unwrap(), None);

        let mut metadata = BountyMetadata::new("Audit the AMM");
        metadata.status = Some(BountyStatus::Open);
        store.upsert_bounty_metadata(&address, metadata.clone()).await.unwrap();
        store.upsert_bounty_metadata(&address, metadata.clone()).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.read_bounty_metadata(&address).await.unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn legacy_document_normalizes_owner_and_keeps_unknown_fields() {
        let store = InMemoryMetadataStore::new();
        let address = Pubkey::new_unique();
        let wallet = Pubkey::new_unique();
        store
            .insert_document(
                &address,
                json!({
                    "title": "Vault review",
                    "owner": { "publicKey": wallet.to_string() },
                    "status": "Open",
                    "repoStars": 12
                }),
            )
            .await
            .unwrap();

        let metadata = store.read_bounty_metadata(&address).await.unwrap().unwrap();
        assert_eq!(metadata.owner, Some(OwnerRef::Wallet(Identity::from(wallet))));
        assert_eq!(metadata.status, Some(BountyStatus::Open));
        assert!(!metadata.owner_migrated);
        assert_eq!(metadata.extra.get("repoStars"), Some(&json!(12)));
    }

    #[tokio::test]
    async fn unreadable_document_is_reported() {
        let store = InMemoryMetadataStore::new();
        let err = store
            .insert_document(&Pubkey::new_unique(), json!({ "amount": "lots" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ReconciliationFailure);
        assert!(store.is_empty().await);
    }
}
