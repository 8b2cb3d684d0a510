//! Post-confirmation read-back into the metadata cache.
//!
//! The chain wins every disagreement. A record that cannot be decoded is
//! reported and left alone in the cache; it is never overwritten with a
//! guess.

use std::sync::Arc;

use solana_program::pubkey::Pubkey;
use tracing::{info, warn};

use crate::{
    backoff::{poll, Backoff, PollLimit, PollOutcome},
    config::{ClientConfig, ReadBackPolicy},
    error::{EscrowError, EscrowResult, MalformedAccount},
    identity::{Identity, OwnerRef},
    metadata::{BountyMetadata, MetadataStore},
    rpc::RpcTransport,
    state::{BountyAccount, BountyStatus},
    submitter::Outcome,
};

/// What a reconciliation pass did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Cache now mirrors the chain. `repaired` is set when the cached status
    /// disagreed with the chain in a way the confirmed transaction does not
    /// explain.
    Synced {
        status: BountyStatus,
        repaired: bool,
    },
    /// The cache already records a terminal status; no read was made.
    AlreadyTerminal(BountyStatus),
    /// The outcome was not a confirmation, so nothing changed on chain.
    NotConfirmed,
    /// The account could not be decoded; the cache was left untouched.
    Undecodable(MalformedAccount),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerMigration {
    Migrated { from: Identity, to: String },
    AlreadyMigrated,
    /// No user id is known for the wallet; the record is left for a later run.
    Unresolved(Identity),
    NoRecord,
}

enum ReadBack {
    Decoded(BountyAccount),
    Malformed(MalformedAccount),
    Missing,
    Unavailable(String),
}

pub struct MetadataReconciler<R, M> {
    rpc: Arc<R>,
    store: Arc<M>,
    read_back: ReadBackPolicy,
}

impl<R: RpcTransport, M: MetadataStore> MetadataReconciler<R, M> {
    pub fn new(rpc: Arc<R>, store: Arc<M>, config: &ClientConfig) -> Self {
        Self {
            rpc,
            store,
            read_back: config.read_back,
        }
    }

    pub fn store(&self) -> &Arc<M> {
        &self.store
    }

    /// Entry point after a submit completes.
    pub async fn on_transaction_confirmed(
        &self,
        address: &Pubkey,
        outcome: &Outcome,
    ) -> EscrowResult<Reconciliation> {
        self.on_transaction_confirmed_expecting(address, outcome, None)
            .await
    }

    /// Like [`Self::on_transaction_confirmed`], but keeps re-reading within
    /// the read-back budget until the chain shows `expected`, to ride out a
    /// node that is a slot behind the one that confirmed.
    ///
    /// A known `expected` status means the caller saw a live bounty before
    /// submitting, so a terminal cache is stale and is always re-read.
    pub async fn on_transaction_confirmed_expecting(
        &self,
        address: &Pubkey,
        outcome: &Outcome,
        expected: Option<BountyStatus>,
    ) -> EscrowResult<Reconciliation> {
        if !outcome.is_confirmed() {
            return Ok(Reconciliation::NotConfirmed);
        }
        let cached = self.store.read_bounty_metadata(address).await?;
        if let (Some(status), None) = (cached.as_ref().and_then(|m| m.status), expected) {
            if status.is_terminal() {
                info!(address = %address, ?status, "bounty already terminal in cache, skipping read-back");
                return Ok(Reconciliation::AlreadyTerminal(status));
            }
        }
        self.sync(address, cached, Some(outcome.signature().to_string()), expected)
            .await
    }

    /// Re-reads the account and repairs the cache, with no transaction
    /// involved.
    pub async fn refresh(&self, address: &Pubkey) -> EscrowResult<Reconciliation> {
        let cached = self.store.read_bounty_metadata(address).await?;
        self.sync(address, cached, None, None).await
    }

    async fn sync(
        &self,
        address: &Pubkey,
        cached: Option<BountyMetadata>,
        signature: Option<String>,
        expected: Option<BountyStatus>,
    ) -> EscrowResult<Reconciliation> {
        let account = match self.read_back(address, expected).await {
            ReadBack::Decoded(account) => account,
            ReadBack::Malformed(reason) => {
                warn!(address = %address, %reason, "read-back could not be decoded, cache left as is");
                return Ok(Reconciliation::Undecodable(reason));
            }
            ReadBack::Missing => {
                return Err(EscrowError::ReconciliationFailure {
                    address: *address,
                    reason: "account not found".to_string(),
                })
            }
            ReadBack::Unavailable(reason) => {
                return Err(EscrowError::ReconciliationFailure {
                    address: *address,
                    reason,
                })
            }
        };

        let mut metadata = cached.unwrap_or_default();
        // a cached status one transition behind the expected one is not drift
        let repaired = match (metadata.status, expected) {
            (None, _) => false,
            (Some(cached), _) if cached == account.status => false,
            // a terminal cache is never one transition behind anything
            (Some(cached), Some(expected)) => expected != account.status || cached.is_terminal(),
            (Some(_), None) => true,
        };
        if repaired {
            warn!(
                address = %address,
                cached = ?metadata.status,
                chain = ?account.status,
                "cache disagreed with chain, taking chain status"
            );
        }
        if let Some(expected) = expected {
            if expected != account.status {
                warn!(address = %address, ?expected, chain = ?account.status, "chain status differs from expected");
            }
        }

        metadata.address = Some(Identity::from(address));
        metadata.status = Some(account.status);
        metadata.assignee = account.hunter;
        metadata.amount = Some(account.amount);
        metadata.deadline = Some(account.deadline);
        if signature.is_some() {
            metadata.transaction_signature = signature;
        }
        self.store.upsert_bounty_metadata(address, metadata).await?;
        info!(address = %address, status = ?account.status, repaired, "metadata reconciled");

        Ok(Reconciliation::Synced {
            status: account.status,
            repaired,
        })
    }

    async fn read_back(&self, address: &Pubkey, expected: Option<BountyStatus>) -> ReadBack {
        let rpc = &self.rpc;
        let max_attempts = self.read_back.max_attempts;
        let outcome = poll(
            Backoff::from(self.read_back),
            PollLimit::attempts(max_attempts),
            |attempt| async move {
                let last = attempt >= max_attempts;
                match rpc.get_account_data(address).await {
                    Ok(Some(data)) => match BountyAccount::unpack(&data) {
                        Ok(account) => match expected {
                            Some(status) if status != account.status && !last => None,
                            _ => Some(ReadBack::Decoded(account)),
                        },
                        Err(reason) => Some(ReadBack::Malformed(reason)),
                    },
                    Ok(None) => last.then_some(ReadBack::Missing),
                    Err(e) => {
                        warn!(address = %address, attempt, error = %e, "read-back failed");
                        last.then(|| ReadBack::Unavailable(e.to_string()))
                    }
                }
            },
        )
        .await;
        match outcome {
            PollOutcome::Ready(read) => read,
            PollOutcome::Exhausted { attempts } => {
                ReadBack::Unavailable(format!("no read-back after {attempts} attempts"))
            }
        }
    }

    /// One-time rewrite of a cached owner stored as a wallet address into
    /// the application user id that owns that wallet. Records already
    /// migrated are never touched again.
    pub async fn migrate_owner<F>(&self, address: &Pubkey, resolve_user: F) -> EscrowResult<OwnerMigration>
    where
        F: FnOnce(&Identity) -> Option<String> + Send,
    {
        let Some(mut metadata) = self.store.read_bounty_metadata(address).await? else {
            return Ok(OwnerMigration::NoRecord);
        };
        if metadata.owner_migrated {
            return Ok(OwnerMigration::AlreadyMigrated);
        }
        let migration = match metadata.owner.clone() {
            Some(OwnerRef::Wallet(wallet)) => match resolve_user(&wallet) {
                Some(uid) => {
                    warn!(address = %address, from = %wallet, to = %uid, "migrating owner from wallet to user id");
                    metadata.owner = Some(OwnerRef::User(uid.clone()));
                    OwnerMigration::Migrated { from: wallet, to: uid }
                }
                None => return Ok(OwnerMigration::Unresolved(wallet)),
            },
            Some(OwnerRef::User(_)) | None => OwnerMigration::AlreadyMigrated,
        };
        metadata.owner_migrated = true;
        self.store.upsert_bounty_metadata(address, metadata).await?;
        Ok(migration)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use solana_program::hash::Hash;
    use solana_sdk::{signature::Signature, transaction::Transaction};

    use super::*;
    use crate::{
        error::TransportError, metadata::InMemoryMetadataStore, rpc::SignatureStatus,
    };

    /// Serves a queue of account reads; the last entry repeats.
    #[derive(Default)]
    struct AccountReads {
        reads: Mutex<Vec<Result<Option<Vec<u8>>, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl AccountReads {
        fn new(reads: Vec<Result<Option<Vec<u8>>, TransportError>>) -> Self {
            Self {
                reads: Mutex::new(reads),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl RpcTransport for AccountReads {
        async fn send_transaction(&self, _: &Transaction) -> Result<Signature, TransportError> {
            Err(TransportError::Rpc("read only".into()))
        }

        async fn get_signature_status(&self, _: &Signature) -> Result<SignatureStatus, TransportError> {
            Ok(SignatureStatus::Unknown)
        }

        async fn get_account_data(&self, _: &Pubkey) -> Result<Option<Vec<u8>>, TransportError> {
            *self.calls.lock().unwrap() += 1;
            let mut reads = self.reads.lock().unwrap();
            if reads.len() > 1 {
                reads.remove(0)
            } else {
                reads.first().cloned().unwrap_or(Ok(None))
            }
        }

        async fn get_latest_blockhash(&self) -> Result<Hash, TransportError> {
            Ok(Hash::default())
        }

        async fn get_transaction_logs(&self, _: &Signature) -> Result<Vec<String>, TransportError> {
            Ok(Vec::new())
        }
    }

    fn reconciler(
        reads: Vec<Result<Option<Vec<u8>>, TransportError>>,
    ) -> MetadataReconciler<AccountReads, InMemoryMetadataStore> {
        MetadataReconciler::new(
            Arc::new(AccountReads::new(reads)),
            Arc::new(InMemoryMetadataStore::new()),
            &ClientConfig::default(),
        )
    }

    fn bounty(status: BountyStatus) -> BountyAccount {
        let mut account = BountyAccount::new_open(Identity::new([7; 32]), 2_000_000, 1_900_000_000, 1);
        account.status = status;
        account
    }

    fn confirmed() -> Outcome {
        Outcome::Confirmed(Signature::new_unique())
    }

    #[tokio::test(start_paused = true)]
    async fn chain_status_overrides_cache() {
        let r = reconciler(vec![Ok(Some(bounty(BountyStatus::Approved).pack().unwrap()))]);
        let address = Pubkey::new_unique();
        let mut cached = BountyMetadata::new("t");
        cached.status = Some(BountyStatus::Open);
        r.store().upsert_bounty_metadata(&address, cached).await.unwrap();

        let outcome = confirmed();
        let result = r.on_transaction_confirmed(&address, &outcome).await.unwrap();
        assert_eq!(
            result,
            Reconciliation::Synced {
                status: BountyStatus::Approved,
                repaired: true
            }
        );
        let stored = r.store().read_bounty_metadata(&address).await.unwrap().unwrap();
        assert_eq!(stored.status, Some(BountyStatus::Approved));
        assert_eq!(stored.title, "t");
        assert_eq!(stored.transaction_signature, Some(outcome.signature().to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_account_leaves_cache_alone() {
        let r = reconciler(vec![Ok(Some(vec![1, 2, 3]))]);
        let address = Pubkey::new_unique();
        let mut cached = BountyMetadata::new("t");
        cached.status = Some(BountyStatus::Open);
        r.store().upsert_bounty_metadata(&address, cached.clone()).await.unwrap();

        let result = r.on_transaction_confirmed(&address, &confirmed()).await.unwrap();
        assert!(matches!(
            result,
            Reconciliation::Undecodable(MalformedAccount::TooShort { .. })
        ));
        assert_eq!(r.store().read_bounty_metadata(&address).await.unwrap(), Some(cached));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_cache_skips_read() {
        let r = reconciler(vec![Ok(Some(bounty(BountyStatus::Open).pack().unwrap()))]);
        let address = Pubkey::new_unique();
        let mut cached = BountyMetadata::new("t");
        cached.status = Some(BountyStatus::Claimed);
        r.store().upsert_bounty_metadata(&address, cached).await.unwrap();

        let result = r.on_transaction_confirmed(&address, &confirmed()).await.unwrap();
        assert_eq!(result, Reconciliation::AlreadyTerminal(BountyStatus::Claimed));
        assert_eq!(r.rpc.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_terminal_cache_is_reread_after_a_known_transition() {
        let r = reconciler(vec![Ok(Some(bounty(BountyStatus::Cancelled).pack().unwrap()))]);
        let address = Pubkey::new_unique();
        let mut cached = BountyMetadata::new("t");
        cached.status = Some(BountyStatus::Claimed);
        r.store().upsert_bounty_metadata(&address, cached).await.unwrap();

        let result = r
            .on_transaction_confirmed_expecting(&address, &confirmed(), Some(BountyStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(
            result,
            Reconciliation::Synced {
                status: BountyStatus::Cancelled,
                repaired: true
            }
        );
        assert_eq!(r.rpc.calls(), 1);
        let stored = r.store().read_bounty_metadata(&address).await.unwrap().unwrap();
        assert_eq!(stored.status, Some(BountyStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_outcome_changes_nothing() {
        let r = reconciler(vec![Ok(Some(bounty(BountyStatus::Claimed).pack().unwrap()))]);
        let address = Pubkey::new_unique();
        let result = r
            .on_transaction_confirmed(&address, &Outcome::Timeout(Signature::new_unique()))
            .await
            .unwrap();
        assert_eq!(result, Reconciliation::NotConfirmed);
        assert_eq!(r.store().read_bounty_metadata(&address).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_node_is_reread_until_expected_status() {
        let r = reconciler(vec![
            Ok(None),
            Ok(Some(bounty(BountyStatus::Open).pack().unwrap())),
            Ok(Some(bounty(BountyStatus::Approved).pack().unwrap())),
        ]);
        let address = Pubkey::new_unique();
        let result = r
            .on_transaction_confirmed_expecting(&address, &confirmed(), Some(BountyStatus::Approved))
            .await
            .unwrap();
        assert_eq!(
            result,
            Reconciliation::Synced {
                status: BountyStatus::Approved,
                repaired: false
            }
        );
        assert_eq!(r.rpc.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_account_after_budget_is_reconciliation_failure() {
        let r = reconciler(vec![Ok(None)]);
        let err = r
            .on_transaction_confirmed(&Pubkey::new_unique(), &confirmed())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ReconciliationFailure);
        assert_eq!(r.rpc.calls(), 3);
    }

    #[tokio::test]
    async fn owner_migration_runs_once() {
        let r = reconciler(vec![]);
        let address = Pubkey::new_unique();
        let wallet = Identity::new([9; 32]);
        let mut cached = BountyMetadata::new("t");
        cached.owner = Some(OwnerRef::Wallet(wallet));
        r.store().upsert_bounty_metadata(&address, cached).await.unwrap();

        assert_eq!(
            r.migrate_owner(&address, |_| None).await.unwrap(),
            OwnerMigration::Unresolved(wallet)
        );
        assert_eq!(
            r.migrate_owner(&address, |_| Some("user-1".to_string())).await.unwrap(),
            OwnerMigration::Migrated {
                from: wallet,
                to: "user-1".to_string()
            }
        );
        assert_eq!(
            r.migrate_owner(&address, |_| Some("user-2".to_string())).await.unwrap(),
            OwnerMigration::AlreadyMigrated
        );
        let stored = r.store().read_bounty_metadata(&address).await.unwrap().unwrap();
        assert_eq!(stored.owner, Some(OwnerRef::User("user-1".to_string())));
        assert!(stored.owner_migrated);
        assert_eq!(
            r.migrate_owner(&Pubkey::new_unique(), |_| None).await.unwrap(),
            OwnerMigration::NoRecord
        );
    }
}
