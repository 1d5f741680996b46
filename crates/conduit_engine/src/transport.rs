//! Transport layer abstraction.
//!
//! The engine never talks to the network directly. Connectors provide an
//! [`AccountProvider`] and a [`ServerApi`]; the latter opens project-scoped
//! [`ProjectTransport`]s for one operation.

use crate::cancellation::check;
use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use conduit_model::{ObjectId, SerializedObject};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A signed-in server account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: String,
    /// Server the account belongs to.
    pub server_url: String,
    /// Bearer token.
    pub token: String,
}

impl Account {
    /// Creates an account.
    pub fn new(
        id: impl Into<String>,
        server_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            server_url: server_url.into(),
            token: token.into(),
        }
    }
}

/// Resolves the account a card operates with.
pub trait AccountProvider: Send + Sync {
    /// Returns the account with `account_id`, or any account on
    /// `server_url` when that id is unknown on this machine.
    fn account(&self, account_id: &str, server_url: &str) -> EngineResult<Account>;
}

/// Fixed in-memory account list.
#[derive(Debug, Default)]
pub struct StaticAccounts {
    accounts: RwLock<Vec<Account>>,
}

impl StaticAccounts {
    /// Creates a provider with the given accounts.
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
        }
    }

    /// Adds an account.
    pub fn add(&self, account: Account) {
        self.accounts.write().push(account);
    }
}

impl AccountProvider for StaticAccounts {
    fn account(&self, account_id: &str, server_url: &str) -> EngineResult<Account> {
        let accounts = self.accounts.read();
        accounts
            .iter()
            .find(|a| a.id == account_id)
            .or_else(|| accounts.iter().find(|a| a.server_url == server_url))
            .cloned()
            .ok_or_else(|| EngineError::AccountNotFound(account_id.to_string()))
    }
}

/// A model version as recorded by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Version id.
    pub id: String,
    /// Model the version belongs to.
    pub model_id: String,
    /// Root object of the version's graph.
    pub root_object_id: ObjectId,
    /// Message.
    pub message: String,
    /// Application that created the version.
    pub source_application: String,
}

/// Request to record a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVersion {
    /// Target model.
    pub model_id: String,
    /// Root object of the uploaded graph.
    pub root_object_id: ObjectId,
    /// Message.
    pub message: String,
    /// Sending application.
    pub source_application: String,
}

/// Project-scoped server operations.
#[async_trait]
pub trait ProjectTransport: Send + Sync {
    /// Project this transport is bound to.
    fn project_id(&self) -> &str;

    /// Returns the subset of `ids` already stored on the server.
    async fn has_objects(&self, ids: &[ObjectId]) -> EngineResult<HashSet<ObjectId>>;

    /// Stores encoded objects.
    async fn upload_objects(&self, objects: &[SerializedObject]) -> EngineResult<()>;

    /// Fetches encoded objects. Fails if any id is unknown.
    async fn download_objects(&self, ids: &[ObjectId]) -> EngineResult<Vec<SerializedObject>>;

    /// Records a new version and returns its id.
    async fn create_version(&self, request: CreateVersion) -> EngineResult<String>;

    /// Fetches version metadata.
    async fn version(&self, model_id: &str, version_id: &str) -> EngineResult<Version>;

    /// Records that a version was received by `source_application`.
    async fn mark_received(&self, version_id: &str, source_application: &str) -> EngineResult<()>;
}

/// Entry point to a server.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Opens a transport for one project on behalf of `account`.
    async fn open(
        &self,
        account: &Account,
        project_id: &str,
    ) -> EngineResult<Arc<dyn ProjectTransport>>;
}

/// Runs a transport call, retrying retryable failures with backoff.
///
/// Cancellation interrupts both the call and the backoff sleep.
pub async fn retrying<T, F, Fut>(
    retry: &RetryConfig,
    token: &CancellationToken,
    operation: &str,
    mut call: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        check(token)?;
        let result = tokio::select! {
            _ = token.cancelled() => return Err(EngineError::Cancelled),
            result = call() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                tracing::warn!(operation, attempt, error = %err, ?delay, "transport call failed, retrying");
                tokio::select! {
                    _ = token.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter()
    }

    #[test]
    fn account_lookup_falls_back_to_server() {
        let accounts = StaticAccounts::new(vec![Account::new("a1", "https://one.test", "t1")]);

        assert_eq!(accounts.account("a1", "https://x.test").unwrap().id, "a1");
        assert_eq!(accounts.account("gone", "https://one.test").unwrap().id, "a1");
        assert!(matches!(
            accounts.account("gone", "https://two.test"),
            Err(EngineError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retrying(&quick_retry(3), &CancellationToken::new(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::transport_retryable("flaky"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> =
            retrying(&quick_retry(2), &CancellationToken::new(), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::transport_retryable("down"))
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> =
            retrying(&quick_retry(5), &CancellationToken::new(), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::transport_fatal("forbidden"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: EngineResult<()> =
            retrying(&quick_retry(3), &token, "test", || async { Ok(()) }).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
