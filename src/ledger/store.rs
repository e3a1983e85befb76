//! Shared registry of basket-token ledgers
//!
//! One `Mutex` per token gives single-writer access to each ledger while
//! different tokens proceed in parallel. The outer `RwLock` only guards the
//! map itself (registration), so lookups never serialize behind a write.

use alloy_primitives::Address;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::matrix_token::{MatrixSnapshot, MatrixToken};
use crate::error::{MatrixError, MatrixResult};
use crate::modules::{FeeAccrual, StreamingFeeModule};

pub type SharedToken = Arc<Mutex<MatrixToken>>;

#[derive(Debug, Default)]
pub struct MatrixStore {
    tokens: RwLock<HashMap<Address, SharedToken>>,
}

impl MatrixStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: MatrixToken) -> MatrixResult<()> {
        let address = token.address();
        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(&address) {
            return Err(MatrixError::invalid(format!("{} already registered", address)));
        }
        debug!("Registered {} at {}", token.symbol(), address);
        tokens.insert(address, Arc::new(Mutex::new(token)));
        Ok(())
    }

    pub async fn get(&self, address: &Address) -> Option<SharedToken> {
        self.tokens.read().await.get(address).cloned()
    }

    pub async fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.tokens.read().await.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }

    /// Run `operation` under the token's lock; the ledger is rolled back on error
    pub async fn with_token<T, F>(&self, address: &Address, operation: F) -> MatrixResult<T>
    where
        F: FnOnce(&mut MatrixToken) -> MatrixResult<T>,
    {
        let token = self
            .get(address)
            .await
            .ok_or_else(|| MatrixError::invalid(format!("unknown basket token {}", address)))?;
        let mut guard = token.lock().await;
        guard.atomically(operation)
    }

    pub async fn snapshot(&self, address: &Address) -> MatrixResult<MatrixSnapshot> {
        self.with_token(address, |t| t.snapshot()).await
    }

    /// Actualize streaming fees on every registered token concurrently
    pub async fn accrue_all(
        &self,
        module: &StreamingFeeModule,
        now: u64,
    ) -> Vec<(Address, MatrixResult<FeeAccrual>)> {
        let tokens: Vec<(Address, SharedToken)> = self
            .tokens
            .read()
            .await
            .iter()
            .map(|(address, token)| (*address, Arc::clone(token)))
            .collect();

        let futures = tokens.into_iter().map(|(address, token)| async move {
            let mut guard = token.lock().await;
            (address, module.actualize_fee(&mut guard, now))
        });

        let results = join_all(futures).await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            warn!("Fee accrual failed on {}/{} tokens", failed, results.len());
        } else {
            info!("Fees accrued on {} tokens", results.len());
        }

        results
    }
}
