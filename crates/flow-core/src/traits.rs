use async_trait::async_trait;

use crate::{AccountStatus, EngineError, OpenPosition, TradeSignal};

/// Pluggable directional predictor (pre-trained model behind an abstract
/// capability). Returns P(up) in [0, 1] for a feature vector.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64, EngineError>;
}

/// Contract to the execution side. Implemented by the brokerage adapter;
/// the core only ever calls through this trait.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Submit an accepted signal. Idempotent by signal id.
    async fn submit(&self, signal: &TradeSignal) -> Result<(), EngineError>;

    async fn modify(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> Result<(), EngineError>;

    async fn cancel(&self, ticket: u64) -> Result<(), EngineError>;

    async fn positions(&self) -> Result<Vec<OpenPosition>, EngineError>;

    async fn account_status(&self) -> Result<AccountStatus, EngineError>;
}
