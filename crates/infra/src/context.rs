use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::UserId;

/// Who is asking, and which request this belongs to.
///
/// Passed to every mutating operation. `user_id` becomes `created_by` /
/// `recorded_by`; `correlation_id` ties audit records and log lines of one
/// request together.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub user_id: UserId,
    pub correlation_id: Uuid,
}

impl OperationContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            correlation_id: Uuid::now_v7(),
        }
    }

    /// Context for work the system does on its own behalf.
    pub fn system() -> Self {
        Self::new(UserId::system())
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
