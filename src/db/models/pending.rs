use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A payload whose immediate delivery failed, waiting for the next drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDelivery {
    pub id: i64,
    /// Collector wire JSON, exactly as it will be posted.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
