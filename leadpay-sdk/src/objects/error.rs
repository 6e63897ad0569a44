use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a failed call may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrySafety {
    /// The same call can be repeated as-is.
    Safe,
    /// The call can be repeated once the input or state has been corrected.
    AfterCorrection,
    /// Repeating the call will not help.
    Never,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Machine readable error code, e.g. `duplicate_active_purchase`.
    pub error: String,
    pub message: String,
    pub retry_safe: RetrySafety,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_purchase_id: Option<Uuid>,
}
