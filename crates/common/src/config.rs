use serde::{Deserialize, Serialize};

/// Per-request compilation options supplied by the HTTP collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    /// Client negotiated an `application/hll` response; the sole measure must
    /// then be an `hll` aggregate.
    #[serde(default, rename = "returnHLLBinary")]
    pub return_hll_binary: bool,

    /// Request correlation id carried into logs.
    #[serde(default)]
    pub request_id: String,
}

impl CompileOptions {
    /// Options for a request that negotiated an HLL binary response.
    pub fn hll_binary() -> Self {
        Self {
            return_hll_binary: true,
            ..Self::default()
        }
    }
}
