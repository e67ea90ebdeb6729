use serde::{Deserialize, Serialize};

// -- Query service --

/// Body of `POST /sources`. An empty list selects every known source.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetSourcesRequest {
    #[serde(default)]
    pub source_uids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Content type of the streamed record responses (one JSON record per line).
pub const NDJSON: &str = "application/x-ndjson";

/// Response header carrying the per-call correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
