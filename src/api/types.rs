use serde::{Deserialize, Serialize};

use crate::ledger::{BlacklistEntry, ServerUserEntry, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserveActivityRequest {
    pub server_id: u64,
    pub server_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub server_id: u64,
    pub user_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub exceeded: bool,
    pub reason: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOperationRequest {
    pub server_id: u64,
    pub user_id: u64,
    pub username: String,
    pub from_lang: String,
    pub to_lang: String,
    pub symbol_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOperationResponse {
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerUsersResponse {
    pub users: Vec<ServerUserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRequest {
    pub user_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BanResponse {
    pub entry: BlacklistEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
