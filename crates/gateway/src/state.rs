use std::sync::Arc;

use rae_domain::config::Config;
use rae_responses::ResponseService;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub responses: Arc<ResponseService>,

    /// SHA-256 hash of the API bearer token, read once at startup.
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
