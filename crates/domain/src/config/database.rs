use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. Typically supplied via `DATABASE_URL`
    /// rather than committed to a config file.
    #[serde(default = "d_dsn")]
    pub dsn: String,
    #[serde(default = "d_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: d_dsn(),
            max_connections: d_max_connections(),
        }
    }
}

fn d_dsn() -> String {
    "postgres://localhost/rae".into()
}
fn d_max_connections() -> u32 {
    10
}
