/// Rewrites a stored payload before deserialization, letting old stored
/// representations be upgraded in place across schema changes. Invoked on
/// every payload read; a failure is treated as a deserialization failure
/// (the payload is considered corrupt and purged).
pub trait PayloadMigrator: Send + Sync {
    fn migrate(&self, payload: serde_json::Value)
        -> Result<serde_json::Value, MigrationError>;
}

#[derive(Debug, thiserror::Error)]
#[error("payload migration failed: {0}")]
pub struct MigrationError(pub String);
