//! Unique test data, so rows written by concurrent tests never collide.

use uuid::Uuid;

/// `{prefix}-{uuid}`
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// `{prefix}-{uuid}@example.test`
pub fn unique_email(prefix: &str) -> String {
    format!("{}@example.test", unique_str(prefix))
}
