use serde::{Deserialize, Serialize};

/// Editor on whose behalf a job runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub key: i32,
    pub username: String,
}

impl User {
    pub fn new(key: i32, username: impl Into<String>) -> Self {
        Self {
            key,
            username: username.into(),
        }
    }

    /// Account used for jobs started by the service itself
    pub fn system() -> Self {
        Self::new(0, "system")
    }
}
