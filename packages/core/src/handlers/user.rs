//! User Node Handler
//!
//! Users are nodes like everything else; this handler owns their payload
//! shapes, field validation, and the password lifecycle: callers write a
//! plaintext `new_password`, and the insert/update hooks consume it into a
//! salted digest before anything reaches storage.

use crate::handlers::NodeHandler;
use crate::models::{Node, Reference};
use crate::services::{FieldErrors, NodeManager, NodeManagerError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Business payload of a user node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserData {
    pub username: String,
    pub email: String,
    /// Gender code: empty, "m" or "f"
    pub gender: String,
    /// Stored digest, `<algo>$<salt>$<hex>`
    pub password: String,
    /// Plaintext staging field, consumed by the insert/update hooks
    pub new_password: String,
}

/// Operational payload of a user node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMeta {
    /// Work factor: the digest is iterated 2^cost times
    pub password_cost: u32,
    pub password_algo: String,
}

impl Default for UserMeta {
    fn default() -> Self {
        Self {
            password_cost: 12,
            password_algo: "sha256".to_string(),
        }
    }
}

/// Handler for `core.user` nodes
pub struct UserHandler {
    email_pattern: Regex,
}

impl UserHandler {
    /// Create the handler
    pub fn new() -> Self {
        Self {
            // Deliberately loose: full address validation belongs to the
            // mail subsystem, this only rejects obvious garbage.
            email_pattern: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
                .expect("email pattern is valid"),
        }
    }

    fn payload(&self, node: &Node) -> Result<(UserData, UserMeta), NodeManagerError> {
        let data: UserData = serde_json::from_value(node.data.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("user data: {e}")))?;
        let meta: UserMeta = serde_json::from_value(node.meta.clone())
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("user meta: {e}")))?;
        Ok((data, meta))
    }

    /// Consume a staged `new_password` into a salted, tagged digest
    fn digest_password(&self, node: &mut Node) -> Result<(), NodeManagerError> {
        let (mut data, meta) = self.payload(node)?;

        if data.new_password.is_empty() {
            return Ok(());
        }

        let salt = Reference::new_random().to_clean();
        let digest = iterated_digest(&salt, &data.new_password, meta.password_cost);

        data.password = format!("{}${salt}${digest}", meta.password_algo);
        data.new_password.clear();

        node.data = serde_json::to_value(data)
            .map_err(|e| NodeManagerError::corrupted(node.uuid, format!("user data: {e}")))?;

        Ok(())
    }
}

impl Default for UserHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// sha-256 digest of `salt || password`, rehashed 2^cost times
fn iterated_digest(salt: &str, password: &str, cost: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();

    let rounds = 1u64 << cost.min(20);
    for _ in 0..rounds {
        digest = Sha256::digest(digest);
    }

    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl NodeHandler for UserHandler {
    fn default_payload(&self) -> (Value, Value) {
        (
            serde_json::to_value(UserData::default()).expect("user data serializes"),
            serde_json::to_value(UserMeta::default()).expect("user meta serializes"),
        )
    }

    async fn validate(&self, node: &Node, _manager: &NodeManager, errors: &mut FieldErrors) {
        let data: UserData = match serde_json::from_value(node.data.clone()) {
            Ok(data) => data,
            Err(_) => {
                errors.add_error("data", "Malformed user payload");
                return;
            }
        };

        if data.username.is_empty() {
            errors.add_error("data.username", "Username cannot be empty");
        }

        if !data.email.is_empty() && !self.email_pattern.is_match(&data.email) {
            errors.add_error("data.email", "Email is not valid");
        }

        if !matches!(data.gender.as_str(), "" | "m" | "f") {
            errors.add_error("data.gender", "Invalid gender code");
        }
    }

    async fn pre_insert(
        &self,
        node: &mut Node,
        _manager: &NodeManager,
    ) -> Result<(), NodeManagerError> {
        self.digest_password(node)
    }

    async fn pre_update(
        &self,
        node: &mut Node,
        _manager: &NodeManager,
    ) -> Result<(), NodeManagerError> {
        self.digest_password(node)
    }
}
