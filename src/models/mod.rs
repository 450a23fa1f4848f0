//! Data models.

mod collection;
mod node;

pub use collection::{CollectionDescriptor, CopyRequest};
pub use node::{Node, NodeStatus, NodeUsageMetric};

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AppError;

const ERR_RE_NAME: &str = r"invalid name, must match the pattern `^[-_.a-zA-Z0-9]{1,100}$`";

lazy_static! {
    /// Regular expression used to validate node & collection names.
    ///
    /// Names are embedded verbatim in the paths of worker node URLs.
    static ref RE_NAME: Regex = Regex::new(r"^[-_.a-zA-Z0-9]{1,100}$").expect("failed to compile RE_NAME regex");
}

/// Validate the given node or collection name.
pub fn validate_name(name: &str) -> Result<(), AppError> {
    if RE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("{}, got `{}`", ERR_RE_NAME, name)))
    }
}

/// Validate the given replication level.
pub fn validate_replication(replication: u32) -> Result<(), AppError> {
    if replication >= 1 {
        Ok(())
    } else {
        Err(AppError::InvalidInput("replication level must be greater or equal to 1".into()))
    }
}

/// Build the base URL of a worker node from its registered address.
///
/// Addresses may be registered either as `host:port` or as a full URL.
pub fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// Ensure the given document body is well-formed JSON.
pub fn validate_document(document: &[u8]) -> Result<(), AppError> {
    serde_json::from_slice::<serde_json::Value>(document)
        .map(|_| ())
        .map_err(|err| AppError::InvalidInput(format!("document body must be valid JSON: {}", err)))
}
