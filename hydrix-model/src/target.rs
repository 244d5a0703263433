use serde::{Deserialize, Serialize};

/// An atomic unit of "where to scan"; immutable once generated.
///
/// `request` holds the raw request bytes handed to the execution engine,
/// `url` the canonical form shown in status rows.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub is_https: bool,
    pub request: Vec<u8>,
    pub url: String,
}

impl ScanTarget {
    pub fn new(url: impl Into<String>, is_https: bool, request: Vec<u8>) -> Self {
        Self {
            is_https,
            request,
            url: url.into(),
        }
    }
}
