pub mod branch;
pub mod catalog;
pub mod issues;
pub mod release;

use std::sync::Arc;

use driftwatch_gerrit::GerritClient;

pub use branch::{BranchComparator, BranchOptions, BranchRequest, DetectionMode};
pub use release::{ReleaseComparator, ReleaseOptions, ReleaseRequest};

/// One configured code-review backend.
#[derive(Clone)]
pub struct Backend {
    pub id: String,
    pub client: Arc<dyn GerritClient>,
    /// Whether this backend hosts the device manifest projects; device
    /// filters and release repository sets are resolved against it.
    pub hosts_catalog: bool,
}

impl Backend {
    pub fn new(id: &str, client: Arc<dyn GerritClient>, hosts_catalog: bool) -> Self {
        Self {
            id: id.to_string(),
            client,
            hosts_catalog,
        }
    }
}
