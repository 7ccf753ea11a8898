//! BIG-IQ license pool assignments.

use serde_json::Value;

use crate::client::ManagementClient;
use crate::error::Result;
use crate::feature::{FeatureClient, Operation};

pub const ASSIGNMENTS_URI: &str = "/mgmt/cm/device/licensing/pool/member-management";

/// Read-only view of license assignments.
pub struct AssignmentClient {
    inner: FeatureClient,
}

impl AssignmentClient {
    pub fn new(client: ManagementClient) -> Self {
        Self {
            inner: FeatureClient::new(client, ASSIGNMENTS_URI, &[Operation::List]),
        }
    }

    pub async fn list(&self) -> Result<Value> {
        self.inner.list().await
    }

    /// The underlying feature client, for callers that need its other operations
    /// (which all reject with a configuration error).
    pub fn inner(&self) -> &FeatureClient {
        &self.inner
    }
}
