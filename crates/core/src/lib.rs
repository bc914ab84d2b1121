//! Tag reconciliation and per-resource batch actions for cloud governance.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod batch;
pub mod error;
pub mod order;
pub mod reconcile;
pub mod session;
pub mod tags;

pub use batch::{delete_each, tag_each, update_each, BatchReport, ItemReport, Outcome};
pub use error::{BatchError, EngineError, IngestError, ProviderError};
pub use order::order_by_dependencies;
pub use reconcile::{plan, reconcile, TagChange};
pub use session::{ProviderClient, Session, SessionFactory};
pub use tags::{Ingest, TagKeys, TagSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Identifies one resource of one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub id: ResourceId,
    #[serde(default)]
    pub arn: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: ResourceId(id.into()), arn: None }
    }

    pub fn with_arn(mut self, arn: impl Into<String>) -> Self {
        self.arn = Some(arn.into());
        self
    }
}
