//! AWS resource types: how each is enumerated, described, tagged and mutated.

use anyhow::{Context, Result};
use govtag_core::{order_by_dependencies, EngineError, Ingest, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::HashSet;

pub mod augment;
pub mod flight;
pub mod shape;

pub use flight::{FlightData, FlightProvider, Recorded};
pub use shape::TagShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation { Tag, RemoveTag, MarkForOp, Delete, UpdateDeleteProtection }

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Tag => "tag",
            Operation::RemoveTag => "remove-tag",
            Operation::MarkForOp => "mark-for-op",
            Operation::Delete => "delete",
            Operation::UpdateDeleteProtection => "update-delete-protection",
        }
    }

    fn writes_tags(&self) -> bool { matches!(self, Operation::Tag | Operation::RemoveTag | Operation::MarkForOp) }
}

/// A side call whose response is attached to the described record under
/// `key()` for filters to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Annotation {
    /// Firewall log destinations, a list of `LogDestinationConfigs` items.
    Logging,
    /// The resource policy document, as the JSON string the provider returns.
    Policy,
}

impl Annotation {
    pub fn call(&self) -> &'static str {
        match self {
            Annotation::Logging => "describe_logging_configuration",
            Annotation::Policy => "get_access_point_policy",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Annotation::Logging => "govtag:Logging",
            Annotation::Policy => "govtag:Policy",
        }
    }

    fn extract(&self, resp: &Json) -> Json {
        match self {
            Annotation::Logging => lookup(resp, "LoggingConfiguration.LogDestinationConfigs")
                .cloned()
                .unwrap_or_else(|| json!([])),
            Annotation::Policy => resp.get("Policy").cloned().unwrap_or(Json::Null),
        }
    }
}

/// Kind-specific reshaping of a describe response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Augment { Plain, Firewall, AccessPoint, StorageLens, Hoist(&'static str) }

/// `enum_key` and `cfn_type` are descriptive only; they are printed by the
/// `catalog` command.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceKind {
    pub type_name: &'static str,
    pub service: &'static str,
    pub enum_op: &'static str,
    pub enum_key: &'static str,
    /// Per-resource call whose response replaces the listed item.
    pub detail_op: Option<&'static str>,
    /// Dotted path to the identifier in a described record.
    pub id: &'static str,
    pub arn: Option<&'static str>,
    pub cfn_type: Option<&'static str>,
    pub tag_shape: Option<TagShape>,
    pub operations: &'static [Operation],
    /// Kinds whose resources must be deleted before this one.
    pub delete_after: &'static [&'static str],
    pub augment: Augment,
    pub annotations: &'static [Annotation],
    /// Whether AWS Config snapshots can stand in for describe calls.
    pub config_source: bool,
}

fn lookup<'a>(record: &'a Json, path: &str) -> Option<&'a Json> {
    path.split('.').try_fold(record, |v, seg| v.get(seg))
}

impl ResourceKind {
    pub fn supports(&self, op: Operation) -> bool { self.operations.contains(&op) }

    /// Reject recorded responses to calls this kind never makes.
    pub fn check_recorded(&self, rec: &Recorded) -> Result<()> {
        if rec.detail.is_some() && self.detail_op.is_none() {
            anyhow::bail!("'{}' records a detail response but has no detail call", self.type_name);
        }
        for call in rec.responses.keys() {
            if !self.annotations.iter().any(|a| a.call() == call) {
                anyhow::bail!("'{}' records a '{call}' response but never makes that call", self.type_name);
            }
        }
        Ok(())
    }

    pub fn resource_ref(&self, record: &Json) -> Result<ResourceRef> {
        let id = lookup(record, self.id)
            .and_then(Json::as_str)
            .with_context(|| format!("{} record has no '{}'", self.type_name, self.id))?;
        let mut r = ResourceRef::new(self.type_name, id);
        if let Some(arn) = self.arn.and_then(|p| lookup(record, p)).and_then(Json::as_str) {
            r = r.with_arn(arn);
        }
        Ok(r)
    }

    /// Build the policy-facing record from recorded responses. Tags are
    /// always attached as `Tags` in `{Key, Value}` form.
    pub fn describe(&self, rec: &Recorded, ingest: Ingest) -> Result<Json> {
        let mut record = match (self.augment, rec.detail.clone()) {
            (_, None) => rec.listed.clone(),
            (Augment::Plain, Some(d)) => d,
            (Augment::Firewall, Some(d)) => augment::firewall_describe(d)?,
            (Augment::AccessPoint, Some(d)) => augment::access_point(&rec.listed, d)?,
            (Augment::StorageLens, Some(d)) => augment::storage_lens(d),
            (Augment::Hoist(key), Some(d)) => augment::hoist(d, key)?,
        };
        if let (Some(shape), Some(raw)) = (self.tag_shape, rec.tags.as_ref()) {
            let tags = shape::decode(shape, raw, ingest).with_context(|| format!("decode {} tags", self.type_name))?;
            record
                .as_object_mut()
                .with_context(|| format!("{} record is not an object", self.type_name))?
                .insert("Tags".into(), shape::encode(TagShape::Pascal, &tags));
        }
        for a in self.annotations {
            let Some(resp) = rec.responses.get(a.call()) else { continue };
            record
                .as_object_mut()
                .with_context(|| format!("{} record is not an object", self.type_name))?
                .insert(a.key().into(), a.extract(resp));
        }
        Ok(record)
    }

    pub fn load_config_item(&self, item: Json) -> Result<Json> {
        if !self.config_source { anyhow::bail!("resource type '{}' has no config source", self.type_name) }
        augment::firewall_config(item)
    }
}

const TAGGING: &[Operation] = &[Operation::Tag, Operation::RemoveTag, Operation::MarkForOp, Operation::Delete];

fn kinds() -> Vec<ResourceKind> {
    let base = ResourceKind {
        type_name: "",
        service: "",
        enum_op: "",
        enum_key: "",
        detail_op: None,
        id: "Name",
        arn: None,
        cfn_type: None,
        tag_shape: Some(TagShape::Pascal),
        operations: TAGGING,
        delete_after: &[],
        augment: Augment::Plain,
        annotations: &[],
        config_source: false,
    };
    vec![
        ResourceKind {
            type_name: "firewall",
            service: "network-firewall",
            enum_op: "list_firewalls",
            enum_key: "Firewalls",
            detail_op: Some("describe_firewall"),
            id: "FirewallName",
            arn: Some("FirewallArn"),
            cfn_type: Some("AWS::NetworkFirewall::Firewall"),
            operations: &[
                Operation::Tag,
                Operation::RemoveTag,
                Operation::MarkForOp,
                Operation::Delete,
                Operation::UpdateDeleteProtection,
            ],
            augment: Augment::Firewall,
            annotations: &[Annotation::Logging],
            config_source: true,
            ..base.clone()
        },
        ResourceKind {
            type_name: "s3-access-point",
            service: "s3control",
            enum_op: "list_access_points",
            enum_key: "AccessPointList",
            detail_op: Some("get_access_point"),
            arn: Some("AccessPointArn"),
            cfn_type: Some("AWS::S3::AccessPoint"),
            tag_shape: None,
            operations: &[Operation::Delete],
            augment: Augment::AccessPoint,
            annotations: &[Annotation::Policy],
            ..base.clone()
        },
        ResourceKind {
            type_name: "s3-access-point-multi",
            service: "s3control",
            enum_op: "list_multi_region_access_points",
            enum_key: "AccessPoints",
            cfn_type: Some("AWS::S3::MultiRegionAccessPoint"),
            tag_shape: None,
            operations: &[],
            ..base.clone()
        },
        ResourceKind {
            type_name: "s3-storage-lens",
            service: "s3control",
            enum_op: "list_storage_lens_configurations",
            enum_key: "StorageLensConfigurationList",
            detail_op: Some("get_storage_lens_configuration"),
            id: "StorageLensConfiguration.Id",
            arn: Some("StorageLensConfiguration.StorageLensArn"),
            cfn_type: Some("AWS::S3::StorageLens"),
            operations: &[Operation::Tag, Operation::RemoveTag, Operation::Delete],
            augment: Augment::StorageLens,
            ..base.clone()
        },
        ResourceKind {
            type_name: "bedrock-custom-model",
            service: "bedrock",
            enum_op: "list_custom_models",
            enum_key: "modelSummaries",
            detail_op: Some("get_custom_model"),
            id: "modelName",
            arn: Some("modelArn"),
            tag_shape: Some(TagShape::Camel),
            operations: &[Operation::Tag, Operation::RemoveTag, Operation::Delete],
            ..base.clone()
        },
        ResourceKind {
            type_name: "bedrock-knowledge-base",
            service: "bedrock-agent",
            enum_op: "list_knowledge_bases",
            enum_key: "knowledgeBaseSummaries",
            detail_op: Some("get_knowledge_base"),
            id: "knowledgeBaseId",
            arn: Some("knowledgeBaseArn"),
            tag_shape: Some(TagShape::Map),
            operations: &[Operation::Tag, Operation::RemoveTag, Operation::Delete],
            augment: Augment::Hoist("knowledgeBase"),
            ..base.clone()
        },
        ResourceKind {
            type_name: "globalaccelerator",
            service: "globalaccelerator",
            enum_op: "list_accelerators",
            enum_key: "Accelerators",
            arn: Some("AcceleratorArn"),
            cfn_type: Some("AWS::GlobalAccelerator::Accelerator"),
            ..base.clone()
        },
        ResourceKind {
            type_name: "memorydb",
            service: "memorydb",
            enum_op: "describe_clusters",
            enum_key: "Clusters",
            arn: Some("ARN"),
            cfn_type: Some("AWS::MemoryDB::Cluster"),
            ..base.clone()
        },
        ResourceKind {
            type_name: "memorydb-snapshot",
            service: "memorydb",
            enum_op: "describe_snapshots",
            enum_key: "Snapshots",
            arn: Some("ARN"),
            ..base.clone()
        },
        ResourceKind {
            type_name: "memorydb-acl",
            service: "memorydb",
            enum_op: "describe_acls",
            enum_key: "ACLs",
            arn: Some("ARN"),
            cfn_type: Some("AWS::MemoryDB::ACL"),
            delete_after: &["memorydb"],
            ..base.clone()
        },
        ResourceKind {
            type_name: "memorydb-user",
            service: "memorydb",
            enum_op: "describe_users",
            enum_key: "Users",
            arn: Some("ARN"),
            cfn_type: Some("AWS::MemoryDB::User"),
            delete_after: &["memorydb-acl"],
            ..base
        },
    ]
}

/// The resource types this engine knows, validated once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    kinds: Vec<ResourceKind>,
    deletion_order: Vec<&'static str>,
}

impl Catalog {
    pub fn aws() -> Result<Self, EngineError> { Self::new(kinds()) }

    pub fn new(kinds: Vec<ResourceKind>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for k in &kinds {
            if !seen.insert(k.type_name) {
                return Err(EngineError::InvalidCatalog(format!("duplicate resource type '{}'", k.type_name)));
            }
            if k.tag_shape.is_none() && k.operations.iter().any(Operation::writes_tags) {
                return Err(EngineError::InvalidCatalog(format!("'{}' has tag actions but no tag shape", k.type_name)));
            }
            if k.supports(Operation::MarkForOp) && !k.supports(Operation::Tag) {
                return Err(EngineError::InvalidCatalog(format!("'{}' marks for op without tag support", k.type_name)));
            }
        }
        let deletion_order =
            order_by_dependencies(kinds.iter().map(|k| (k.type_name, k.delete_after.iter().copied())))?;
        Ok(Self { kinds, deletion_order })
    }

    pub fn kinds(&self) -> &[ResourceKind] { &self.kinds }

    pub fn get(&self, type_name: &str) -> Result<&ResourceKind, EngineError> {
        let name = type_name.strip_prefix("aws.").unwrap_or(type_name);
        self.kinds.iter().find(|k| k.type_name == name).ok_or_else(|| EngineError::UnknownKind(type_name.to_string()))
    }

    pub fn require(&self, type_name: &str, op: Operation) -> Result<&ResourceKind, EngineError> {
        let kind = self.get(type_name)?;
        if !kind.supports(op) {
            return Err(EngineError::Unsupported { kind: kind.type_name.to_string(), operation: op.name().to_string() });
        }
        Ok(kind)
    }

    /// Kinds ordered so that deleting in sequence never trips over a dependent.
    pub fn deletion_order(&self) -> &[&'static str] { &self.deletion_order }

    pub fn to_json(&self) -> Json {
        json!({
            "kinds": self.deletion_order.iter().filter_map(|n| self.get(n).ok()).collect::<Vec<_>>(),
        })
    }
}
