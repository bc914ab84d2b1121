//! Replay of recorded provider state ("flight data").
//!
//! Tags are held in each resource type's own wire shape, so every read and
//! write goes through the same decode/encode a live client would use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use govtag_core::{Ingest, ProviderClient, ProviderError, ResourceRef, SessionFactory, TagSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::{shape, Catalog, ResourceKind};

/// Responses recorded for one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recorded {
    /// The item as returned by the enumeration call (or a config snapshot item).
    #[serde(default)]
    pub listed: Json,
    /// The detail call response, when the type has one.
    #[serde(default)]
    pub detail: Option<Json>,
    /// Tag payload in the type's wire shape.
    #[serde(default)]
    pub tags: Option<Json>,
    /// Side-call responses keyed by call name, e.g. `describe_logging_configuration`.
    #[serde(default)]
    pub responses: BTreeMap<String, Json>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    #[default]
    Describe,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightData {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<Recorded>>,
    /// Ids that were enumerated but are gone by the time they are mutated.
    #[serde(default)]
    pub missing: BTreeSet<String>,
    /// Ids whose mutating calls fail with the recorded error.
    #[serde(default)]
    pub errors: BTreeMap<String, RecordedError>,
}

impl FlightData {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("read flight data {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("parse flight data {}", path.display()))
    }
}

struct Entry {
    resource: ResourceRef,
    recorded: Recorded,
    overlay: JsonMap<String, Json>,
}

struct Flight {
    catalog: Catalog,
    source: Source,
    ingest: Ingest,
    entries: Mutex<BTreeMap<&'static str, Vec<Entry>>>,
    missing: Mutex<BTreeSet<String>>,
    errors: BTreeMap<String, RecordedError>,
    calls: Mutex<Vec<String>>,
    open: AtomicUsize,
}

fn describe(kind: &ResourceKind, source: Source, rec: &Recorded, ingest: Ingest) -> Result<Json> {
    match source {
        Source::Describe => kind.describe(rec, ingest),
        Source::Config => {
            let listed = kind.load_config_item(rec.listed.clone())?;
            kind.describe(&Recorded { listed, detail: None, ..rec.clone() }, ingest)
        }
    }
}

impl Flight {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<&'static str, Vec<Entry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn kind(&self, name: &str) -> Result<&ResourceKind, ProviderError> {
        self.catalog.get(name).map_err(|e| ProviderError::Validation(e.to_string()))
    }

    fn record_call(&self, call: &str, target: &ResourceRef) {
        debug!(call, kind = %target.kind, resource = %target.id, "replaying call");
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(format!("{call} {}/{}", target.kind, target.id));
    }

    /// Apply recorded failures, then run `f` against the resource's entry.
    fn with_entry<T>(&self, call: &str, target: &ResourceRef, f: impl FnOnce(&mut Entry) -> Result<T, ProviderError>) -> Result<T, ProviderError> {
        self.record_call(call, target);
        let kind = self.kind(&target.kind)?.type_name;
        if let Some(e) = self.errors.get(&target.id.0) {
            return Err(ProviderError::from_code(&e.code, e.message.clone()));
        }
        let mut entries = self.entries();
        let list = entries.get_mut(kind);
        if self.missing.lock().unwrap_or_else(|e| e.into_inner()).remove(&target.id.0) {
            if let Some(list) = list { list.retain(|e| e.resource.id != target.id); }
            return Err(ProviderError::not_found(format!("{kind} {}", target.id)));
        }
        let entry = list
            .and_then(|l| l.iter_mut().find(|e| e.resource.id == target.id))
            .ok_or_else(|| ProviderError::not_found(format!("{kind} {}", target.id)))?;
        f(entry)
    }
}

#[async_trait]
impl ProviderClient for Flight {
    async fn list(&self, kind: &str) -> Result<Vec<Json>, ProviderError> {
        let kind = self.kind(kind)?;
        debug!(call = kind.enum_op, kind = kind.type_name, "replaying enumeration");
        let entries = self.entries();
        let mut out = Vec::new();
        for e in entries.get(kind.type_name).map(Vec::as_slice).unwrap_or_default() {
            let mut record = describe(kind, self.source, &e.recorded, self.ingest)
                .map_err(|err| ProviderError::Other(format!("{err:#}")))?;
            if let Some(o) = record.as_object_mut() { o.extend(e.overlay.clone()); }
            out.push(record);
        }
        Ok(out)
    }

    async fn get_tags(&self, target: &ResourceRef) -> Result<TagSet, ProviderError> {
        let shape = self.kind(&target.kind)?.tag_shape;
        let ingest = self.ingest;
        self.with_entry("get_tags", target, |e| {
            let shape = shape.ok_or_else(|| ProviderError::Validation(format!("{} is not taggable", target.kind)))?;
            shape::decode(shape, e.recorded.tags.as_ref().unwrap_or(&Json::Null), ingest)
                .map_err(|err| ProviderError::Validation(err.to_string()))
        })
    }

    async fn put_tags(&self, target: &ResourceRef, tags: &TagSet) -> Result<(), ProviderError> {
        let shape = self.kind(&target.kind)?.tag_shape;
        self.with_entry("put_tags", target, |e| {
            let shape = shape.ok_or_else(|| ProviderError::Validation(format!("{} is not taggable", target.kind)))?;
            e.recorded.tags = Some(shape::encode(shape, tags));
            Ok(())
        })
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ProviderError> {
        self.with_entry("delete", target, |_| Ok(()))?;
        let kind = self.kind(&target.kind)?.type_name;
        if let Some(list) = self.entries().get_mut(kind) { list.retain(|e| e.resource.id != target.id); }
        Ok(())
    }

    async fn update(&self, target: &ResourceRef, change: &Json) -> Result<(), ProviderError> {
        let fields = change
            .as_object()
            .ok_or_else(|| ProviderError::Validation("update payload must be an object".into()))?;
        self.with_entry("update", target, |e| {
            e.overlay.extend(fields.clone());
            Ok(())
        })
    }
}

/// In-memory provider replaying a `FlightData` recording.
#[derive(Clone)]
pub struct FlightProvider {
    inner: Arc<Flight>,
}

impl FlightProvider {
    pub fn new(catalog: Catalog, data: FlightData, ingest: Ingest) -> Result<Self> {
        let mut entries: BTreeMap<&'static str, Vec<Entry>> = BTreeMap::new();
        for (name, recorded) in data.resources {
            let kind = catalog.get(&name)?;
            for rec in recorded {
                kind.check_recorded(&rec)?;
                let record = describe(kind, data.source, &rec, ingest).with_context(|| format!("describe recorded {name}"))?;
                let resource = kind.resource_ref(&record)?;
                entries.entry(kind.type_name).or_default().push(Entry { resource, recorded: rec, overlay: JsonMap::new() });
            }
        }
        let flight = Flight {
            catalog,
            source: data.source,
            ingest,
            entries: Mutex::new(entries),
            missing: Mutex::new(data.missing),
            errors: data.errors,
            calls: Mutex::new(Vec::new()),
            open: AtomicUsize::new(0),
        };
        Ok(Self { inner: Arc::new(flight) })
    }

    pub fn catalog(&self) -> &Catalog { &self.inner.catalog }

    pub fn client(&self) -> &dyn ProviderClient { self.inner.as_ref() }

    /// Current resources of a type, as policies would see them.
    pub async fn resources(&self, kind: &str) -> Result<Vec<(ResourceRef, Json)>> {
        let k = self.inner.catalog.get(kind)?;
        let records = self.inner.list(kind).await?;
        records.into_iter().map(|r| Ok((k.resource_ref(&r)?, r))).collect()
    }

    /// Mutating and reading calls replayed so far, as `"<call> <kind>/<id>"`.
    pub fn calls(&self) -> Vec<String> { self.inner.calls.lock().unwrap_or_else(|e| e.into_inner()).clone() }

    pub fn open_sessions(&self) -> usize { self.inner.open.load(Ordering::SeqCst) }
}

impl SessionFactory for FlightProvider {
    fn acquire(&self, service: &str) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        if !self.inner.catalog.kinds().iter().any(|k| k.service == service) {
            return Err(ProviderError::Validation(format!("unknown service '{service}'")));
        }
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.clone())
    }

    fn release(&self, _service: &str) { self.inner.open.fetch_sub(1, Ordering::SeqCst); }
}
