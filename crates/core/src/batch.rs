//! Per-resource action loops.
//!
//! Each loop runs with bounded concurrency over one session and never stops
//! early: every target ends up with an `Outcome` in the `BatchReport`.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value as Json;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::error::{BatchError, ProviderError};
use crate::reconcile::{plan, TagChange};
use crate::session::{ProviderClient, Session};
use crate::tags::{TagKeys, TagSet};
use crate::{ResourceId, ResourceRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "kebab-case")]
pub enum Outcome {
    Applied,
    /// The reconciled tags already matched; no write was issued.
    Unchanged,
    /// The provider no longer knows the resource. Not an error.
    NotFound,
    Failed(ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub resource: ResourceId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub action: String,
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize { self.items.iter().filter(|i| f(&i.outcome)).count() }

    pub fn applied(&self) -> usize { self.count(|o| matches!(o, Outcome::Applied)) }
    pub fn unchanged(&self) -> usize { self.count(|o| matches!(o, Outcome::Unchanged)) }
    pub fn not_found(&self) -> usize { self.count(|o| matches!(o, Outcome::NotFound)) }
    pub fn failed(&self) -> usize { self.count(|o| matches!(o, Outcome::Failed(_))) }

    pub fn outcome_of(&self, id: &str) -> Option<&Outcome> {
        self.items.iter().find(|i| i.resource.0 == id).map(|i| &i.outcome)
    }

    /// Turn hard failures into an error; not-found skips stay successful.
    pub fn into_result(self) -> Result<BatchReport, BatchError> {
        let first = self.items.iter().find_map(|i| match &i.outcome {
            Outcome::Failed(e) => Some((i.resource.0.clone(), e.clone())),
            _ => None,
        });
        match first {
            None => Ok(self),
            Some((resource, source)) => Err(BatchError {
                action: self.action.clone(),
                failed: self.failed(),
                total: self.items.len(),
                resource,
                source,
            }),
        }
    }
}

fn settle(action: &str, target: &ResourceRef, result: Result<Outcome, ProviderError>) -> ItemReport {
    let outcome = match result {
        Ok(o) => {
            debug!(action, kind = %target.kind, resource = %target.id.0, outcome = ?o, "resource processed");
            o
        }
        Err(e) if e.is_not_found() => {
            warn!(action, kind = %target.kind, resource = %target.id.0, "resource not found, skipping");
            Outcome::NotFound
        }
        Err(e) => {
            warn!(action, kind = %target.kind, resource = %target.id.0, error = %e, "resource action failed");
            Outcome::Failed(e)
        }
    };
    ItemReport { resource: target.id.clone(), outcome }
}

async fn run_each<'a, I, Fut>(action: &str, concurrency: usize, work: I) -> BatchReport
where
    I: Iterator<Item = (&'a ResourceRef, Fut)>,
    Fut: Future<Output = Result<Outcome, ProviderError>>,
{
    let items: Vec<ItemReport> = stream::iter(work.map(|(target, fut)| async move { (target, fut.await) }))
        .buffered(concurrency.max(1))
        .map(|(target, result)| settle(action, target, result))
        .collect()
        .await;
    let report = BatchReport { action: action.to_string(), items };
    info!(
        action,
        total = report.items.len(),
        applied = report.applied(),
        unchanged = report.unchanged(),
        not_found = report.not_found(),
        failed = report.failed(),
        "batch finished"
    );
    report
}

async fn tag_one(
    client: &dyn ProviderClient,
    target: &ResourceRef,
    to_add: &TagSet,
    to_remove: &TagKeys,
) -> Result<Outcome, ProviderError> {
    let existing = client.get_tags(target).await?;
    match plan(&existing, to_add, to_remove) {
        TagChange::Noop => Ok(Outcome::Unchanged),
        TagChange::Write(tags) => {
            client.put_tags(target, &tags).await?;
            Ok(Outcome::Applied)
        }
    }
}

/// Read each resource's tags fresh, reconcile, and write back only on change.
pub async fn tag_each(
    session: &Session<'_>,
    targets: &[ResourceRef],
    to_add: &TagSet,
    to_remove: &TagKeys,
    concurrency: usize,
) -> BatchReport {
    let action = if to_add.is_empty() { "remove-tag" } else { "tag" };
    let client = session.client();
    let work = targets.iter().map(|t| (t, tag_one(client, t, to_add, to_remove)));
    run_each(action, concurrency, work).await
}

pub async fn delete_each(session: &Session<'_>, targets: &[ResourceRef], concurrency: usize) -> BatchReport {
    let client = session.client();
    let work = targets.iter().map(|t| (t, async move { client.delete(t).await.map(|_| Outcome::Applied) }));
    run_each("delete", concurrency, work).await
}

pub async fn update_each(
    session: &Session<'_>,
    action: &str,
    targets: &[ResourceRef],
    change: &Json,
    concurrency: usize,
) -> BatchReport {
    let client = session.client();
    let work = targets.iter().map(|t| (t, async move { client.update(t, change).await.map(|_| Outcome::Applied) }));
    run_each(action, concurrency, work).await
}
