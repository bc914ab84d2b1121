//! Tag filters and delayed-action markers evaluated against described resources.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use govtag_aws::shape::{self, TagShape};
use govtag_core::{Ingest, ResourceRef, TagSet};
use regex::Regex;
use serde_json::Value as Json;

mod access;
pub use access::CrossAccount;

pub const DEFAULT_MARK_TAG: &str = "maid_status";
pub const DEFAULT_MARK_MESSAGE: &str = "Resource does not meet policy";

#[derive(Debug, Clone)]
pub enum TagFilter {
    Absent(String),
    Present(String),
    Equals(String, String),
    Matches(String, Regex),
}

impl TagFilter {
    /// Parse a policy pair such as `"tag:owner": "policy"`.
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let Some(tag) = key.strip_prefix("tag:") else { anyhow::bail!("filter key '{key}' must start with 'tag:'") };
        if tag.is_empty() { anyhow::bail!("filter key '{key}' names no tag") }
        let tag = tag.to_string();
        Ok(match value {
            "absent" => TagFilter::Absent(tag),
            "present" => TagFilter::Present(tag),
            v => match v.strip_prefix("regex:") {
                Some(re) => TagFilter::Matches(tag, Regex::new(re).with_context(|| format!("bad regex for '{key}'"))?),
                None => TagFilter::Equals(tag, v.to_string()),
            },
        })
    }

    /// Parse the `tag:key=value` form used on the command line.
    pub fn parse_expr(expr: &str) -> Result<Self> {
        let (key, value) = expr.split_once('=').with_context(|| format!("filter '{expr}' is not tag:key=value"))?;
        Self::parse(key, value)
    }

    pub fn matches(&self, tags: &TagSet) -> bool {
        match self {
            TagFilter::Absent(k) => !tags.contains_key(k),
            TagFilter::Present(k) => tags.contains_key(k),
            TagFilter::Equals(k, v) => tags.get(k) == Some(v.as_str()),
            TagFilter::Matches(k, re) => tags.get(k).is_some_and(|v| re.is_match(v)),
        }
    }
}

/// Stamp resources with a tag naming an action and the date it becomes due.
#[derive(Debug, Clone)]
pub struct MarkForOp {
    pub tag: String,
    pub op: String,
    pub days: u32,
    pub message: String,
}

impl MarkForOp {
    pub fn new(op: impl Into<String>, days: u32) -> Self {
        Self { tag: DEFAULT_MARK_TAG.into(), op: op.into(), days, message: DEFAULT_MARK_MESSAGE.into() }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn tags_at(&self, now: DateTime<Utc>) -> Result<TagSet> {
        let due = TimeDelta::try_days(i64::from(self.days))
            .and_then(|d| now.checked_add_signed(d))
            .with_context(|| format!("mark-for-op {} days from {now} is out of range", self.days))?;
        let value = format!("{}: {}@{}", self.message, self.op, due.format("%Y/%m/%d"));
        Ok([(self.tag.clone(), value)].into_iter().collect())
    }
}

/// Match resources whose mark names `op` and is due, allowing `skew` early.
#[derive(Debug, Clone)]
pub struct MarkedForOp {
    pub tag: String,
    pub op: String,
    pub skew: i64,
    pub skew_hours: i64,
}

fn parse_due(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H%M UTC").ok().map(|dt| Utc.from_utc_datetime(&dt))
}

impl MarkedForOp {
    pub fn new(op: impl Into<String>) -> Self {
        Self { tag: DEFAULT_MARK_TAG.into(), op: op.into(), skew: 0, skew_hours: 0 }
    }

    pub fn matches(&self, tags: &TagSet, now: DateTime<Utc>) -> bool {
        let Some(v) = tags.get(&self.tag) else { return false };
        let Some((_, target)) = v.rsplit_once(':') else { return false };
        let Some((op, date)) = target.trim().split_once('@') else { return false };
        if op != self.op { return false; }
        let Some(due) = parse_due(date.trim()) else { return false };
        // an unrepresentable skew is unbounded in its sign's direction
        let early = TimeDelta::try_days(self.skew)
            .zip(TimeDelta::try_hours(self.skew_hours))
            .and_then(|(d, h)| d.checked_add(&h))
            .and_then(|skew| due.checked_sub_signed(skew));
        match early {
            Some(from) => now >= from,
            None => self.skew > 0 || self.skew_hours > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOp { Eq, Ne, Gt, Gte, Lt, Lte }

impl CountOp {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "eq" | "equal" => CountOp::Eq,
            "ne" | "not-equal" => CountOp::Ne,
            "gt" | "greater-than" => CountOp::Gt,
            "gte" | "ge" => CountOp::Gte,
            "lt" | "less-than" => CountOp::Lt,
            "lte" | "le" => CountOp::Lte,
            other => anyhow::bail!("unknown count op '{other}'"),
        })
    }

    fn test(self, lhs: usize, rhs: usize) -> bool {
        match self {
            CountOp::Eq => lhs == rhs,
            CountOp::Ne => lhs != rhs,
            CountOp::Gt => lhs > rhs,
            CountOp::Gte => lhs >= rhs,
            CountOp::Lt => lhs < rhs,
            CountOp::Lte => lhs <= rhs,
        }
    }
}

/// Match a list attached to the record (e.g. a firewall's log destinations)
/// by the attributes of its items.
///
/// Without `count` the record matches when any item carries every attr.
/// With `count` the number of such items is compared instead.
#[derive(Debug, Clone)]
pub struct ListItemFilter {
    pub key: String,
    pub attrs: Vec<(String, Json)>,
    pub count: Option<(CountOp, usize)>,
}

impl ListItemFilter {
    pub fn new(key: impl Into<String>, attrs: Vec<(String, Json)>) -> Self {
        Self { key: key.into(), attrs, count: None }
    }

    pub fn with_count(mut self, op: CountOp, n: usize) -> Self {
        self.count = Some((op, n));
        self
    }

    fn item_matches(&self, item: &Json) -> bool {
        self.attrs.iter().all(|(k, v)| k.split('.').try_fold(item, |cur, seg| cur.get(seg)) == Some(v))
    }

    pub fn matches(&self, record: &Json) -> bool {
        let items = record.get(&self.key).and_then(Json::as_array).map(Vec::as_slice).unwrap_or_default();
        let hits = items.iter().filter(|i| self.item_matches(i)).count();
        match self.count {
            Some((op, n)) => op.test(hits, n),
            None => hits > 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    Tag(TagFilter),
    MarkedForOp(MarkedForOp),
    ListItem(ListItemFilter),
    CrossAccount(CrossAccount),
}

impl Filter {
    fn matches(&self, resource: &ResourceRef, record: &Json, tags: &TagSet, now: DateTime<Utc>) -> bool {
        match self {
            Filter::Tag(t) => t.matches(tags),
            Filter::MarkedForOp(m) => m.matches(tags, now),
            Filter::ListItem(l) => l.matches(record),
            Filter::CrossAccount(c) => c.matches(resource, record),
        }
    }
}

/// A conjunction of filters over described resources.
#[derive(Debug, Clone, Default)]
pub struct Policy { pub filters: Vec<Filter> }

impl Policy {
    pub fn new(filters: Vec<Filter>) -> Self { Self { filters } }

    /// Pick the described records that satisfy every filter. Tags are read
    /// from the record's `{Key, Value}` `Tags` list.
    pub fn select(&self, records: &[(ResourceRef, Json)], now: DateTime<Utc>) -> Result<Vec<ResourceRef>> {
        let mut out = Vec::new();
        for (r, record) in records {
            let raw = record.get("Tags").unwrap_or(&Json::Null);
            let tags = shape::decode(TagShape::Pascal, raw, Ingest::LastWins)
                .with_context(|| format!("tags of {} {}", r.kind, r.id))?;
            if self.filters.iter().all(|f| f.matches(r, record, &tags, now)) { out.push(r.clone()); }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(pairs: &[(&str, &str)]) -> TagSet { pairs.iter().copied().collect() }
    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap() }

    #[test]
    fn tag_filters() {
        let t = tags(&[("owner", "policy"), ("env", "prod-eu")]);
        assert!(TagFilter::parse("tag:owner", "policy").unwrap().matches(&t));
        assert!(!TagFilter::parse("tag:owner", "c7n").unwrap().matches(&t));
        assert!(TagFilter::parse("tag:foo", "absent").unwrap().matches(&t));
        assert!(TagFilter::parse("tag:env", "present").unwrap().matches(&t));
        assert!(TagFilter::parse("tag:env", "regex:^prod-").unwrap().matches(&t));
        assert!(!TagFilter::parse("tag:foo", "regex:.*").unwrap().matches(&t));
    }

    #[test]
    fn bad_filters_are_rejected() {
        assert!(TagFilter::parse("owner", "policy").is_err());
        assert!(TagFilter::parse("tag:", "policy").is_err());
        assert!(TagFilter::parse("tag:env", "regex:(").is_err());
        assert!(TagFilter::parse_expr("tag:owner").is_err());
        assert!(matches!(TagFilter::parse_expr("tag:owner=a=b").unwrap(), TagFilter::Equals(k, v) if k == "owner" && v == "a=b"));
    }

    #[test]
    fn mark_for_op_stamps_due_date() {
        let mark = MarkForOp::new("delete", 1).with_tag("custodian_cleanup");
        assert_eq!(
            mark.tags_at(at(2024, 2, 28)).unwrap(),
            tags(&[("custodian_cleanup", "Resource does not meet policy: delete@2024/02/29")])
        );
        assert_eq!(MarkForOp::new("stop", 0).tags_at(at(2024, 1, 1)).unwrap().keys().collect::<Vec<_>>(), ["maid_status"]);
    }

    #[test]
    fn mark_for_op_rejects_unrepresentable_due_date() {
        assert!(MarkForOp::new("delete", u32::MAX).tags_at(Utc::now()).is_err());
    }

    #[test]
    fn marked_for_op_survives_huge_skew() {
        let marked = tags(&[("maid_status", "Resource does not meet policy: delete@2024/03/10")]);
        let f = MarkedForOp { skew: 10_000_000_000_000, ..MarkedForOp::new("delete") };
        assert!(f.matches(&marked, at(2024, 3, 1)));
        let f = MarkedForOp { skew: i64::MIN, ..MarkedForOp::new("delete") };
        assert!(!f.matches(&marked, at(2024, 3, 10)));
        let f = MarkedForOp { skew_hours: i64::MAX, ..MarkedForOp::new("delete") };
        assert!(f.matches(&marked, at(2024, 3, 1)));
    }

    #[test]
    fn marked_for_op_honours_date_op_and_skew() {
        let marked = tags(&[("custodian_cleanup", "Resource does not meet policy: delete@2024/03/10")]);
        let mut f = MarkedForOp::new("delete");
        f.tag = "custodian_cleanup".into();

        assert!(!f.matches(&marked, at(2024, 3, 8)));
        assert!(f.matches(&marked, at(2024, 3, 10)));
        f.skew = 3;
        assert!(f.matches(&marked, at(2024, 3, 8)));

        let mut other = f.clone();
        other.op = "stop".into();
        assert!(!other.matches(&marked, at(2024, 3, 10)));
        assert!(!f.matches(&tags(&[("custodian_cleanup", "garbage")]), at(2024, 3, 10)));
        assert!(!f.matches(&TagSet::new(), at(2024, 3, 10)));
    }

    #[test]
    fn marked_for_op_reads_hour_precision() {
        let marked = tags(&[("maid_status", "Resource does not meet policy: delete@2024/03/10 1800 UTC")]);
        let mut f = MarkedForOp::new("delete");
        assert!(!f.matches(&marked, at(2024, 3, 10)));
        f.skew_hours = 6;
        assert!(f.matches(&marked, at(2024, 3, 10)));
    }

    #[test]
    fn mark_then_match_round_trip() {
        let now = at(2024, 5, 1);
        let stamped = MarkForOp::new("delete", 1).tags_at(now).unwrap();
        let f = MarkedForOp { skew: 3, ..MarkedForOp::new("delete") };
        assert!(f.matches(&stamped, now));
    }

    #[test]
    fn policy_selects_by_tags() {
        let records = vec![
            (ResourceRef::new("memorydb", "a"), json!({ "Tags": [{ "Key": "owner", "Value": "policy" }] })),
            (ResourceRef::new("memorydb", "b"), json!({ "Tags": [] })),
            (ResourceRef::new("memorydb", "c"), json!({ "Name": "c" })),
        ];
        let p = Policy::new(vec![Filter::Tag(TagFilter::parse("tag:owner", "policy").unwrap())]);
        let ids: Vec<_> = p.select(&records, at(2024, 1, 1)).unwrap().into_iter().map(|r| r.id.0).collect();
        assert_eq!(ids, ["a"]);
        assert_eq!(Policy::default().select(&records, at(2024, 1, 1)).unwrap().len(), 3);
    }

    #[test]
    fn list_items_match_by_attrs() {
        let record = json!({ "Logging": [
            { "LogType": "ALERT", "LogDestinationType": "S3", "LogDestination": { "bucketName": "logs" } },
            { "LogType": "FLOW", "LogDestinationType": "CloudWatchLogs" },
        ] });
        let alert = ListItemFilter::new("Logging", vec![("LogType".into(), json!("ALERT"))]);
        assert!(alert.matches(&record));
        let nested = ListItemFilter::new("Logging", vec![("LogDestination.bucketName".into(), json!("logs"))]);
        assert!(nested.matches(&record));
        let tls = ListItemFilter::new("Logging", vec![("LogType".into(), json!("TLS"))]);
        assert!(!tls.matches(&record));
        assert!(tls.clone().with_count(CountOp::Eq, 0).matches(&record));
        assert!(ListItemFilter::new("Logging", vec![]).with_count(CountOp::Gte, 2).matches(&record));
        assert!(!alert.matches(&json!({ "Name": "no-logging" })));
    }

    #[test]
    fn count_ops_parse() {
        assert_eq!(CountOp::parse("gte").unwrap(), CountOp::Gte);
        assert_eq!(CountOp::parse("less-than").unwrap(), CountOp::Lt);
        assert!(CountOp::parse("between").is_err());
    }
}
