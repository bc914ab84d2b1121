use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value as Json};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use govtag_aws::{shape, Annotation, Catalog, FlightData, FlightProvider, Operation, TagShape};
use govtag_core::{delete_each, reconcile, tag_each, update_each, BatchReport, Ingest, Session, TagKeys, TagSet};
use govtag_policy::{CrossAccount, Filter, ListItemFilter, MarkForOp, MarkedForOp, Policy, TagFilter};

mod settings;
use settings::{LogFormat, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about="govtag: reconcile and act on cloud resource tags")]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Resources processed at once
    #[arg(long, global = true, value_parser = parse_concurrency)]
    concurrency: Option<usize>,

    #[arg(long, value_enum, global = true)]
    ingest: Option<IngestArg>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum IngestArg { Strict, LastWins }

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum ShapeArg { Pascal, Camel, Map }

impl From<ShapeArg> for TagShape {
    fn from(s: ShapeArg) -> Self {
        match s { ShapeArg::Pascal => TagShape::Pascal, ShapeArg::Camel => TagShape::Camel, ShapeArg::Map => TagShape::Map }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compute the tag set to write back for one resource
    Reconcile {
        /// Current tags as provider JSON ('-' for stdin)
        #[arg(long)] existing: PathBuf,
        #[arg(long, value_enum, default_value_t=ShapeArg::Pascal)] shape: ShapeArg,
        #[arg(long="add", value_parser=parse_tag)] add: Vec<(String, String)>,
        #[arg(long="remove")] remove: Vec<String>,
    },
    /// Print the resource types in deletion order
    Catalog,
    /// Run tag, mark, update and delete actions against recorded provider data
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Default)]
struct ReplayArgs {
    #[arg(long)] flight: PathBuf,
    #[arg(long)] kind: String,
    /// tag:key=value, tag:key=absent, tag:key=present or tag:key=regex:<re>
    #[arg(long="filter")] filters: Vec<String>,
    /// Only firewalls with a log destination carrying every key=value given
    #[arg(long="logging", value_parser=parse_tag)] logging: Vec<(String, String)>,
    /// Only resources whose policy grants access to another account
    #[arg(long, default_value_t=false)] cross_account: bool,
    /// Accounts not counted as foreign by --cross-account
    #[arg(long="allow-account")] allowed_accounts: Vec<String>,
    /// Only resources marked for this op and due
    #[arg(long)] marked_for_op: Option<String>,
    #[arg(long, default_value_t=0)] skew: i64,
    #[arg(long="add", value_parser=parse_tag)] add: Vec<(String, String)>,
    #[arg(long="remove")] remove: Vec<String>,
    /// op:days
    #[arg(long, value_parser=parse_mark)] mark: Option<(String, u32)>,
    #[arg(long)] mark_tag: Option<String>,
    #[arg(long)] delete_protection: Option<bool>,
    #[arg(long, default_value_t=false)] delete: bool,
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

fn parse_mark(s: &str) -> Result<(String, u32), String> {
    let (op, days) = s.split_once(':').ok_or_else(|| format!("expected op:days, got '{s}'"))?;
    let days = days.parse().map_err(|_| format!("days must be a non-negative integer, got '{days}'"))?;
    Ok((op.to_string(), days))
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    match s.parse() {
        Ok(0) => Err("concurrency must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("concurrency must be a positive integer, got '{s}'")),
    }
}

/// Command-line tag pairs go through the same ingestion rules as provider payloads.
fn tag_pairs(pairs: Vec<(String, String)>, ingest: Ingest) -> Result<TagSet> {
    TagSet::from_pairs(pairs.into_iter().map(|(k, v)| (Some(k), v)), ingest).context("--add tags")
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init(),
    }
}

fn reconcile_payload(raw: &Json, shape: TagShape, ingest: Ingest, add: &TagSet, remove: &TagKeys) -> Result<Json> {
    let existing = shape::decode(shape, raw, ingest).context("existing tags")?;
    let result = reconcile(&existing, add, remove);
    Ok(json!({ "changed": result != existing, "tags": shape::encode(shape, &result) }))
}

fn read_input(path: &Path) -> Result<Json> {
    let raw = if path.as_os_str() == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s)?;
        s
    } else {
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    };
    serde_json::from_str(&raw).context("existing tags are not JSON")
}

fn print(v: &Json) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

/// Select resources of one kind, run the requested actions in order and
/// return the printable summary with the batch reports.
async fn replay(provider: &FlightProvider, args: ReplayArgs, settings: &Settings, now: DateTime<Utc>) -> Result<(Json, Vec<BatchReport>)> {
    let k = provider.catalog().get(&args.kind)?.clone();

    let mut policy = Policy::default();
    for f in &args.filters { policy.filters.push(Filter::Tag(TagFilter::parse_expr(f)?)); }
    if !args.logging.is_empty() {
        let attrs = args.logging.into_iter().map(|(key, v)| (key, Json::String(v))).collect();
        policy.filters.push(Filter::ListItem(ListItemFilter::new(Annotation::Logging.key(), attrs)));
    }
    if args.cross_account {
        policy.filters.push(Filter::CrossAccount(CrossAccount::new(args.allowed_accounts)));
    }
    if let Some(op) = args.marked_for_op {
        policy.filters.push(Filter::MarkedForOp(MarkedForOp { skew: args.skew, ..MarkedForOp::new(op) }));
    }
    let selected = policy.select(&provider.resources(k.type_name).await?, now)?;
    info!(kind = k.type_name, selected = selected.len(), "resources selected");

    let session = Session::open(provider, k.service)?;
    let n = settings.concurrency;
    let mut reports: Vec<BatchReport> = Vec::new();
    if !args.add.is_empty() || !args.remove.is_empty() {
        let op = if args.add.is_empty() { Operation::RemoveTag } else { Operation::Tag };
        provider.catalog().require(k.type_name, op)?;
        let add = tag_pairs(args.add, settings.ingest)?;
        let remove: TagKeys = args.remove.into_iter().collect();
        reports.push(tag_each(&session, &selected, &add, &remove, n).await);
    }
    if let Some((op, days)) = args.mark {
        provider.catalog().require(k.type_name, Operation::MarkForOp)?;
        let mut m = MarkForOp::new(op, days);
        if let Some(t) = args.mark_tag { m = m.with_tag(t); }
        let mut report = tag_each(&session, &selected, &m.tags_at(now)?, &TagKeys::new(), n).await;
        report.action = Operation::MarkForOp.name().into();
        reports.push(report);
    }
    if let Some(state) = args.delete_protection {
        let op = Operation::UpdateDeleteProtection;
        provider.catalog().require(k.type_name, op)?;
        reports.push(update_each(&session, op.name(), &selected, &json!({ "DeleteProtection": state }), n).await);
    }
    if args.delete {
        provider.catalog().require(k.type_name, Operation::Delete)?;
        reports.push(delete_each(&session, &selected, n).await);
    }
    drop(session);

    let remaining: Vec<Json> = provider.resources(k.type_name).await?.into_iter().map(|(_, r)| r).collect();
    let summary = json!({
        "selected": selected.iter().map(|r| r.id.0.as_str()).collect::<Vec<_>>(),
        "reports": reports,
        "resources": remaining,
    });
    Ok((summary, reports))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(f) = cli.log_format { settings.log_format = f; }
    if let Some(c) = cli.concurrency { settings.concurrency = c; }
    if let Some(i) = cli.ingest {
        settings.ingest = match i { IngestArg::Strict => Ingest::Strict, IngestArg::LastWins => Ingest::LastWins };
    }
    init_tracing(settings.log_format);

    // validated once, before any command runs
    let catalog = Catalog::aws()?;

    match cli.cmd {
        Cmd::Reconcile { existing, shape, add, remove } => {
            let raw = read_input(&existing)?;
            let add = tag_pairs(add, settings.ingest)?;
            let remove: TagKeys = remove.into_iter().collect();
            print(&reconcile_payload(&raw, shape.into(), settings.ingest, &add, &remove)?)?;
        }
        Cmd::Catalog => print(&catalog.to_json())?,
        Cmd::Replay(args) => {
            let data = FlightData::load(&args.flight)?;
            let provider = FlightProvider::new(catalog, data, settings.ingest)?;
            let (summary, reports) = replay(&provider, args, &settings, Utc::now()).await?;
            print(&summary)?;
            for r in reports { r.into_result()?; }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_assignments() {
        assert_eq!(parse_tag("env=dev").unwrap(), ("env".into(), "dev".into()));
        assert_eq!(parse_tag("note=a=b").unwrap(), ("note".into(), "a=b".into()));
        assert_eq!(parse_tag("empty=").unwrap(), ("empty".into(), "".into()));
        assert!(parse_tag("=dev").is_err());
        assert!(parse_tag("env").is_err());
    }

    #[test]
    fn parses_mark_argument() {
        assert_eq!(parse_mark("delete:1").unwrap(), ("delete".into(), 1));
        assert!(parse_mark("delete").is_err());
        assert!(parse_mark("delete:-1").is_err());
    }

    #[test]
    fn concurrency_flag_rejects_zero_like_settings_file() {
        assert_eq!(parse_concurrency("8").unwrap(), 8);
        assert!(parse_concurrency("0").is_err());
        assert!(parse_concurrency("-1").is_err());
        assert!(Cli::try_parse_from(["govtag", "--concurrency", "0", "catalog"]).is_err());
        let cli = Cli::try_parse_from(["govtag", "--concurrency", "2", "catalog"]).unwrap();
        assert_eq!(cli.concurrency, Some(2));
    }

    #[test]
    fn repeated_add_keys_follow_ingest_mode() {
        let pairs = || vec![("env".to_string(), "dev".to_string()), ("env".to_string(), "prod".to_string())];
        assert!(tag_pairs(pairs(), Ingest::Strict).is_err());
        let tags = tag_pairs(pairs(), Ingest::LastWins).unwrap();
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(tag_pairs(vec![("a".into(), "1".into())], Ingest::Strict).unwrap().len(), 1);
    }

    #[test]
    fn reconcile_payload_round_trips_provider_shape() {
        let raw = json!([{ "key": "a", "value": "1" }, { "key": "b", "value": "2" }]);
        let add: TagSet = [("b", "3")].into_iter().collect();
        let remove: TagKeys = ["b".to_string()].into();
        let out = reconcile_payload(&raw, TagShape::Camel, Ingest::Strict, &add, &remove).unwrap();
        assert_eq!(out, json!({ "changed": true, "tags": [{ "key": "a", "value": "1" }, { "key": "b", "value": "3" }] }));
    }

    #[test]
    fn reconcile_payload_rejects_duplicates_when_strict() {
        let raw = json!([{ "Key": "a", "Value": "1" }, { "Key": "a", "Value": "2" }]);
        assert!(reconcile_payload(&raw, TagShape::Pascal, Ingest::Strict, &TagSet::new(), &TagKeys::new()).is_err());
        let out = reconcile_payload(&raw, TagShape::Pascal, Ingest::LastWins, &TagSet::new(), &TagKeys::new()).unwrap();
        assert_eq!(out["changed"], false);
    }

    fn memorydb_flight() -> FlightProvider {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../aws/tests/data/memorydb.json");
        FlightProvider::new(Catalog::aws().unwrap(), FlightData::load(&path).unwrap(), Ingest::Strict).unwrap()
    }

    #[tokio::test]
    async fn replay_marks_then_selects_when_due() {
        let provider = memorydb_flight();
        let settings = Settings::default();
        let now = Utc::now();

        let mark = ReplayArgs { kind: "memorydb-acl".into(), mark: Some(("delete".into(), 1)), ..ReplayArgs::default() };
        let (summary, reports) = replay(&provider, mark, &settings, now).await.unwrap();
        assert_eq!(summary["selected"], json!(["test-acl"]));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].action, "mark-for-op");
        assert_eq!(reports[0].applied(), 1);
        let stamped = summary["resources"][0]["Tags"][0]["Value"].as_str().unwrap();
        assert!(stamped.starts_with("Resource does not meet policy: delete@"), "{stamped}");

        let select = |skew| ReplayArgs {
            kind: "aws.memorydb-acl".into(),
            marked_for_op: Some("delete".into()),
            skew,
            ..ReplayArgs::default()
        };
        let (not_yet, _) = replay(&provider, select(0), &settings, now).await.unwrap();
        assert_eq!(not_yet["selected"], json!([]));
        let (due, _) = replay(&provider, select(1), &settings, now).await.unwrap();
        assert_eq!(due["selected"], json!(["test-acl"]));
    }

    #[tokio::test]
    async fn replay_rejects_duplicate_add_keys() {
        let provider = memorydb_flight();
        let args = ReplayArgs {
            kind: "memorydb-acl".into(),
            add: vec![("env".into(), "dev".into()), ("env".into(), "prod".into())],
            ..ReplayArgs::default()
        };
        assert!(replay(&provider, args, &Settings::default(), Utc::now()).await.is_err());
        assert!(!provider.calls().iter().any(|c| c.starts_with("put_tags")));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
