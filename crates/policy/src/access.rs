//! Resource policies that grant access outside the owning account.

use govtag_aws::Annotation;
use govtag_core::ResourceRef;
use serde_json::Value as Json;
use std::collections::BTreeSet;

/// Condition keys that pin a wildcard principal to specific accounts.
const ACCOUNT_CONDITIONS: &[&str] = &["aws:SourceAccount", "aws:SourceOwner", "aws:PrincipalAccount"];

/// Match resources whose attached policy allows a principal from an account
/// that is neither the owner nor listed in `allowed`.
#[derive(Debug, Clone, Default)]
pub struct CrossAccount {
    pub allowed: BTreeSet<String>,
}

fn account_of(principal: &str) -> Option<&str> {
    if principal.len() == 12 && principal.bytes().all(|b| b.is_ascii_digit()) {
        return Some(principal);
    }
    principal.strip_prefix("arn:").and_then(|rest| rest.split(':').nth(3)).filter(|a| !a.is_empty())
}

fn strings(v: &Json) -> Vec<&str> {
    match v {
        Json::String(s) => vec![s.as_str()],
        Json::Array(items) => items.iter().filter_map(Json::as_str).collect(),
        _ => Vec::new(),
    }
}

impl CrossAccount {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self { Self { allowed: allowed.into_iter().collect() } }

    fn trusted(&self, owner: Option<&str>, account: &str) -> bool {
        owner == Some(account) || self.allowed.contains(account)
    }

    /// Accounts a wildcard statement is narrowed to by its conditions, if any.
    fn condition_accounts<'a>(statement: &'a Json) -> Option<Vec<&'a str>> {
        let mut out = Vec::new();
        for (_, clause) in statement.get("Condition")?.as_object()? {
            let Some(clause) = clause.as_object() else { continue };
            for key in ACCOUNT_CONDITIONS {
                if let Some(v) = clause.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v) {
                    out.extend(strings(v));
                }
            }
        }
        (!out.is_empty()).then_some(out)
    }

    fn statement_is_cross_account(&self, owner: Option<&str>, statement: &Json) -> bool {
        if statement.get("Effect").and_then(Json::as_str) != Some("Allow") {
            return false;
        }
        let principals = match statement.get("Principal") {
            Some(Json::String(s)) => vec![s.as_str()],
            Some(Json::Object(p)) => p.get("AWS").map(strings).unwrap_or_default(),
            _ => Vec::new(),
        };
        principals.into_iter().any(|p| match p {
            "*" => match Self::condition_accounts(statement) {
                Some(accounts) => accounts.into_iter().any(|a| !self.trusted(owner, a)),
                None => true,
            },
            p => account_of(p).is_some_and(|a| !self.trusted(owner, a)),
        })
    }

    /// A record without a policy grants nothing. An unparseable policy is
    /// treated the same way.
    pub fn matches(&self, resource: &ResourceRef, record: &Json) -> bool {
        let doc = match record.get(Annotation::Policy.key()) {
            Some(Json::String(raw)) => match serde_json::from_str::<Json>(raw) {
                Ok(doc) => doc,
                Err(_) => return false,
            },
            Some(doc @ Json::Object(_)) => doc.clone(),
            _ => return false,
        };
        let owner = resource.arn.as_deref().and_then(account_of);
        let statements: Vec<&Json> = match doc.get("Statement") {
            Some(Json::Array(s)) => s.iter().collect(),
            Some(s @ Json::Object(_)) => vec![s],
            _ => Vec::new(),
        };
        statements.into_iter().any(|s| self.statement_is_cross_account(owner, s))
    }
}
