//! Reshape describe/get responses into the records policies filter on.

use anyhow::{Context, Result};
use serde_json::{json, Value as Json};

fn strip_metadata(mut v: Json) -> Json {
    if let Some(o) = v.as_object_mut() { o.remove("ResponseMetadata"); }
    v
}

/// `describe_firewall` nests the firewall next to its status and update token.
pub fn firewall_describe(resp: Json) -> Result<Json> {
    let mut resp = strip_metadata(resp);
    let o = resp.as_object_mut().context("describe_firewall response is not an object")?;
    let status = o.remove("FirewallStatus").unwrap_or_else(|| json!({}));
    let token = o.remove("UpdateToken");
    let mut fw = o.remove("Firewall").context("describe_firewall response has no Firewall")?;
    let f = fw.as_object_mut().context("Firewall is not an object")?;
    if let Some(t) = token { f.insert("UpdateToken".into(), t); }
    f.insert("FirewallStatus".into(), status);
    Ok(fw)
}

/// Config snapshots wrap the firewall under a `Firewall` key.
pub fn firewall_config(mut item: Json) -> Result<Json> {
    let o = item.as_object_mut().context("config item is not an object")?;
    if let Some(Json::Object(fw)) = o.remove("Firewall") {
        o.extend(fw);
    }
    Ok(item)
}

/// `get_access_point` omits the ARN the listing carried.
pub fn access_point(listed: &Json, detail: Json) -> Result<Json> {
    let arn = listed.get("AccessPointArn").and_then(Json::as_str).context("listed access point has no AccessPointArn")?;
    let mut ap = strip_metadata(detail);
    ap.as_object_mut().context("get_access_point response is not an object")?.insert("AccessPointArn".into(), json!(arn));
    Ok(ap)
}

pub fn storage_lens(detail: Json) -> Json { strip_metadata(detail) }

/// Lift a single wrapped object (e.g. `{"knowledgeBase": {...}}`) to the top.
pub fn hoist(detail: Json, key: &str) -> Result<Json> {
    let mut detail = strip_metadata(detail);
    detail.as_object_mut().and_then(|o| o.remove(key)).with_context(|| format!("response has no '{key}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firewall_is_hoisted_with_token_and_status() {
        let resp = json!({
            "UpdateToken": "tok-1",
            "Firewall": { "FirewallName": "unicron", "FirewallArn": "arn:fw/unicron" },
            "FirewallStatus": { "Status": "READY" },
            "ResponseMetadata": { "RequestId": "x" }
        });
        assert_eq!(
            firewall_describe(resp).unwrap(),
            json!({
                "FirewallName": "unicron",
                "FirewallArn": "arn:fw/unicron",
                "UpdateToken": "tok-1",
                "FirewallStatus": { "Status": "READY" }
            })
        );
    }

    #[test]
    fn firewall_status_defaults_to_empty() {
        let out = firewall_describe(json!({ "UpdateToken": "t", "Firewall": { "FirewallName": "a" } })).unwrap();
        assert_eq!(out["FirewallStatus"], json!({}));
        assert!(firewall_describe(json!({ "UpdateToken": "t" })).is_err());
    }

    #[test]
    fn firewall_config_item_is_flattened() {
        let item = json!({ "Firewall": { "FirewallName": "unicron" }, "FirewallPolicyArn": "arn:p" });
        assert_eq!(firewall_config(item).unwrap(), json!({ "FirewallName": "unicron", "FirewallPolicyArn": "arn:p" }));
    }

    #[test]
    fn access_point_keeps_listed_arn() {
        let listed = json!({ "Name": "ap1", "AccessPointArn": "arn:aws:s3:us-east-1:123:accesspoint/ap1" });
        let detail = json!({ "Name": "ap1", "Bucket": "b", "ResponseMetadata": {} });
        assert_eq!(
            access_point(&listed, detail).unwrap(),
            json!({ "Name": "ap1", "Bucket": "b", "AccessPointArn": "arn:aws:s3:us-east-1:123:accesspoint/ap1" })
        );
    }

    #[test]
    fn hoist_requires_key() {
        let kb = hoist(json!({ "knowledgeBase": { "knowledgeBaseId": "kb1" } }), "knowledgeBase").unwrap();
        assert_eq!(kb, json!({ "knowledgeBaseId": "kb1" }));
        assert!(hoist(json!({}), "knowledgeBase").is_err());
    }
}
