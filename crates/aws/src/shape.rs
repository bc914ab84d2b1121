use govtag_core::{Ingest, IngestError, TagSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};

/// Wire layouts AWS services use for tag payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagShape {
    /// `[{"Key": .., "Value": ..}]`
    Pascal,
    /// `[{"key": .., "value": ..}]`
    Camel,
    /// `{"key": "value"}`
    Map,
}

#[derive(Deserialize)]
struct PascalTag {
    #[serde(rename = "Key")]
    key: Option<String>,
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Deserialize)]
struct CamelTag {
    key: Option<String>,
    #[serde(default)]
    value: String,
}

fn malformed(shape: TagShape, e: impl std::fmt::Display) -> IngestError {
    IngestError::Malformed(format!("{shape:?} tags: {e}"))
}

/// Normalize a provider tag payload. `null` is an empty set.
pub fn decode(shape: TagShape, raw: &Json, ingest: Ingest) -> Result<TagSet, IngestError> {
    if raw.is_null() { return Ok(TagSet::new()); }
    match shape {
        TagShape::Pascal => {
            let pairs: Vec<PascalTag> = serde_json::from_value(raw.clone()).map_err(|e| malformed(shape, e))?;
            TagSet::from_pairs(pairs.into_iter().map(|t| (t.key, t.value)), ingest)
        }
        TagShape::Camel => {
            let pairs: Vec<CamelTag> = serde_json::from_value(raw.clone()).map_err(|e| malformed(shape, e))?;
            TagSet::from_pairs(pairs.into_iter().map(|t| (t.key, t.value)), ingest)
        }
        TagShape::Map => {
            let obj = raw.as_object().ok_or_else(|| malformed(shape, "expected an object"))?;
            let mut pairs = Vec::with_capacity(obj.len());
            for (k, v) in obj {
                let v = v.as_str().ok_or_else(|| malformed(shape, format!("value of '{k}' is not a string")))?;
                pairs.push((Some(k.clone()), v.to_string()));
            }
            TagSet::from_pairs(pairs, ingest)
        }
    }
}

pub fn encode(shape: TagShape, tags: &TagSet) -> Json {
    match shape {
        TagShape::Pascal => Json::Array(tags.iter().map(|(k, v)| json!({ "Key": k, "Value": v })).collect()),
        TagShape::Camel => Json::Array(tags.iter().map(|(k, v)| json!({ "key": k, "value": v })).collect()),
        TagShape::Map => Json::Object(tags.iter().map(|(k, v)| (k.to_string(), json!(v))).collect::<JsonMap<_, _>>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_layout() {
        let expected: TagSet = [("env", "dev"), ("owner", "policy")].into_iter().collect();
        let pascal = json!([{ "Key": "owner", "Value": "policy" }, { "Key": "env", "Value": "dev" }]);
        let camel = json!([{ "key": "owner", "value": "policy" }, { "key": "env", "value": "dev" }]);
        let map = json!({ "owner": "policy", "env": "dev" });
        assert_eq!(decode(TagShape::Pascal, &pascal, Ingest::Strict).unwrap(), expected);
        assert_eq!(decode(TagShape::Camel, &camel, Ingest::Strict).unwrap(), expected);
        assert_eq!(decode(TagShape::Map, &map, Ingest::Strict).unwrap(), expected);
    }

    #[test]
    fn encodes_in_key_order() {
        let tags: TagSet = [("zone", "b"), ("app", "web")].into_iter().collect();
        assert_eq!(
            encode(TagShape::Pascal, &tags),
            json!([{ "Key": "app", "Value": "web" }, { "Key": "zone", "Value": "b" }])
        );
        assert_eq!(encode(TagShape::Camel, &tags), json!([{ "key": "app", "value": "web" }, { "key": "zone", "value": "b" }]));
        assert_eq!(encode(TagShape::Map, &tags), json!({ "app": "web", "zone": "b" }));
    }

    #[test]
    fn missing_key_is_rejected_not_dropped() {
        let raw = json!([{ "Key": "env", "Value": "dev" }, { "Value": "orphan" }]);
        assert_eq!(decode(TagShape::Pascal, &raw, Ingest::Strict).unwrap_err(), IngestError::MissingKey(1));
        let raw = json!([{ "key": null, "value": "orphan" }]);
        assert_eq!(decode(TagShape::Camel, &raw, Ingest::LastWins).unwrap_err(), IngestError::MissingKey(0));
    }

    #[test]
    fn duplicate_pairs_follow_ingest_mode() {
        let raw = json!([{ "Key": "env", "Value": "dev" }, { "Key": "env", "Value": "prod" }]);
        assert_eq!(decode(TagShape::Pascal, &raw, Ingest::Strict).unwrap_err(), IngestError::DuplicateKey("env".into()));
        assert_eq!(decode(TagShape::Pascal, &raw, Ingest::LastWins).unwrap().get("env"), Some("prod"));
    }

    #[test]
    fn wrong_payload_type_is_malformed() {
        assert!(matches!(decode(TagShape::Map, &json!([]), Ingest::Strict), Err(IngestError::Malformed(_))));
        assert!(matches!(decode(TagShape::Pascal, &json!({ "a": "b" }), Ingest::Strict), Err(IngestError::Malformed(_))));
        assert!(matches!(decode(TagShape::Map, &json!({ "a": 1 }), Ingest::Strict), Err(IngestError::Malformed(_))));
        assert!(decode(TagShape::Camel, &Json::Null, Ingest::Strict).unwrap().is_empty());
    }
}
