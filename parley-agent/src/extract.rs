// ABOUTME: Ordered field-fallback extraction of response text from JSON payloads.
// ABOUTME: Each adapter declares its precedence list explicitly so it can be tested alone.

use serde_json::Value;

/// An ordered list of field paths tried in turn, ending in a fixed fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    paths: Vec<Vec<String>>,
    fallback: String,
}

impl FallbackChain {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            paths: Vec::new(),
            fallback: fallback.into(),
        }
    }

    /// Append a dotted path such as `body.response`
    pub fn then(mut self, dotted: &str) -> Self {
        self.paths
            .push(dotted.split('.').map(|s| s.to_string()).collect());
        self
    }

    /// Return the first path that resolves, else the fallback
    pub fn extract(&self, payload: &Value) -> String {
        self.paths
            .iter()
            .find_map(|path| {
                let keys: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
                lookup(payload, &keys)
            })
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Resolve a path of object keys.
///
/// A string met along the way is treated as encoded JSON and descended into,
/// which covers payloads whose `body` is itself a serialized document.
pub fn lookup(value: &Value, path: &[&str]) -> Option<String> {
    let Some((key, rest)) = path.split_first() else {
        return render(value);
    };

    if let Value::String(encoded) = value {
        let decoded: Value = serde_json::from_str(encoded).ok()?;
        return lookup(&decoded, path);
    }

    lookup(value.as_object()?.get(*key)?, rest)
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> FallbackChain {
        FallbackChain::new("could not process request")
            .then("body.response")
            .then("response")
    }

    #[test]
    fn test_body_encoded_as_string() {
        let payload = json!({"body": "{\"response\":\"ok\"}"});
        assert_eq!(chain().extract(&payload), "ok");
    }

    #[test]
    fn test_body_as_object() {
        let payload = json!({"body": {"response": "nested"}});
        assert_eq!(chain().extract(&payload), "nested");
    }

    #[test]
    fn test_nested_wins_over_top_level() {
        let payload = json!({"body": {"response": "inner"}, "response": "outer"});
        assert_eq!(chain().extract(&payload), "inner");
    }

    #[test]
    fn test_top_level_when_body_lacks_field() {
        let payload = json!({"body": "{\"other\":1}", "response": "outer"});
        assert_eq!(chain().extract(&payload), "outer");
    }

    #[test]
    fn test_empty_object_yields_fallback() {
        assert_eq!(chain().extract(&json!({})), "could not process request");
    }

    #[test]
    fn test_null_field_is_absent() {
        let payload = json!({"response": null});
        assert_eq!(chain().extract(&payload), "could not process request");
    }

    #[test]
    fn test_non_string_value_rendered_as_json() {
        let payload = json!({"response": 42});
        assert_eq!(chain().extract(&payload), "42");
    }

    #[test]
    fn test_unparseable_body_string_falls_through() {
        let payload = json!({"body": "not json", "response": "fine"});
        assert_eq!(chain().extract(&payload), "fine");
    }
}
