//! Dot-path extraction over nested JSON — objects by key, arrays by
//! numeric index (`items.0.sku`).

/// Returns the value at `path` within `value`, or `None` when any segment
/// is missing. An empty path never matches.
pub fn extract<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_nested_object_path() {
        let value = json!({"order": {"total": 25, "items": [{"sku": "a-1"}]}});
        assert_eq!(extract(&value, "order.total"), Some(&json!(25)));
        assert_eq!(extract(&value, "order.items.0.sku"), Some(&json!("a-1")));
    }

    #[test]
    fn test_missing_segment_returns_none() {
        let value = json!({"order": {"total": 25}});
        assert_eq!(extract(&value, "order.missing"), None);
        assert_eq!(extract(&value, "order.total.deeper"), None);
        assert_eq!(extract(&value, ""), None);
    }

    #[test]
    fn test_non_numeric_array_index_returns_none() {
        let value = json!({"items": [1, 2, 3]});
        assert_eq!(extract(&value, "items.first"), None);
        assert_eq!(extract(&value, "items.1"), Some(&json!(2)));
    }
}
