use serde_json::Value;

/// Flattens GET data into query pairs, bracket style:
/// `{"ids": [1, 2], "filter": {"name": "x"}}` becomes
/// `ids[]=1&ids[]=2&filter[name]=x`.
pub fn encode_query(data: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    match data {
        Value::Object(object) => {
            for (key, value) in object {
                push_pairs(&mut pairs, key.clone(), value);
            }
        }
        Value::Null => {}
        other => push_pairs(&mut pairs, "data".to_string(), other),
    }
    pairs
}

fn push_pairs(pairs: &mut Vec<(String, String)>, prefix: String, value: &Value) {
    match value {
        Value::Object(object) => {
            for (key, nested) in object {
                push_pairs(pairs, format!("{prefix}[{key}]"), nested);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let key = if item.is_object() || item.is_array() {
                    format!("{prefix}[{index}]")
                } else {
                    format!("{prefix}[]")
                };
                push_pairs(pairs, key, item);
            }
        }
        Value::Null => pairs.push((prefix, String::new())),
        Value::String(s) => pairs.push((prefix, s.clone())),
        scalar => pairs.push((prefix, scalar.to_string())),
    }
}
