//! Small accessors over loosely shaped API payloads

use serde_json::Value;

/// Field accessors that tolerate missing keys and unexpected types
pub trait ValueExt {
    /// String field, if present and a string
    fn str_field(&self, key: &str) -> Option<&str>;

    /// String field or a default
    fn string_or(&self, key: &str, default: &str) -> String {
        self.str_field(key).unwrap_or(default).to_string()
    }

    /// Array field, empty when missing
    fn array_field(&self, key: &str) -> &[Value];

    /// Boolean field
    fn bool_field(&self, key: &str) -> Option<bool>;

    /// Elements of the value itself when it is an array
    fn as_list(&self) -> &[Value];
}

impl ValueExt for Value {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn array_field(&self, key: &str) -> &[Value] {
        self.get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn bool_field(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    fn as_list(&self) -> &[Value] {
        self.as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Render a scalar for tabular output; `null` becomes an empty cell
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let v = json!({"name": "Sales", "ids": [1, 2], "on": true, "n": 3});
        assert_eq!(v.str_field("name"), Some("Sales"));
        assert_eq!(v.str_field("n"), None);
        assert_eq!(v.string_or("missing", "Unknown"), "Unknown");
        assert_eq!(v.array_field("ids").len(), 2);
        assert!(v.array_field("name").is_empty());
        assert_eq!(v.bool_field("on"), Some(true));
        assert!(v.as_list().is_empty());
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!("x")), "x");
        assert_eq!(cell_text(&json!(1.5)), "1.5");
        assert_eq!(cell_text(&json!(["a"])), "[\"a\"]");
    }
}
