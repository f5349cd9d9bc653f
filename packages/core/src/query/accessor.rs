//! Dotted-path access into a record's attribute view.

use serde_json::Value;

/// Resolves dotted attribute paths against a `serde_json::Value` tree.
///
/// `"config.dns.port"` walks three object levels. Array indexing is not
/// supported; conditions operate on scalar leaves.
#[derive(Debug, Clone, Copy)]
pub struct Accessor<'a> {
    root: &'a Value,
}

impl<'a> Accessor<'a> {
    /// Creates an accessor over an attribute tree.
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    /// Resolves a dotted path, or `None` if any segment is missing.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&'a Value> {
        let mut current = self.root;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// The value at `path` as an i64, when it is an integer number.
    #[must_use]
    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    /// The value at `path` as an f64, when it is any number.
    #[must_use]
    pub fn get_float(&self, path: &str) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    /// The value at `path` as a string.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&'a str> {
        self.get(path)?.as_str()
    }

    /// The value at `path` as a bool.
    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    /// Whether `path` resolves to any value.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolves_nested_paths() {
        let tree = json!({"config": {"dns": {"port": 53, "enabled": true}}});
        let acc = Accessor::new(&tree);
        assert_eq!(acc.get_int("config.dns.port"), Some(53));
        assert_eq!(acc.get_bool("config.dns.enabled"), Some(true));
        assert!(acc.exists("config.dns"));
        assert!(!acc.exists("config.dhcp"));
    }

    #[test]
    fn type_mismatches_yield_none() {
        let tree = json!({"name": "Herbert", "score": 411.5});
        let acc = Accessor::new(&tree);
        assert_eq!(acc.get_str("name"), Some("Herbert"));
        assert_eq!(acc.get_int("name"), None);
        // 411.5 is not an integer.
        assert_eq!(acc.get_int("score"), None);
        assert_eq!(acc.get_float("score"), Some(411.5));
    }

    #[test]
    fn non_object_intermediate_yields_none() {
        let tree = json!({"list": [1, 2, 3]});
        let acc = Accessor::new(&tree);
        assert!(acc.get("list.0").is_none());
    }
}
