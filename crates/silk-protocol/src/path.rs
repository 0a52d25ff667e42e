//! Dotted-path navigation over JSON values.
//!
//! `get` walks a path like `"foo.bar.baz"` and returns `None` on the
//! first absent step. `set` walks the same way but creates intermediate
//! objects as needed, overwriting any non-object it meets.

use serde_json::{Map, Value};

/// Returns the value at `path`, or `None` if any step is absent or
/// the current value is not an object.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Inserts `value` at `path`, creating intermediate objects as needed.
///
/// A non-object encountered mid-path is replaced by an object so the
/// walk can continue.
pub fn set(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }

    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = current.as_object_mut().expect("walk only descends into objects");
        if segments.peek().is_none() {
            map.insert(segment.to_owned(), value);
            return;
        }
        let entry = map
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_existing_path() {
        let v = json!({"a": {"b": {"c": 1}}});
        assert_eq!(get(&v, "a.b.c"), Some(&json!(1)));
        assert_eq!(get(&v, "a.b"), Some(&json!({"c": 1})));
    }

    #[test]
    fn get_missing_step_is_none() {
        let v = json!({"a": {"b": 1}});
        assert_eq!(get(&v, "a.x.c"), None);
        assert_eq!(get(&v, "a.b.c"), None, "cannot descend through a number");
    }

    #[test]
    fn set_creates_intermediates() {
        let mut v = json!({});
        set(&mut v, "a.b.c", json!(42));
        assert_eq!(v, json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn set_overwrites_scalar_in_path() {
        let mut v = json!({"a": 1});
        set(&mut v, "a.b", json!("x"));
        assert_eq!(v, json!({"a": {"b": "x"}}));
    }

    #[test]
    fn set_on_non_object_root() {
        let mut v = json!(null);
        set(&mut v, "k", json!(true));
        assert_eq!(v, json!({"k": true}));
    }

    #[test]
    fn set_then_get_roundtrip() {
        let mut v = json!({});
        set(&mut v, "x.y", json!([1, 2]));
        assert_eq!(get(&v, "x.y"), Some(&json!([1, 2])));
    }
}
