//! Pure operations on the JSON tree.
//!
//! Nulls and empty objects never exist in the tree: writing one removes the
//! node, and removing the last child of an object removes the object.

use chatline_store_traits::StorePath;
use serde_json::{Map, Value};

/// Strip nulls and empty objects. Returns `None` when nothing is left.
pub(crate) fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

pub(crate) fn get<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for seg in path.segments() {
        node = match node {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match node {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

pub(crate) fn set(root: &mut Value, path: &StorePath, value: Value) {
    let Some(value) = normalize(value) else {
        remove(root, path);
        return;
    };
    let segments = path.segments();
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for seg in parents {
        node = object_entry(node, seg);
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), value);
    }
}

pub(crate) fn remove(root: &mut Value, path: &StorePath) {
    if path.is_root() {
        *root = Value::Object(Map::new());
        return;
    }
    remove_rec(root, path.segments());
}

// Returns true when `node` is left empty and should be pruned by the caller.
fn remove_rec(node: &mut Value, segments: &[String]) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        map.remove(first);
    } else if let Some(child) = map.get_mut(first) {
        if remove_rec(child, rest) {
            map.remove(first);
        }
    }
    map.is_empty()
}

fn object_entry<'a>(node: &'a mut Value, key: &str) -> &'a mut Value {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
        _ => unreachable!("node was just made an object"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        set(&mut root, &path("chats/a/latestMessageText"), json!("hi"));
        assert_eq!(root, json!({"chats": {"a": {"latestMessageText": "hi"}}}));
        assert_eq!(get(&root, &path("chats/a/latestMessageText")), Some(&json!("hi")));
    }

    #[test]
    fn remove_prunes_empty_parents() {
        let mut root = json!({"userChats": {"u": {"k1": "c1"}}, "chats": {"c1": {"x": 1}}});
        remove(&mut root, &path("userChats/u/k1"));
        assert_eq!(root, json!({"chats": {"c1": {"x": 1}}}));
        assert_eq!(get(&root, &path("userChats/u")), None);
    }

    #[test]
    fn writing_null_removes() {
        let mut root = json!({"a": {"b": 1, "c": 2}});
        set(&mut root, &path("a/b"), Value::Null);
        assert_eq!(root, json!({"a": {"c": 2}}));
    }

    #[test]
    fn normalize_strips_nested_empties() {
        let v = json!({"a": null, "b": {}, "c": {"d": null}, "e": 1});
        assert_eq!(normalize(v), Some(json!({"e": 1})));
        assert_eq!(normalize(json!({})), None);
    }

    #[test]
    fn get_indexes_into_arrays() {
        let root = json!({"chats": {"a": {"users": ["u", "v"]}}});
        assert_eq!(get(&root, &path("chats/a/users/1")), Some(&json!("v")));
        assert_eq!(get(&root, &path("chats/a/users/9")), None);
    }
}
