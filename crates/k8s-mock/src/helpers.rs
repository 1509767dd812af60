//! JSON helpers for applying patches to stored objects.

use serde_json::Value;

/// Apply a JSON merge patch (RFC 7386) to `base`.
///
/// `null` in the patch removes the key.
pub fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base_map), Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				if patch_value.is_null() {
					base_map.remove(&key);
					continue;
				}
				let base_value = base_map.remove(&key).unwrap_or(Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

/// Drop strategic merge patch directives (`$patch`, `$setElementOrder/...`, ...).
pub fn strip_strategic_merge_directives(value: Value) -> Value {
	match value {
		Value::Object(map) => Value::Object(
			map.into_iter()
				.filter(|(key, _)| !key.starts_with('$'))
				.map(|(key, val)| (key, strip_strategic_merge_directives(val)))
				.collect(),
		),
		Value::Array(arr) => Value::Array(
			arr.into_iter()
				.map(strip_strategic_merge_directives)
				.collect(),
		),
		other => other,
	}
}

/// Whether `object` carries every `key=value` pair of a label selector.
///
/// Only equality selectors are understood. An empty selector matches everything.
pub fn matches_selector(object: &Value, selector: &str) -> bool {
	let labels = object.pointer("/metadata/labels");
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.all(|term| match term.split_once('=') {
			Some((key, value)) => labels
				.and_then(|l| l.get(key))
				.and_then(Value::as_str)
				.is_some_and(|v| v == value),
			None => false,
		})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_merge_json() {
		let base = json!({"spec": {"replicas": 1, "paused": true}, "data": {"a": "1"}});
		let patch = json!({"spec": {"replicas": 3, "paused": null}, "data": "x"});

		assert_eq!(
			merge_json(base, patch),
			json!({"spec": {"replicas": 3}, "data": "x"})
		);
	}

	#[test]
	fn test_strip_directives() {
		let value = json!({
			"$setElementOrder/containers": [{"name": "a"}],
			"spec": {"containers": [{"name": "a", "$patch": "replace"}]}
		});

		assert_eq!(
			strip_strategic_merge_directives(value),
			json!({"spec": {"containers": [{"name": "a"}]}})
		);
	}

	#[test]
	fn test_matches_selector() {
		let object = json!({"metadata": {"labels": {"app": "api", "tier": "web"}}});

		assert!(matches_selector(&object, ""));
		assert!(matches_selector(&object, "app=api"));
		assert!(matches_selector(&object, "app=api,tier=web"));
		assert!(!matches_selector(&object, "app=api,tier=db"));
		assert!(!matches_selector(&json!({"metadata": {}}), "app=api"));
	}
}
