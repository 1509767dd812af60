//! YAML rendering of resources for diff output.

use serde_json::{Map, Value};

/// Recursively order object keys bytewise, the order `kubectl diff` prints them in.
fn sorted(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<_> = map.iter().collect();
			entries.sort_by(|(a, _), (b, _)| a.cmp(b));
			Value::Object(
				entries
					.into_iter()
					.map(|(k, v)| (k.clone(), sorted(v)))
					.collect::<Map<_, _>>(),
			)
		}
		Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
		other => other.clone(),
	}
}

/// Serialize a resource to YAML with sorted keys.
pub(crate) fn to_yaml(value: &Value) -> Result<String, serde_saphyr::ser_error::Error> {
	let options = serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	};

	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, &sorted(value), options)?;
	Ok(output)
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_keys_are_sorted() {
		let value = json!({
			"metadata": {"name": "api", "labels": {"b": "two", "a": "one"}},
			"kind": "ConfigMap",
			"apiVersion": "v1",
		});

		assert_eq!(
			to_yaml(&value).unwrap(),
			indoc! {"
				apiVersion: v1
				kind: ConfigMap
				metadata:
				  labels:
				    a: one
				    b: two
				  name: api
			"}
		);
	}

	#[test]
	fn test_nested_arrays_are_sorted() {
		let value = json!([{"z": 1, "a": 2}]);
		assert_eq!(sorted(&value), json!([{"a": 2, "z": 1}]));
		assert_eq!(
			serde_json::to_string(&sorted(&value)).unwrap(),
			r#"[{"a":2,"z":1}]"#
		);
	}
}
