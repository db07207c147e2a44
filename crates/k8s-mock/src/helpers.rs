//! JSON helpers for patch handling.

use serde_json::Value;

/// Apply a JSON merge patch (RFC 7386) to `base`.
///
/// Objects merge recursively, `null` removes a key, anything else replaces.
pub fn merge_patch(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base), Value::Object(patch)) => {
			for (key, value) in patch {
				if value.is_null() {
					base.remove(&key);
					continue;
				}
				let current = base.remove(&key).unwrap_or(Value::Null);
				base.insert(key, merge_patch(current, value));
			}
			Value::Object(base)
		}
		(_, patch) => patch,
	}
}

/// Remove strategic merge patch directives (`$patch`, `$setElementOrder/..`,
/// `$retainKeys`, ...) so they never end up in stored objects.
pub fn strip_directives(value: Value) -> Value {
	match value {
		Value::Object(map) => Value::Object(
			map.into_iter()
				.filter(|(key, _)| !key.starts_with('$'))
				.map(|(key, value)| (key, strip_directives(value)))
				.collect(),
		),
		Value::Array(items) => Value::Array(items.into_iter().map(strip_directives).collect()),
		other => other,
	}
}

/// A `metav1.Status` failure body.
pub fn status(code: u16, reason: &str, message: &str) -> Value {
	serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code,
	})
}

/// Split a request path into `(collection path, name)`.
///
/// `/api/v1/namespaces/web/configmaps/cfg` gives
/// `(/api/v1/namespaces/web/configmaps, cfg)`.
pub fn split_object_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((collection, name)) => (collection.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_merge_patch() {
		let merged = merge_patch(
			json!({"metadata": {"name": "a", "labels": {"x": "1", "y": "2"}}, "data": {"k": "v"}}),
			json!({"metadata": {"labels": {"y": null, "z": "3"}}, "data": {"k": "w"}}),
		);
		assert_eq!(
			merged,
			json!({"metadata": {"name": "a", "labels": {"x": "1", "z": "3"}}, "data": {"k": "w"}})
		);
	}

	#[test]
	fn test_strip_directives() {
		let cleaned = strip_directives(json!({
			"$setElementOrder/containers": [{"name": "app"}],
			"spec": {"containers": [{"name": "app", "$patch": "replace"}]}
		}));
		assert_eq!(cleaned, json!({"spec": {"containers": [{"name": "app"}]}}));
	}

	#[test]
	fn test_split_object_path() {
		assert_eq!(
			split_object_path("/api/v1/namespaces/team-a"),
			("/api/v1/namespaces".to_string(), "team-a".to_string())
		);
		assert_eq!(
			split_object_path("/apis/apps/v1/namespaces/web/deployments/app/"),
			(
				"/apis/apps/v1/namespaces/web/deployments".to_string(),
				"app".to_string()
			)
		);
	}
}
