//! Restoration of the nuverse master payload.
//!
//! The wire format compresses master entities two ways: column-oriented
//! "compact" entries (a map of column arrays with an optional per-column
//! enum dictionary) and positional tuple entries described by an external
//! structure descriptor. Both are reshaped back into row records here
//! before being written to disk.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde_json::Value;

use crate::codec::OrderedMap;

const COMPACT_PREFIX: &str = "compact";
const ENUM_KEY: &str = "__ENUM__";
const TUPLE_KEY: &str = "__tuple__";

/// Entities carrying a stable record id, merged instead of replaced.
fn id_key_for(entity: &str) -> Option<&'static str> {
    (entity == "eventCards").then_some("cardId")
}

pub fn restore_master(mut master: OrderedMap, structure_path: &Path) -> anyhow::Result<OrderedMap> {
    let structures = load_structures(structure_path)
        .context("failed to load nuverse master structure")?;

    let mut restored = OrderedMap::new();
    let mut restored_from_compact = HashSet::new();

    let keys = master.keys().cloned().collect::<Vec<_>>();

    for key in &keys {
        let Some(entity) = key.strip_prefix(COMPACT_PREFIX) else {
            continue;
        };

        let value = master.get(key).cloned().unwrap_or(Value::Null);

        // the raw columnar entry is kept alongside its restored form
        restored.insert(key.clone(), value.clone());

        let Value::Object(columns) = value else {
            continue;
        };

        let entity = decapitalize(entity);

        if entity.is_empty() {
            continue;
        }

        let mut rows = restore_compact_data(&columns);

        if let Some(id_key) = id_key_for(&entity) {
            rows = merge_by_id(master.get(&entity), rows, id_key);
            master.insert(entity.clone(), Value::Array(rows.clone()));
        }

        restored.insert(entity.clone(), Value::Array(rows));
        restored_from_compact.insert(entity);
    }

    for key in &keys {
        if key.starts_with(COMPACT_PREFIX) || restored_from_compact.contains(key) {
            continue;
        }

        let value = master.get(key).cloned().unwrap_or(Value::Null);

        let mut value = restore_structured_value(key, value, &structures);

        if let Some(id_key) = id_key_for(key) {
            value = match value {
                Value::Array(rows) if rows.iter().all(Value::is_object) => {
                    Value::Array(merge_by_id(master.get(key), rows, id_key))
                }

                other => other
            };
        }

        restored.insert(key.clone(), value);
    }

    Ok(restored)
}

fn load_structures(path: &Path) -> anyhow::Result<OrderedMap> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read structure file {path:?}"))?;

    serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse structure file {path:?}"))
}

fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new()
    }
}

/// Zip a `{column → values}` mapping back into row records. Ragged columns
/// truncate to the shortest; enum-bearing columns map their values through
/// the enum dictionary by integer index.
pub(crate) fn restore_compact_data(data: &OrderedMap) -> Vec<Value> {
    let enums = data.get(ENUM_KEY).and_then(Value::as_object);

    let mut labels = Vec::new();
    let mut columns: Vec<Vec<Value>> = Vec::new();

    for (key, value) in data {
        if key == ENUM_KEY {
            continue;
        }

        let mut column = value.as_array().cloned().unwrap_or_default();

        if let Some(enum_def) = enums.and_then(|enums| enums.get(key)) {
            if let Some(slice) = enum_slice(enum_def) {
                column = column.into_iter()
                    .map(|value| map_enum_value(value, &slice))
                    .collect();
            }
        }

        labels.push(key.clone());
        columns.push(column);
    }

    if columns.is_empty() {
        return Vec::new();
    }

    let rows_len = columns.iter().map(Vec::len).min().unwrap_or(0);

    let mut rows = Vec::with_capacity(rows_len);

    for i in 0..rows_len {
        let mut row = OrderedMap::new();

        for (j, label) in labels.iter().enumerate() {
            row.insert(label.clone(), columns[j][i].clone());
        }

        rows.push(Value::Object(row));
    }

    rows
}

/// An enum dictionary is either a plain array indexed positionally, or a
/// map whose keys are the decimal indices themselves.
fn enum_slice(def: &Value) -> Option<Vec<Value>> {
    match def {
        Value::Array(values) => Some(values.clone()),

        Value::Object(map) => {
            let indices = map.keys()
                .map(|key| key.parse::<i64>().ok())
                .collect::<Option<Vec<_>>>();

            match indices {
                Some(indices) => {
                    let len = indices.iter().copied().max().unwrap_or(-1) + 1;

                    let mut slice = vec![Value::Null; len.max(0) as usize];

                    for (index, value) in indices.into_iter().zip(map.values()) {
                        if index >= 0 {
                            slice[index as usize] = value.clone();
                        }
                    }

                    Some(slice)
                }

                // non-numeric keys: values in declaration order
                None => Some(map.values().cloned().collect())
            }
        }

        _ => None
    }
}

fn map_enum_value(value: Value, slice: &[Value]) -> Value {
    if value.is_null() {
        return value;
    }

    match value_to_index(&value) {
        Some(index) if (0..slice.len() as i64).contains(&index) => slice[index as usize].clone(),

        // unknown indices pass through unchanged
        _ => value
    }
}

fn value_to_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(value) => value.as_i64()
            .or_else(|| value.as_f64().map(|value| value as i64)),

        Value::String(value) => value.parse().ok(),

        _ => None
    }
}

fn value_to_i64(value: &Value) -> i64 {
    value_to_index(value).unwrap_or(0)
}

/// Merge restored rows with whatever the master map previously held for the
/// entity: pre-existing entries whose id reappears in the restored set are
/// dropped, the remainder is kept, and the result is stably sorted by
/// ascending numeric id.
fn merge_by_id(prior: Option<&Value>, restored: Vec<Value>, id_key: &str) -> Vec<Value> {
    let restored_ids = restored.iter()
        .filter_map(|row| row.get(id_key))
        .map(Value::to_string)
        .collect::<HashSet<_>>();

    let mut merged = Vec::new();

    if let Some(Value::Array(prior)) = prior {
        for item in prior {
            let Some(id) = item.as_object().and_then(|item| item.get(id_key)) else {
                continue;
            };

            if !restored_ids.contains(&id.to_string()) {
                merged.push(item.clone());
            }
        }
    }

    merged.extend(restored);

    merged.sort_by_key(|row| row.get(id_key).map(value_to_i64).unwrap_or(0));

    merged
}

/// Reshape a list of positional tuples through the structure descriptor.
/// Entities whose tuples cannot be restored keep their wire value.
fn restore_structured_value(key: &str, value: Value, structures: &OrderedMap) -> Value {
    let Some(Value::Array(structure)) = structures.get(key) else {
        return value;
    };

    let Value::Array(items) = &value else {
        return value;
    };

    let mut rows = Vec::with_capacity(items.len());

    for item in items {
        if let Value::Array(tuple) = item {
            rows.push(Value::Object(restore_dict(tuple, structure)));
        }
    }

    if rows.is_empty() && !items.is_empty() {
        return value;
    }

    Value::Array(rows)
}

fn tuple_keys(value: &Value) -> Option<&Vec<Value>> {
    value.as_object()?.get(TUPLE_KEY)?.as_array()
}

fn dict_from_tuple(keys: &[Value], values: &[Value]) -> OrderedMap {
    let mut dict = OrderedMap::new();

    for (key, value) in keys.iter().zip(values) {
        if value.is_null() {
            continue;
        }

        if let Some(key) = key.as_str() {
            dict.insert(key.to_string(), value.clone());
        }
    }

    dict
}

/// Positional restore of one tuple against a key structure. Elements are
/// either plain field names or `[name, inner]` pairs, where `inner` is a
/// `__tuple__` sub-object descriptor or a nested sub-structure applied
/// element-wise.
pub(crate) fn restore_dict(tuple: &[Value], key_structure: &[Value]) -> OrderedMap {
    if let Some(result) = restore_simple_tuple(key_structure, tuple) {
        return result;
    }

    let mut result = OrderedMap::new();

    for (i, key) in key_structure.iter().enumerate() {
        match key {
            Value::Array(pair) => {
                if pair.len() < 2 {
                    continue;
                }

                let Some(name) = pair[0].as_str() else {
                    continue;
                };

                match &pair[1] {
                    inner @ Value::Object(_) => {
                        if let Some(dict) = restore_tuple_field(inner, tuple, i) {
                            result.insert(name.to_string(), Value::Object(dict));
                        }
                    }

                    Value::Array(inner) => {
                        result.insert(name.to_string(), Value::Array(restore_nested_list(tuple, i, inner)));
                    }

                    _ => ()
                }
            }

            Value::String(name) => {
                if let Some(value) = tuple.get(i) {
                    if !value.is_null() {
                        result.insert(name.clone(), value.clone());
                    }
                }
            }

            _ => ()
        }
    }

    result
}

/// `[name, {__tuple__: [...]}]` as the whole structure: the tuple may come
/// wrapped in one extra list level, which is unwrapped before zipping.
fn restore_simple_tuple(key_structure: &[Value], tuple: &[Value]) -> Option<OrderedMap> {
    if key_structure.len() != 2 {
        return None;
    }

    let name = key_structure[0].as_str()?;
    let keys = tuple_keys(&key_structure[1])?;

    let values = match tuple {
        [Value::Array(inner)] => inner.as_slice(),
        _ => tuple
    };

    let mut result = OrderedMap::new();

    result.insert(name.to_string(), Value::Object(dict_from_tuple(keys, values)));

    Some(result)
}

fn restore_tuple_field(inner: &Value, tuple: &[Value], i: usize) -> Option<OrderedMap> {
    let keys = tuple_keys(inner)?;
    let values = tuple.get(i)?.as_array()?;

    Some(dict_from_tuple(keys, values))
}

fn restore_nested_list(tuple: &[Value], i: usize, inner: &[Value]) -> Vec<Value> {
    let mut list = Vec::new();

    let Some(Value::Array(items)) = tuple.get(i) else {
        return list;
    };

    for sub in items {
        let Value::Array(sub) = sub else {
            continue;
        };

        let structure = match inner.first() {
            Some(Value::Array(first)) if first.len() >= 2 => first.as_slice(),
            _ => inner
        };

        list.push(Value::Object(restore_dict(sub, structure)));
    }

    list
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn as_map(value: Value) -> OrderedMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}")
        }
    }

    #[test]
    fn compact_zips_columns_into_rows() {
        let data = as_map(json!({
            "a": [1, 2, 3],
            "b": ["x", "y", "z"]
        }));

        let rows = restore_compact_data(&data);

        assert_eq!(rows, vec![
            json!({"a": 1, "b": "x"}),
            json!({"a": 2, "b": "y"}),
            json!({"a": 3, "b": "z"})
        ]);
    }

    #[test]
    fn compact_maps_enum_columns() {
        let data = as_map(json!({
            "id": [1, 2, 3],
            "kind": [0, 1, 2],
            "__ENUM__": {
                "kind": ["A", "B", "C"]
            }
        }));

        let rows = restore_compact_data(&data);

        assert_eq!(rows, vec![
            json!({"id": 1, "kind": "A"}),
            json!({"id": 2, "kind": "B"}),
            json!({"id": 3, "kind": "C"})
        ]);
    }

    #[test]
    fn compact_enum_keyed_by_numeric_strings() {
        let data = as_map(json!({
            "kind": [0, 2, 9],
            "__ENUM__": {
                "kind": {
                    "0": "zero",
                    "2": "two"
                }
            }
        }));

        let rows = restore_compact_data(&data);

        // index 9 is unknown and passes through unchanged
        assert_eq!(rows, vec![
            json!({"kind": "zero"}),
            json!({"kind": "two"}),
            json!({"kind": 9})
        ]);
    }

    #[test]
    fn compact_enum_handles_string_and_float_indices() {
        let data = as_map(json!({
            "kind": ["1", 0.0],
            "__ENUM__": {
                "kind": ["A", "B"]
            }
        }));

        let rows = restore_compact_data(&data);

        assert_eq!(rows, vec![
            json!({"kind": "B"}),
            json!({"kind": "A"})
        ]);
    }

    #[test]
    fn compact_ragged_columns_truncate() {
        let data = as_map(json!({
            "a": [1, 2, 3],
            "b": ["x"]
        }));

        let rows = restore_compact_data(&data);

        assert_eq!(rows, vec![json!({"a": 1, "b": "x"})]);
    }

    #[test]
    fn restore_dict_positional() {
        let tuple = [json!(10), json!(20), json!(30)];
        let structure = [json!("x"), json!("y"), json!("z")];

        let result = restore_dict(&tuple, &structure);

        assert_eq!(Value::Object(result), json!({"x": 10, "y": 20, "z": 30}));
    }

    #[test]
    fn restore_dict_simple_tuple_unwraps_one_level() {
        let tuple = [json!([1, 2])];
        let structure = [json!("outer"), json!({"__tuple__": ["p", "q"]})];

        let result = restore_dict(&tuple, &structure);

        assert_eq!(Value::Object(result), json!({"outer": {"p": 1, "q": 2}}));
    }

    #[test]
    fn restore_dict_skips_null_positions() {
        let tuple = [json!(1), json!(null), json!(3)];
        let structure = [json!("a"), json!("b"), json!("c")];

        let result = restore_dict(&tuple, &structure);

        assert_eq!(Value::Object(result), json!({"a": 1, "c": 3}));
    }

    #[test]
    fn restore_dict_nested_lists() {
        let tuple = [
            json!(5),
            json!([[1, "one"], [2, "two"]])
        ];

        let structure = [
            json!("id"),
            json!(["entries", [["value", "label"]]])
        ];

        let result = restore_dict(&tuple, &structure);

        assert_eq!(Value::Object(result), json!({
            "id": 5,
            "entries": [
                {"value": 1, "label": "one"},
                {"value": 2, "label": "two"}
            ]
        }));
    }

    #[test]
    fn merge_keeps_unreplaced_prior_rows_sorted() {
        let prior = json!([
            {"cardId": 3, "old": true},
            {"cardId": 1, "old": true}
        ]);

        let restored = vec![
            json!({"cardId": 3, "old": false}),
            json!({"cardId": 2, "old": false})
        ];

        let merged = merge_by_id(Some(&prior), restored, "cardId");

        assert_eq!(merged, vec![
            json!({"cardId": 1, "old": true}),
            json!({"cardId": 2, "old": false}),
            json!({"cardId": 3, "old": false})
        ]);
    }

    #[test]
    fn restore_master_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let structure_path = dir.path().join("structures.json");

        std::fs::write(&structure_path, r#"{
            "gachas": [["gacha", {"__tuple__": ["id", "name"]}]]
        }"#).unwrap();

        let master = as_map(json!({
            "compactCards": {
                "id": [1, 2],
                "kind": [0, 1],
                "__ENUM__": {
                    "kind": ["A", "B"]
                }
            },
            "gachas": [[[10, "first"]], [[11, "second"]]],
            "plain": {"untouched": true}
        }));

        let restored = restore_master(master, &structure_path).unwrap();

        let keys = restored.keys().collect::<Vec<_>>();

        assert_eq!(keys, ["compactCards", "cards", "gachas", "plain"]);

        assert_eq!(restored["cards"], json!([
            {"id": 1, "kind": "A"},
            {"id": 2, "kind": "B"}
        ]));

        assert_eq!(restored["gachas"], json!([
            {"gacha": {"id": 10, "name": "first"}},
            {"gacha": {"id": 11, "name": "second"}}
        ]));

        assert_eq!(restored["plain"], json!({"untouched": true}));
    }

    #[test]
    fn restore_master_merges_event_cards() {
        let dir = tempfile::tempdir().unwrap();
        let structure_path = dir.path().join("structures.json");

        std::fs::write(&structure_path, "{}").unwrap();

        let master = as_map(json!({
            "eventCards": [
                {"cardId": 9, "stale": true},
                {"cardId": 1, "stale": true}
            ],
            "compactEventCards": {
                "cardId": [9, 4],
                "bonus": [10, 20]
            }
        }));

        let restored = restore_master(master, &structure_path).unwrap();

        assert_eq!(restored["eventCards"], json!([
            {"cardId": 1, "stale": true},
            {"cardId": 4, "bonus": 20},
            {"cardId": 9, "bonus": 10}
        ]));
    }
}
