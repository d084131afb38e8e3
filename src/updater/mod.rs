use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::codec::OrderedMap;

pub mod master;
pub mod nuverse;
pub mod apphash;
pub mod git;

pub use apphash::AppHashUpdater;
pub use git::GitPusher;

/// Lenient string read over an ordered JSON map; numbers are rendered as
/// their literal form.
pub(crate) fn get_string(map: &OrderedMap, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        _ => String::new()
    }
}

/// Lenient integer read over an ordered JSON map.
pub(crate) fn get_int(map: &OrderedMap, key: &str) -> i64 {
    match map.get(key) {
        Some(Value::Number(value)) => value.as_i64()
            .or_else(|| value.as_f64().map(|value| value as i64))
            .unwrap_or(0),

        Some(Value::String(value)) => value.trim().parse().unwrap_or(0),

        _ => 0
    }
}

/// First non-empty string among several candidate keys.
pub(crate) fn get_first_str(map: &OrderedMap, keys: &[&str]) -> String {
    for key in keys {
        let value = get_string(map, key);

        if !value.is_empty() {
            return value;
        }
    }

    String::new()
}

/// Write a JSON document the way every master artifact is written:
/// parent directories on demand, 2-space indent, key order preserved.
pub(crate) fn save_json_file(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, value)?;

    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_reads() {
        let map: OrderedMap = serde_json::from_str(r#"{
            "dataVersion": "1.2.3",
            "cdnVersion": 10,
            "stringInt": "42",
            "floatInt": 7.9
        }"#).unwrap();

        assert_eq!(get_string(&map, "dataVersion"), "1.2.3");
        assert_eq!(get_string(&map, "cdnVersion"), "10");
        assert_eq!(get_string(&map, "missing"), "");

        assert_eq!(get_int(&map, "cdnVersion"), 10);
        assert_eq!(get_int(&map, "stringInt"), 42);
        assert_eq!(get_int(&map, "floatInt"), 7);
        assert_eq!(get_int(&map, "missing"), 0);

        assert_eq!(get_first_str(&map, &["missing", "dataVersion"]), "1.2.3");
    }

    #[test]
    fn json_files_use_two_space_indent_and_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cards.json");

        let value: OrderedMap = serde_json::from_str(r#"{"z": 1, "a": 2}"#).unwrap();

        save_json_file(&path, &value).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();

        assert_eq!(written, "{\n  \"z\": 1,\n  \"a\": 2\n}");
    }
}
