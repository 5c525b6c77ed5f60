//! 结果记录工具：归一化、按键去重、规范化JSON

use std::collections::HashSet;

use serde_json::Value;

/// 把抓取器返回值归一化为记录列表
///
/// 数组取其元素，`null` 视为空，其他值包装为单元素列表。
pub fn normalize_records(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn record_key(record: &Value, key: &str) -> Option<String> {
    record.get(key).map(canonical_json)
}

/// 按键去重，保留首次出现的记录；缺少该键的记录原样保留
pub fn dedup_records(records: Vec<Value>, key: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| match record_key(record, key) {
            Some(k) => seen.insert(k),
            None => true,
        })
        .collect()
}

/// 追加记录，配置了去重键时对合并结果去重
pub fn append_records(existing: Vec<Value>, incoming: Vec<Value>, key: Option<&str>) -> Vec<Value> {
    let mut merged = existing;
    merged.extend(incoming);
    match key {
        Some(key) => dedup_records(merged, key),
        None => merged,
    }
}

/// 规范化JSON：对象键排序、无多余空白，用作缓存键与去重键
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
