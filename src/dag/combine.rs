// src/dag/combine.rs

//! Fan-in and fan-out data shaping for `Collect` and `Mapper` tasks.

use serde_json::Value;

use crate::dag::task::DataMap;

/// Combine the outputs of a Collect task's predecessors.
///
/// `outputs` must be in declared predecessor order. A key produced by more
/// than one predecessor becomes a list of values in that order; a key
/// produced by exactly one predecessor is passed through unchanged.
pub fn collect_outputs(outputs: Vec<DataMap>) -> DataMap {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for output in outputs {
        for (key, value) in output {
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value),
                None => grouped.push((key, vec![value])),
            }
        }
    }

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            (key, value)
        })
        .collect()
}

/// Split a Mapper's resolved input into one input set per item of the
/// sequence stored under `mapper_arg`.
///
/// Object items are merged into the child input; any other item is stored
/// under `mapper_arg`. Every other input key is copied to each child.
pub fn split_mapper_input(input: &DataMap, mapper_arg: &str) -> Result<Vec<DataMap>, String> {
    let items = match input.get(mapper_arg) {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) => return Err(format!("mapper argument '{mapper_arg}' is empty")),
        Some(other) => {
            return Err(format!(
                "mapper argument '{mapper_arg}' is not a sequence (got {other})"
            ));
        }
        None => return Err(format!("mapper argument '{mapper_arg}' not in input")),
    };

    let shared: DataMap = input
        .iter()
        .filter(|(k, _)| k.as_str() != mapper_arg)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(items
        .iter()
        .map(|item| {
            let mut child = shared.clone();
            match item {
                Value::Object(fields) => child.extend(fields.clone()),
                other => {
                    child.insert(mapper_arg.to_string(), other.clone());
                }
            }
            child
        })
        .collect())
}

/// Gather the outputs of a Mapper's children: every key maps to the list of
/// child values in item order (`null` where a child did not produce it).
pub fn gather_mapped_outputs(outputs: &[DataMap]) -> DataMap {
    let mut keys: Vec<&String> = Vec::new();
    for output in outputs {
        for key in output.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    keys.into_iter()
        .map(|key| {
            let values = outputs
                .iter()
                .map(|o| o.get(key).cloned().unwrap_or(Value::Null))
                .collect();
            (key.clone(), Value::Array(values))
        })
        .collect()
}
