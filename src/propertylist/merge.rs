use plist::{Dictionary, Value};

use super::type_name;
use crate::error::PlistError;

/// The one key whose array form may be promoted to a dictionary when the two
/// sides disagree.
pub const DEVICE_CAPABILITIES_KEY: &str = "UIRequiredDeviceCapabilities";

/// How two arrays under the same key are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayPolicy {
    /// Old items followed by all new items.
    Concatenate,
    /// Old items followed by the new items not already present.
    Union,
}

/// Merges `new` onto `old`.
///
/// Dictionaries merge recursively, arrays combine per `policy`, and any other
/// value replaces the old one as long as its type is the same. A type change
/// is an error, except for device capabilities which may go from an array of
/// names to a dictionary of name to boolean.
pub fn merge_dictionaries(old: &mut Dictionary, new: &Dictionary, policy: ArrayPolicy) -> Result<(), PlistError> {
    for (key, incoming) in new.iter() {
        let Some(existing) = old.get_mut(key) else {
            old.insert(key.clone(), incoming.clone());
            continue;
        };

        merge_value(key, existing, incoming, policy)?;
    }

    Ok(())
}

fn merge_value(key: &str, existing: &mut Value, incoming: &Value, policy: ArrayPolicy) -> Result<(), PlistError> {
    if key == DEVICE_CAPABILITIES_KEY
        && incoming.as_dictionary().is_some()
        && let Some(items) = existing.as_array()
    {
        let promoted = capabilities_to_dictionary(items);
        *existing = Value::Dictionary(promoted);
    }

    match (existing, incoming) {
        (Value::Dictionary(old), Value::Dictionary(new)) => merge_dictionaries(old, new, policy),
        (Value::Array(old), Value::Array(new)) => {
            merge_arrays(old, new, policy);
            Ok(())
        }
        (Value::Dictionary(old), Value::Array(new)) if key == DEVICE_CAPABILITIES_KEY => {
            merge_dictionaries(old, &capabilities_to_dictionary(new), policy)
        }
        (old, new) if type_name(old) == type_name(new) => {
            *old = new.clone();
            Ok(())
        }
        (old, new) => Err(PlistError::MergeTypeMismatch {
            key: key.to_owned(),
            new: type_name(new),
            old: type_name(old),
        }),
    }
}

pub fn merge_arrays(old: &mut Vec<Value>, new: &[Value], policy: ArrayPolicy) {
    match policy {
        ArrayPolicy::Concatenate => old.extend(new.iter().cloned()),
        ArrayPolicy::Union => {
            for item in new {
                if !old.contains(item) {
                    old.push(item.clone());
                }
            }
        }
    }
}

/// `["armv7", "metal"]` becomes `{ armv7 = true; metal = true; }`. Entries
/// that are not strings are dropped.
pub fn capabilities_to_dictionary(items: &[Value]) -> Dictionary {
    let mut dict = Dictionary::new();
    for item in items {
        if let Some(name) = item.as_string() {
            dict.insert(name.to_owned(), Value::Boolean(true));
        }
    }
    dict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Integer(n.into())
    }

    fn dict(pairs: Vec<(&str, Value)>) -> Dictionary {
        let mut dict = Dictionary::new();
        for (k, v) in pairs {
            dict.insert(k.to_owned(), v);
        }
        dict
    }

    #[test]
    fn test_type_change_is_an_error() {
        let mut old = dict(vec![("Integer", int(1))]);
        let new = dict(vec![("Integer", Value::Array(vec![int(1), int(2)]))]);

        let err = merge_dictionaries(&mut old, &new, ArrayPolicy::Union).unwrap_err();
        assert_eq!(err.to_string(), "tried to merge array value for key 'Integer' onto integer value");
    }

    #[test]
    fn test_union_dedups() {
        let mut old = dict(vec![("Array", Value::Array(vec![int(1), int(2)]))]);
        let new = dict(vec![("Array", Value::Array(vec![int(1), int(4)]))]);

        merge_dictionaries(&mut old, &new, ArrayPolicy::Union).unwrap();
        assert_eq!(old.get("Array"), Some(&Value::Array(vec![int(1), int(2), int(4)])));
    }

    #[test]
    fn test_concatenate_keeps_duplicates() {
        let mut old = vec![int(1), int(2)];
        merge_arrays(&mut old, &[int(1)], ArrayPolicy::Concatenate);
        assert_eq!(old, vec![int(1), int(2), int(1)]);
    }

    #[test]
    fn test_nested_and_scalar_replace() {
        let mut old = dict(vec![
            ("Name", Value::String("old".into())),
            ("Inner", Value::Dictionary(dict(vec![("A", int(1))]))),
        ]);
        let new = dict(vec![
            ("Name", Value::String("new".into())),
            ("Inner", Value::Dictionary(dict(vec![("B", int(2))]))),
        ]);

        merge_dictionaries(&mut old, &new, ArrayPolicy::Concatenate).unwrap();
        assert_eq!(old.get("Name").and_then(Value::as_string), Some("new"));
        let inner = old.get("Inner").and_then(Value::as_dictionary).unwrap();
        assert_eq!(inner.len(), 2);
    }

    #[test]
    fn test_capabilities_promotion() {
        let mut old = dict(vec![(
            DEVICE_CAPABILITIES_KEY,
            Value::Array(vec![Value::String("armv7".into())]),
        )]);
        let new = dict(vec![(
            DEVICE_CAPABILITIES_KEY,
            Value::Dictionary(dict(vec![("metal", Value::Boolean(true))])),
        )]);

        merge_dictionaries(&mut old, &new, ArrayPolicy::Union).unwrap();
        let caps = old.get(DEVICE_CAPABILITIES_KEY).and_then(Value::as_dictionary).unwrap();
        assert_eq!(caps.get("armv7"), Some(&Value::Boolean(true)));
        assert_eq!(caps.get("metal"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_promotion_only_for_capabilities() {
        let mut old = dict(vec![("Other", Value::Array(vec![]))]);
        let new = dict(vec![("Other", Value::Dictionary(Dictionary::new()))]);
        assert!(merge_dictionaries(&mut old, &new, ArrayPolicy::Union).is_err());
    }
}
