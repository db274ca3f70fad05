use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{DriverError, DriverResult};
use crate::protocol::Value;

/// Result variable names of one query, in projection order.
#[derive(Debug, Default, PartialEq)]
pub struct Variables {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Variables {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    /// Parse a VARIABLES payload: a list of strings.
    pub fn from_payload(payload: &Value) -> DriverResult<Self> {
        let items = payload.as_list().ok_or_else(|| {
            DriverError::Protocol(format!(
                "variables payload must be a list, got {:?}",
                payload.data_type()
            ))
        })?;
        let names = items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    DriverError::Protocol("variable names must be strings".to_string())
                })
            })
            .collect::<DriverResult<Vec<_>>>()?;
        Ok(Self::new(names))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Anything a record can be indexed by.
pub trait RecordKey {
    fn position(&self, variables: &Variables) -> Option<usize>;
}

impl RecordKey for usize {
    fn position(&self, variables: &Variables) -> Option<usize> {
        (*self < variables.len()).then_some(*self)
    }
}

impl RecordKey for &str {
    fn position(&self, variables: &Variables) -> Option<usize> {
        variables.position(self)
    }
}

impl RecordKey for String {
    fn position(&self, variables: &Variables) -> Option<usize> {
        variables.position(self)
    }
}

/// One row of a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    variables: Arc<Variables>,
    values: Vec<Value>,
}

impl Record {
    /// Fails when the value count does not match the variable count.
    pub fn new(variables: Arc<Variables>, values: Vec<Value>) -> DriverResult<Self> {
        if variables.len() != values.len() {
            return Err(DriverError::Protocol(format!(
                "record has {} values for {} variables",
                values.len(),
                variables.len()
            )));
        }
        Ok(Self { variables, values })
    }

    pub fn get<K: RecordKey>(&self, key: K) -> Option<&Value> {
        key.position(&self.variables).map(|i| &self.values[i])
    }

    pub fn has<K: RecordKey>(&self, key: K) -> bool {
        key.position(&self.variables).is_some()
    }

    pub fn keys(&self) -> &[String] {
        self.variables.names()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// `(variable, value)` pairs in projection order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.variables
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.entries()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.entries() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let variables = Arc::new(Variables::new(vec!["?x".to_string(), "?y".to_string()]));
        Record::new(variables, vec![Value::from(1), Value::from("b")]).unwrap()
    }

    #[test]
    fn test_lookup_by_index_and_name() {
        let record = record();
        assert_eq!(record.get(0), Some(&Value::Int64(1)));
        assert_eq!(record.get("?y"), Some(&Value::from("b")));
        assert_eq!(record.get(2), None);
        assert_eq!(record.get("?z"), None);
        assert!(record.has("?x"));
        assert!(!record.has(5));
    }

    #[test]
    fn test_value_count_mismatch() {
        let variables = Arc::new(Variables::new(vec!["a".to_string()]));
        let err = Record::new(variables, vec![]).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn test_entries_keep_projection_order() {
        let record = record();
        let names: Vec<_> = record.entries().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["?x", "?y"]);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"?x":1,"?y":"b"}"#
        );
        assert_eq!(record.to_map().len(), 2);
    }

    #[test]
    fn test_variables_payload() {
        let payload = Value::List(vec![Value::from("a"), Value::from("b")]);
        let variables = Variables::from_payload(&payload).unwrap();
        assert_eq!(variables.position("b"), Some(1));
        assert!(Variables::from_payload(&Value::List(vec![Value::Null])).is_err());
        assert!(Variables::from_payload(&Value::Null).is_err());
    }
}
