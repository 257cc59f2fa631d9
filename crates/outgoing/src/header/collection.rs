//! Case-insensitive header storage for outgoing messages.
//!
//! Names are looked up by their lowercased form while the casing the caller used is kept for
//! the wire. Entries keep their first insertion position, so the committed header block lists
//! headers in the order they were first set.

use crate::protocol::OutgoingError;
use crate::utils::ensure;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;

/// The value of one outgoing header field: a scalar or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    /// Iterates the values in order, a scalar yields itself.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            FieldValue::Single(value) => std::slice::from_ref(value),
            FieldValue::Multi(values) => values,
        };
        values.iter().map(String::as_str)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Single(value) => Some(value),
            FieldValue::Multi(_) => None,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, FieldValue::Multi(_))
    }

    fn push_all(&mut self, value: FieldValue) {
        if let FieldValue::Single(existing) = self {
            *self = FieldValue::Multi(vec![std::mem::take(existing)]);
        }
        if let FieldValue::Multi(values) = self {
            match value {
                FieldValue::Single(value) => values.push(value),
                FieldValue::Multi(more) => values.extend(more),
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Single(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Single(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Single(value.clone())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Single(value.to_string())
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Single(value.to_string())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Single(value.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        FieldValue::Multi(values)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        FieldValue::Multi(values.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for FieldValue {
    fn from(values: &[&str]) -> Self {
        FieldValue::Multi(values.iter().map(|v| (*v).to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldValue {
    fn from(values: [&str; N]) -> Self {
        FieldValue::Multi(values.iter().map(|v| (*v).to_owned()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    key: String,
    name: String,
    value: FieldValue,
}

/// The mutable header set of an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingHeaders {
    entries: Vec<HeaderEntry>,
}

impl OutgoingHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets a header, replacing any previous value stored under the same name.
    pub fn set<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> Result<(), OutgoingError> {
        let value = value.into();
        validate_header_name(name)?;
        validate_field_value(name, &value)?;

        let key = name.to_ascii_lowercase();
        match self.position(&key) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.name = name.to_owned();
                entry.value = value;
            }
            None => self.entries.push(HeaderEntry { key, name: name.to_owned(), value }),
        }
        Ok(())
    }

    /// Appends to a header, creating it when absent and promoting a scalar to a list otherwise.
    pub fn append<V: Into<FieldValue>>(&mut self, name: &str, value: V) -> Result<(), OutgoingError> {
        let value = value.into();
        validate_header_name(name)?;
        validate_field_value(name, &value)?;

        let key = name.to_ascii_lowercase();
        match self.position(&key) {
            Some(index) => self.entries[index].value.push_all(value),
            None => self.entries.push(HeaderEntry { key, name: name.to_owned(), value }),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let key = name.to_ascii_lowercase();
        self.position(&key).map(|index| &self.entries[index].value)
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        self.position(&key).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let key = name.to_ascii_lowercase();
        self.position(&key).map(|index| self.entries.remove(index).value)
    }

    /// Lowercased names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key.clone()).collect()
    }

    /// Names with the casing they were set with, in insertion order.
    pub fn raw_names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Iterates `(original name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|entry| (entry.name.as_str(), &entry.value))
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }
}

/// Flattens a [`HeaderMap`] into fields ready for [`OutgoingHeaders::set`].
///
/// Repeated fields are joined with `", "`, the way the map's own readers combine them, except
/// `set-cookie`: every cookie is kept as its own list element and all of them are set at once
/// at the end, because a joined cookie list can't be split back safely.
pub(crate) fn coalesce_header_map(headers: &HeaderMap) -> Vec<(String, FieldValue)> {
    let mut fields = Vec::with_capacity(headers.keys_len());
    let mut cookies = Vec::new();

    for name in headers.keys() {
        let values = headers.get_all(name).iter().map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
        if *name == http::header::SET_COOKIE {
            cookies.extend(values);
            continue;
        }
        let joined = values.collect::<Vec<_>>().join(", ");
        fields.push((name.as_str().to_owned(), FieldValue::Single(joined)));
    }

    if !cookies.is_empty() {
        fields.push((http::header::SET_COOKIE.as_str().to_owned(), FieldValue::Multi(cookies)));
    }
    fields
}

/// Validates a header name as an http token.
pub(crate) fn validate_header_name(name: &str) -> Result<(), OutgoingError> {
    ensure!(!name.is_empty(), OutgoingError::invalid_header_name(name));
    HeaderName::from_bytes(name.as_bytes()).map(drop).map_err(|_e| OutgoingError::invalid_header_name(name))
}

/// Validates a single header value: visible ascii, space, tab and obs-text bytes only.
pub(crate) fn validate_header_value(name: &str, value: &str) -> Result<(), OutgoingError> {
    HeaderValue::from_bytes(value.as_bytes()).map(drop).map_err(|_e| OutgoingError::invalid_header_value(name))
}

fn validate_field_value(name: &str, value: &FieldValue) -> Result<(), OutgoingError> {
    value.iter().try_for_each(|v| validate_header_value(name, v))
}
