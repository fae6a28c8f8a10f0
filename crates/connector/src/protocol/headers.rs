//! Ordered request header storage.
//!
//! Request headers are kept exactly as they arrived: in order, with duplicate
//! names preserved as separate entries. Names are stored lowercased by the
//! header parser, so lookups compare ASCII case-insensitively only as a
//! safety net for headers added by code.

use bytes::Bytes;

/// One header field as received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: Bytes,
    value: Bytes,
}

impl HeaderField {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

/// An ordered multi-map of header names to values.
///
/// The storage is cleared, not reallocated, when the owning request is
/// recycled.
#[derive(Debug, Default)]
pub struct MimeHeaders {
    fields: Vec<HeaderField>,
}

impl MimeHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. An existing field with the same name is never replaced.
    pub fn add_value(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.fields.push(HeaderField { name: name.into(), value: value.into() });
    }

    /// Replaces every field named `name` with a single field.
    pub fn set_value(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push(HeaderField { name, value: value.into() });
    }

    pub fn remove(&mut self, name: &[u8]) {
        self.fields.retain(|field| !field.name.eq_ignore_ascii_case(name));
    }

    /// The first value registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.get_all(name).next()
    }

    /// The first value under `name`, if it is valid UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Every value registered under `name`, in arrival order.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a Bytes> + use<'a, 'n> {
        self.fields
            .iter()
            .filter(move |field| field.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|field| &field.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn recycle(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_kept_in_order() {
        let mut headers = MimeHeaders::new();
        headers.add_value("accept", "text/html");
        headers.add_value("host", "a");
        headers.add_value("accept", "text/plain");

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get_str("accept"), Some("text/html"));
        let all: Vec<_> = headers.get_all("Accept").collect();
        assert_eq!(all, vec![&Bytes::from_static(b"text/html"), &Bytes::from_static(b"text/plain")]);
    }

    #[test]
    fn test_set_value_replaces_all() {
        let mut headers = MimeHeaders::new();
        headers.add_value("host", "a");
        headers.add_value("host", "b");
        headers.set_value("host", "c");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get_str("host"), Some("c"));

        headers.recycle();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_value_outlives_lookup_name() {
        let mut headers = MimeHeaders::new();
        headers.add_value("content-type", "text/plain");

        let value = {
            let name = String::from("Content-Type");
            headers.get_str(&name)
        };
        assert_eq!(value, Some("text/plain"));
    }
}
