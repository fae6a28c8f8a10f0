use tracing::warn;

/// Request parameters collected from the query string and, for form posts,
/// from the request body.
///
/// Parsing happens lazily on the first call to
/// [`Exchange::parameters`](crate::connection::Exchange::parameters).
#[derive(Debug, Default)]
pub struct Parameters {
    params: Vec<(String, String)>,
    parsed: bool,
}

impl Parameters {
    /// Decodes `application/x-www-form-urlencoded` data and appends the pairs.
    ///
    /// Undecodable input is logged and skipped; a bad query string does not fail the request.
    pub fn process(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(data) {
            Ok(pairs) => self.params.extend(pairs),
            Err(e) => warn!(cause = %e, "skip undecodable parameters"),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.params.iter().filter(move |(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub(crate) fn is_parsed(&self) -> bool {
        self.parsed
    }

    pub(crate) fn mark_parsed(&mut self) {
        self.parsed = true;
    }

    pub fn recycle(&mut self) {
        self.params.clear();
        self.parsed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_query_and_form() {
        let mut params = Parameters::default();
        params.process(b"x=1&name=a+b");
        params.process(b"x=2&empty=");

        assert_eq!(params.get("x"), Some("1"));
        assert_eq!(params.get_all("x").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(params.get("name"), Some("a b"));
        assert_eq!(params.get("empty"), Some(""));
        assert_eq!(params.len(), 4);

        params.recycle();
        assert!(params.is_empty());
        assert!(!params.is_parsed());
    }

    #[test]
    fn test_value_outlives_lookup_name() {
        let mut params = Parameters::default();
        params.process(b"lang=rust");

        let value = {
            let name = format!("la{}", "ng");
            params.get(&name)
        };
        assert_eq!(value, Some("rust"));
    }
}
