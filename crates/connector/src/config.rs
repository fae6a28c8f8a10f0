//! Connector configuration.
//!
//! Values only: how they are loaded is up to the embedding proxy. Every
//! knob has a default, and setters follow a consuming builder style.

use std::time::Duration;

use regex::Regex;

/// Packet-sized unit the header buffer is rounded to.
const BUFFER_UNIT: usize = 1500;
const MIN_HEADER_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    port: u16,
    secure: bool,
    header_buffer_size: usize,
    output_buffer_size: usize,
    max_post_size: usize,
    max_save_post_size: usize,
    max_swallow_size: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    keep_alive_timeout: Option<Duration>,
    max_keep_alive_requests: Option<usize>,
    restricted_user_agents: Vec<Regex>,
    compression: bool,
    server_header: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            secure: false,
            header_buffer_size: header_buffer_capacity(MIN_HEADER_BUFFER_SIZE),
            output_buffer_size: 8 * 1024,
            max_post_size: 2 * 1024 * 1024,
            max_save_post_size: 4 * 1024,
            max_swallow_size: 2 * 1024 * 1024,
            read_timeout: Some(Duration::from_secs(20)),
            write_timeout: Some(Duration::from_secs(20)),
            keep_alive_timeout: Some(Duration::from_secs(20)),
            max_keep_alive_requests: Some(100),
            restricted_user_agents: Vec::new(),
            compression: false,
            server_header: None,
        }
    }
}

/// Rounds a requested header buffer size to whole 1500 byte units.
///
/// Sizes below the 8 KiB minimum fall back to six units.
pub fn header_buffer_capacity(size: usize) -> usize {
    if size < MIN_HEADER_BUFFER_SIZE {
        6 * BUFFER_UNIT
    } else {
        (size / BUFFER_UNIT + 1) * BUFFER_UNIT
    }
}

impl ConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Capacity of the per-connection input window after rounding.
    pub fn header_buffer_size(&self) -> usize {
        self.header_buffer_size
    }

    pub fn with_header_buffer_size(mut self, size: usize) -> Self {
        self.header_buffer_size = header_buffer_capacity(size);
        self
    }

    pub fn output_buffer_size(&self) -> usize {
        self.output_buffer_size
    }

    pub fn with_output_buffer_size(mut self, size: usize) -> Self {
        self.output_buffer_size = size.max(1);
        self
    }

    /// Largest form body that is parsed into parameters.
    pub fn max_post_size(&self) -> usize {
        self.max_post_size
    }

    pub fn with_max_post_size(mut self, size: usize) -> Self {
        self.max_post_size = size;
        self
    }

    /// Largest body the buffered input filter keeps for replay.
    pub fn max_save_post_size(&self) -> usize {
        self.max_save_post_size
    }

    pub fn with_max_save_post_size(mut self, size: usize) -> Self {
        self.max_save_post_size = size;
        self
    }

    /// How many unread body bytes are drained before giving up on the connection.
    pub fn max_swallow_size(&self) -> usize {
        self.max_swallow_size
    }

    pub fn with_max_swallow_size(mut self, size: usize) -> Self {
        self.max_swallow_size = size;
        self
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// How long an idle kept-alive connection waits for the next request.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keep_alive_timeout
    }

    pub fn with_keep_alive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Requests served per connection; `None` means unlimited.
    pub fn max_keep_alive_requests(&self) -> Option<usize> {
        self.max_keep_alive_requests
    }

    pub fn with_max_keep_alive_requests(mut self, max: Option<usize>) -> Self {
        self.max_keep_alive_requests = max;
        self
    }

    pub fn restricted_user_agents(&self) -> &[Regex] {
        &self.restricted_user_agents
    }

    /// Compiles user-agent patterns; each must match the whole header value.
    pub fn with_restricted_user_agents<I, S>(mut self, patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.restricted_user_agents = patterns
            .into_iter()
            .map(|pattern| Regex::new(&format!("^(?:{})$", pattern.as_ref())))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn is_restricted_user_agent(&self, user_agent: &str) -> bool {
        self.restricted_user_agents.iter().any(|re| re.is_match(user_agent))
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn server_header(&self) -> Option<&str> {
        self.server_header.as_deref()
    }

    pub fn with_server_header(mut self, server: impl Into<String>) -> Self {
        self.server_header = Some(server.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_buffer_rounding() {
        assert_eq!(header_buffer_capacity(100), 9000);
        assert_eq!(header_buffer_capacity(8192), 9000);
        assert_eq!(header_buffer_capacity(16 * 1024), 16500);
        assert_eq!(ConnectorConfig::default().header_buffer_size(), 9000);
    }

    #[test]
    fn test_restricted_user_agents_are_anchored() {
        let config = ConnectorConfig::default().with_restricted_user_agents([".*MSIE 5.*", "curl/7"]).unwrap();

        assert!(config.is_restricted_user_agent("Mozilla/4.0 (compatible; MSIE 5.5)"));
        assert!(config.is_restricted_user_agent("curl/7"));
        assert!(!config.is_restricted_user_agent("curl/7.88"));
    }
}
