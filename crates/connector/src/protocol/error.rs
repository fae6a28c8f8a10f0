use http::StatusCode;
use std::error::Error;
use std::io;
use thiserror::Error;

/// Boxed error returned by an [`Adapter`](crate::adapter::Adapter).
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("prepare error: {source}")]
    PrepareError {
        #[from]
        source: PrepareError,
    },

    #[error("application error: {source}")]
    ApplicationError { source: BoxError },
}

impl HttpError {
    pub fn application(source: BoxError) -> Self {
        Self::ApplicationError { source }
    }

    /// Whether this error came from the transport rather than from the message.
    ///
    /// Transport failures close the connection without writing anything.
    pub fn is_io(&self) -> bool {
        match self {
            HttpError::RequestError { source } => source.is_io(),
            HttpError::ResponseError { source } => source.is_io(),
            HttpError::PrepareError { .. } | HttpError::ApplicationError { .. } => false,
        }
    }

    /// The status an uncommitted response gets for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::RequestError { source: ParseError::BodyTooLarge { .. } } => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::RequestError { .. } => StatusCode::BAD_REQUEST,
            HttpError::PrepareError { source } => source.status_code(),
            HttpError::ResponseError { .. } | HttpError::ApplicationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, exceed the limit {max_size}")]
    TooLargeHeader { max_size: usize },

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("body size exceed the limit {limit}")]
    BodyTooLarge { limit: usize },

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(max_size: usize) -> Self {
        Self::TooLargeHeader { max_size }
    }

    pub fn invalid_request_line<S: ToString>(str: S) -> Self {
        Self::InvalidRequestLine { reason: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn body_too_large(limit: usize) -> Self {
        Self::BodyTooLarge { limit }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, ParseError::Io { .. } | ParseError::UnexpectedEof)
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("response header exceed the limit {max_size}")]
    HeaderOverflow { max_size: usize },

    /// A synchronous flush was attempted from outside the request-processing
    /// path while asynchronously written bytes are still pending.
    #[error("write backlog: asynchronous writes are still pending")]
    Backlog,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn header_overflow(max_size: usize) -> Self {
        Self::HeaderOverflow { max_size }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, SendError::Io { .. })
    }
}

/// Failures found while validating a parsed request before it is serviced.
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("unsupported protocol: {protocol}")]
    UnsupportedVersion { protocol: String },

    #[error("unsupported transfer coding: {coding}")]
    UnsupportedTransferCoding { coding: String },

    #[error("missing host header")]
    MissingHost,

    #[error("invalid host header: {reason}")]
    InvalidHost { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },
}

impl PrepareError {
    pub fn unsupported_version<S: ToString>(protocol: S) -> Self {
        Self::UnsupportedVersion { protocol: protocol.to_string() }
    }

    pub fn unsupported_transfer_coding<S: ToString>(coding: S) -> Self {
        Self::UnsupportedTransferCoding { coding: coding.to_string() }
    }

    pub fn invalid_host<S: ToString>(str: S) -> Self {
        Self::InvalidHost { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PrepareError::UnsupportedVersion { .. } => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            PrepareError::UnsupportedTransferCoding { .. } => StatusCode::NOT_IMPLEMENTED,
            PrepareError::MissingHost | PrepareError::InvalidHost { .. } | PrepareError::InvalidContentLength { .. } => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}
