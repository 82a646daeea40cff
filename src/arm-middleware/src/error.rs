// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The error returned by the request pipeline.

use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The error returned by the pipeline stages and the transport.
///
/// Errors come from several sources: the caller may cancel the request, the
/// request deadline may expire, the transport may fail to resolve, connect, or
/// complete a TLS handshake, or the request may be malformed before it is
/// sent. This type offers predicates to distinguish these cases without
/// matching on the error text.
///
/// Note that a response with an HTTP error status is **not** an error at this
/// level. The pipeline returns such responses unchanged, and the caller
/// decides how to interpret them. Use
/// [ResponseError][crate::arm_error::ResponseError] to extract the service
/// error details from those responses.
///
/// # Example
/// ```
/// use arm_middleware::error::Error;
/// fn handle(e: Error) {
///     if e.is_cancelled() {
///         println!("the caller gave up {e}");
///     } else if e.is_deadline_exceeded() {
///         println!("not enough time {e}");
///     } else {
///         println!("some other error {e}");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error representing an explicit cancellation.
    ///
    /// # Example
    /// ```
    /// use arm_middleware::error::Error;
    /// let error = Error::cancelled();
    /// assert!(error.is_cancelled());
    /// ```
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: None,
        }
    }

    /// The request context was cancelled before the request completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Creates an error representing an expired deadline.
    ///
    /// # Example
    /// ```
    /// use arm_middleware::error::Error;
    /// let error = Error::deadline_exceeded();
    /// assert!(error.is_deadline_exceeded());
    /// ```
    pub fn deadline_exceeded() -> Self {
        Self {
            kind: ErrorKind::DeadlineExceeded,
            source: None,
        }
    }

    /// The request could not be completed before its deadline.
    ///
    /// This is always a client-side generated error. The request may or may
    /// not have reached the service.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.kind, ErrorKind::DeadlineExceeded)
    }

    /// Creates an error representing a problem in the transport layer.
    ///
    /// Examples include DNS resolution failures, refused connections, TLS
    /// handshake failures, and connections closed before a response arrives.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use arm_middleware::error::Error;
    /// let error = Error::io("connection refused");
    /// assert!(error.is_io());
    /// assert!(error.source().is_some());
    /// ```
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
        }
    }

    /// A problem in the transport layer without a full HTTP response.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error representing a request that cannot be sent.
    ///
    /// For example, the URL has no host, or a header value is not valid.
    pub fn binding<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Binding,
            source: Some(source.into()),
        }
    }

    /// The request could not be built or bound to a connection.
    ///
    /// This is always a client-side generated error, detected before any
    /// bytes are sent.
    pub fn is_binding(&self) -> bool {
        matches!(self.kind, ErrorKind::Binding)
    }

    /// Creates an error for a problem that does not fit any other kind.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Cancelled, _) => write!(f, "context canceled"),
            (ErrorKind::DeadlineExceeded, _) => write!(f, "context deadline exceeded"),
            (ErrorKind::Io, Some(e)) => write!(f, "the transport reports an error: {e}"),
            (ErrorKind::Binding, Some(e)) => write!(f, "cannot send the request {e}"),
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Debug)]
enum ErrorKind {
    Cancelled,
    DeadlineExceeded,
    Io,
    Binding,
    /// A uncategorized error.
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn cancelled() {
        let error = Error::cancelled();
        assert!(error.is_cancelled(), "{error:?}");
        assert!(!error.is_deadline_exceeded(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");
        assert_eq!(error.to_string(), "context canceled");
    }

    #[test]
    fn deadline_exceeded() {
        let error = Error::deadline_exceeded();
        assert!(error.is_deadline_exceeded(), "{error:?}");
        assert!(!error.is_cancelled(), "{error:?}");
        assert_eq!(error.to_string(), "context deadline exceeded");
    }

    #[test]
    fn io() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = Error::io(source);
        assert!(error.is_io(), "{error:?}");
        assert!(error.to_string().contains("refused"), "{error}");
        let got = error
            .source()
            .and_then(|e| e.downcast_ref::<std::io::Error>());
        assert!(
            matches!(got, Some(e) if e.kind() == std::io::ErrorKind::ConnectionRefused),
            "{error:?}"
        );
    }

    #[test]
    fn binding() {
        let error = Error::binding("missing host");
        assert!(error.is_binding(), "{error:?}");
        assert!(!error.is_io(), "{error:?}");
        assert!(error.to_string().contains("missing host"), "{error}");
    }

    #[test]
    fn other() {
        let error = Error::other("uh oh");
        assert!(!error.is_io(), "{error:?}");
        assert!(!error.is_binding(), "{error:?}");
        assert!(error.to_string().contains("uh oh"), "{error}");
    }
}
