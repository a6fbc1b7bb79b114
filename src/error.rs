use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// Broad category of an [`Error`].
///
/// Only `Transport`, `Protocol` and `Decode` can occur after a request has been
/// handed to the network. `Config` and `Validation` are raised while a call is
/// being built and mean no request was sent.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    /// A named configuration is missing or malformed.
    Config,
    /// The call could not be assembled (bad payload, unknown method code, ...).
    Validation,
    /// Network failure, timeout or cancellation.
    Transport,
    /// The remote answered with an envelope describing a failure.
    Protocol,
    /// A typed view of the response did not match its shape.
    Decode,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn config_not_found<S: Into<String>>(name: S) -> Self {
        ConfigNotFound { name: name.into() }.into()
    }

    pub fn invalid_config<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
        .into()
    }

    pub fn transport<S: Into<String>>(reason: TransportReason, message: S) -> Self {
        Transport {
            reason,
            message: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::transport(
            TransportReason::Cancelled,
            "call was cancelled before a response arrived",
        )
    }

    pub fn protocol<C, S, M>(code: C, state: S, message: M) -> Self
    where
        C: Into<String>,
        S: Into<String>,
        M: Into<String>,
    {
        ProtocolError {
            code: code.into(),
            state: state.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn decode<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Decode {
            path: path.into(),
            reason: reason.into(),
        }
        .into()
    }

    /// Returns `true` when the call was aborted through its cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.downcast_ref::<Transport>()
            .is_some_and(|t| t.reason == TransportReason::Cancelled)
    }

    /// Returns the server-supplied failure, if this error came from the envelope.
    #[must_use]
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        self.downcast_ref::<ProtocolError>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            // Server failures print exactly what the server said.
            Some(src) if self.kind == Kind::Protocol => write!(f, "{src}"),
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNotFound {
    pub name: String,
}

impl fmt::Display for ConfigNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no configuration registered under `{}`", self.name)
    }
}

impl StdError for ConfigNotFound {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidConfig {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration `{}`: {}", self.name, self.reason)
    }
}

impl StdError for InvalidConfig {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransportReason {
    Network,
    Timeout,
    Cancelled,
    /// The dispatch task ended without producing a response.
    Aborted,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub reason: TransportReason,
    pub message: String,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl StdError for Transport {}

/// Failure reported by the remote inside the response envelope.
///
/// `message` holds the raw response body when the server left it empty.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: String,
    pub state: String,
    pub message: String,
}

impl ProtocolError {
    /// Whether the remote rejected the request signature or its signing key.
    #[must_use]
    pub fn is_sign_error(&self) -> bool {
        matches!(self.state.as_str(), "sign_error" | "rest_sign" | "rest_sign_key")
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keeps the server text untouched so the raw-body fallback reads verbatim.
        f.write_str(&self.message)
    }
}

impl StdError for ProtocolError {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decode {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for Decode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "failed to decode response: {}", self.reason)
        } else {
            write!(
                f,
                "failed to decode response at `{}`: {}",
                self.path, self.reason
            )
        }
    }
}

impl StdError for Decode {}

impl From<ConfigNotFound> for Error {
    fn from(err: ConfigNotFound) -> Self {
        Error::with_source(Kind::Config, err)
    }
}

impl From<InvalidConfig> for Error {
    fn from(err: InvalidConfig) -> Self {
        Error::with_source(Kind::Config, err)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Transport> for Error {
    fn from(err: Transport) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::with_source(Kind::Protocol, err)
    }
}

impl From<Decode> for Error {
    fn from(err: Decode) -> Self {
        Error::with_source(Kind::Decode, err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return Error::with_source(Kind::Validation, e);
        }
        let reason = if e.is_timeout() {
            TransportReason::Timeout
        } else {
            TransportReason::Network
        };
        Error::transport(reason, e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_displays_server_message_verbatim() {
        let err = Error::protocol("400", "bad", "m");

        assert_eq!(err.kind(), Kind::Protocol);
        assert_eq!(err.to_string(), "m");
        let inner = err.protocol_error().expect("protocol payload");
        assert_eq!(inner.code, "400");
        assert_eq!(inner.state, "bad");
    }

    #[test]
    fn cancelled_is_a_transport_error() {
        let err = Error::cancelled();

        assert_eq!(err.kind(), Kind::Transport);
        assert!(err.is_cancelled(), "cancelled error must report itself");
        assert!(
            !Error::transport(TransportReason::Timeout, "slow").is_cancelled(),
            "timeouts are not cancellations"
        );
    }

    #[test]
    fn sign_error_states_are_recognised() {
        for state in ["sign_error", "rest_sign", "rest_sign_key"] {
            let err = ProtocolError {
                code: "500".to_owned(),
                state: state.to_owned(),
                message: "sign is wrong".to_owned(),
            };
            assert!(err.is_sign_error(), "{state} should be a sign error");
        }

        let other = ProtocolError {
            code: "500".to_owned(),
            state: "system".to_owned(),
            message: String::new(),
        };
        assert!(!other.is_sign_error(), "system is not a sign error");
    }

    #[test]
    fn config_not_found_keeps_the_name() {
        let err = Error::config_not_found("oauth");

        assert_eq!(err.kind(), Kind::Config);
        assert_eq!(
            err.downcast_ref::<ConfigNotFound>().map(|c| c.name.as_str()),
            Some("oauth")
        );
    }
}
