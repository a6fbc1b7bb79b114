use std::collections::HashMap;
use std::time::Duration;

use bon::Builder;
use chrono::NaiveDateTime;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Result;
use crate::error::Error;
use crate::sign::IdParam;

/// Timeout applied to a call when its `RequestSpec` does not name one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP verb used on the wire.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    #[default]
    Post,
}

/// Where the method parameters travel.
///
/// `Get` puts the JSON-encoded parameters into the `payload` query field and
/// signs an empty body. `Post` sends them as the JSON request body.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum PayloadMode {
    Get,
    #[default]
    Post,
}

impl HttpVerb {
    #[must_use]
    pub const fn as_method(self) -> reqwest::Method {
        match self {
            HttpVerb::Get => reqwest::Method::GET,
            HttpVerb::Post => reqwest::Method::POST,
        }
    }
}

/// Static description of one remote method.
#[derive(Clone, Debug, Eq, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct RequestSpec {
    pub code: u32,
    pub path: String,
    #[builder(default)]
    pub verb: HttpVerb,
    #[builder(default)]
    pub payload: PayloadMode,
    /// Value of the signed `method` parameter. Empty means "not sent".
    #[builder(default)]
    pub method: String,
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,
    #[builder(default)]
    pub id_param: IdParam,
}

/// Method code to [`RequestSpec`] table registered for a client type.
#[derive(Clone, Debug, Default)]
pub struct RequestSpecs {
    specs: HashMap<u32, RequestSpec>,
}

impl RequestSpecs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a spec, rejecting a second spec for the same method code.
    pub fn register(&mut self, spec: RequestSpec) -> Result<()> {
        if spec.path.is_empty() {
            return Err(Error::validation(format!(
                "request spec {} has an empty path",
                spec.code
            )));
        }
        if self.specs.contains_key(&spec.code) {
            return Err(Error::validation(format!(
                "method code {} registered twice",
                spec.code
            )));
        }
        self.specs.insert(spec.code, spec);
        Ok(())
    }

    /// Builds a table, failing on the first spec [`RequestSpecs::register`]
    /// rejects.
    pub fn try_from_iter<I: IntoIterator<Item = RequestSpec>>(specs: I) -> Result<Self> {
        let mut table = Self::new();
        for spec in specs {
            table.register(spec)?;
        }
        Ok(table)
    }

    pub fn get(&self, code: u32) -> Result<&RequestSpec> {
        self.specs
            .get(&code)
            .ok_or_else(|| Error::validation(format!("unknown method code {code}")))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl TryFrom<Vec<RequestSpec>> for RequestSpecs {
    type Error = Error;

    fn try_from(specs: Vec<RequestSpec>) -> Result<Self> {
        Self::try_from_iter(specs)
    }
}

/// Identity of the request being served by the caller.
///
/// `id` is sent as `X-Request-ID`. The signed `request_ip` is `ip` when set,
/// otherwise the request id itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestIdentity {
    pub id: String,
    pub ip: Option<String>,
}

impl RequestIdentity {
    #[must_use]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            ip: None,
        }
    }

    /// A fresh time-ordered request id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn with_ip<S: Into<String>>(mut self, ip: S) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub(crate) fn signed_ip(&self) -> &str {
        self.ip.as_deref().unwrap_or(&self.id)
    }
}

/// Per-call capabilities and overrides.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub token: Option<SecretString>,
    pub identity: Option<RequestIdentity>,
    pub timestamp: Option<NaiveDateTime>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    #[must_use]
    pub fn with_token<S: Into<SecretString>>(mut self, token: S) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: RequestIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
