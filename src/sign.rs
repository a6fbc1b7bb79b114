//! Request signing.
//!
//! The signature is `md5(canonical_params + body + secret)` rendered as lowercase
//! hex, where `canonical_params` is the form-encoded parameter set sorted by key.
//! The remote recomputes it bit for bit, so nothing here is negotiable.

use std::collections::BTreeMap;

use md5::{Digest as _, Md5};
use secrecy::{ExposeSecret as _, SecretString};
use url::form_urlencoded;

/// Protocol version sent with every request.
pub const VERSION: &str = "2.0";

/// Body used for signing when a non-GET payload carries no parameters.
pub const EMPTY_BODY: &str = "{}";

pub const METHOD: &str = "method";
pub const REQUEST_IP: &str = "request_ip";
pub const TIMESTAMP: &str = "timestamp";
pub const TOKEN: &str = "token";
pub const VERSION_KEY: &str = "version";

/// Name of the parameter that identifies the calling application.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IdParam {
    #[default]
    AppId,
    /// Used by sub-resource lookups.
    ClientId,
}

impl IdParam {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            IdParam::AppId => "app_id",
            IdParam::ClientId => "client_id",
        }
    }
}

/// The sorted parameter set that feeds the signature.
///
/// Keys are kept in a `BTreeMap`, so the encoded form is independent of the
/// order in which fields were set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanonicalParams {
    fields: BTreeMap<&'static str, String>,
}

impl CanonicalParams {
    #[must_use]
    pub fn new(id_param: IdParam, app_id: &str, version: &str, timestamp: &str) -> Self {
        let mut params = Self::default();
        params.fields.insert(id_param.key(), app_id.to_owned());
        params.fields.insert(VERSION_KEY, version.to_owned());
        params.fields.insert(TIMESTAMP, timestamp.to_owned());
        params
    }

    /// Sets an optional field. Empty values are left out of the canonical form.
    pub fn set(&mut self, key: &'static str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.fields.remove(key);
        } else {
            self.fields.insert(key, value.to_owned());
        }
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: &str) -> Self {
        self.set(METHOD, method);
        self
    }

    #[must_use]
    pub fn with_request_ip(mut self, request_ip: &str) -> Self {
        self.set(REQUEST_IP, request_ip);
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.set(TOKEN, token);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Fields in key order.
    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// `key=value&key=value...` with standard form encoding.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.pairs() {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// Signs these parameters together with the raw request body.
    #[must_use]
    pub fn sign(&self, body: &str, secret: &SecretString) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.encode().as_bytes());
        hasher.update(body.as_bytes());
        hasher.update(secret.expose_secret().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Inputs of a single signature computation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignInput<'input> {
    pub id_param: IdParam,
    pub app_id: &'input str,
    pub version: &'input str,
    pub method: &'input str,
    pub timestamp: &'input str,
    pub request_ip: &'input str,
    pub token: &'input str,
    pub body: &'input str,
}

impl<'input> SignInput<'input> {
    #[must_use]
    pub fn new(app_id: &'input str, timestamp: &'input str, body: &'input str) -> Self {
        Self {
            app_id,
            version: VERSION,
            timestamp,
            body,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn canonical(&self) -> CanonicalParams {
        CanonicalParams::new(self.id_param, self.app_id, self.version, self.timestamp)
            .with_method(self.method)
            .with_request_ip(self.request_ip)
            .with_token(self.token)
    }
}

/// Computes the hex signature for `input` under `secret`.
#[must_use]
pub fn sign(input: &SignInput<'_>, secret: &SecretString) -> String {
    input.canonical().sign(input.body, secret)
}
