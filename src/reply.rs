//! Response envelope parsing.
//!
//! Every response is wrapped as
//! `{"result": {"code", "message", "state"}, "response": <payload>}`. A call
//! succeeded iff `code == "200"` and `state == "ok"`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::Result;
use crate::error::Error;

pub const SUCCESS_CODE: &str = "200";
pub const SUCCESS_STATE: &str = "ok";

/// The `result` object of a response.
#[non_exhaustive]
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: String,
}

impl Envelope {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE && self.state == SUCCESS_STATE
    }
}

/// Accepts strings, numbers and `null`; `null` reads as an empty string.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Outcome of one call: the raw body, its envelope, the `response` subtree
/// and, on failure, the error.
#[derive(Debug)]
pub struct Reply {
    status: Option<u16>,
    raw_body: Vec<u8>,
    envelope: Option<Envelope>,
    data: Value,
    err: Option<Error>,
}

impl Reply {
    /// Parses a body that did not come with an HTTP status.
    #[must_use]
    pub fn parse(raw_body: &[u8]) -> Self {
        Self::classify(None, raw_body.to_vec())
    }

    /// Parses an HTTP response body.
    ///
    /// An envelope always wins over the status line. Without one, a non-2xx
    /// status becomes a protocol error carrying the raw body.
    #[must_use]
    pub fn from_http(status: u16, raw_body: Vec<u8>) -> Self {
        Self::classify(Some(status), raw_body)
    }

    /// A reply for a call that never produced a body.
    #[must_use]
    pub fn from_error(err: Error) -> Self {
        Self {
            status: None,
            raw_body: Vec::new(),
            envelope: None,
            data: Value::Null,
            err: Some(err),
        }
    }

    fn classify(status: Option<u16>, raw_body: Vec<u8>) -> Self {
        let parsed = serde_json::from_slice::<Value>(&raw_body)
            .ok()
            .and_then(|mut root| {
                let result = root.get_mut("result").map(Value::take)?;
                let envelope = Envelope::deserialize(result).ok()?;
                let data = root.get_mut("response").map(Value::take).unwrap_or_default();
                Some((envelope, data))
            });

        let Some((envelope, data)) = parsed else {
            let text = String::from_utf8_lossy(&raw_body).into_owned();
            let err = match status {
                Some(code) if !(200..300).contains(&code) => {
                    Error::protocol(code.to_string(), "http_error", text)
                }
                _ => Error::decode("", format!("response is not a result envelope: {text}")),
            };
            return Self {
                status,
                raw_body,
                envelope: None,
                data: Value::Null,
                err: Some(err),
            };
        };

        let err = (!envelope.is_success()).then(|| {
            let message = if envelope.message.is_empty() {
                String::from_utf8_lossy(&raw_body).into_owned()
            } else {
                envelope.message.clone()
            };
            Error::protocol(envelope.code.clone(), envelope.state.clone(), message)
        });

        #[cfg(feature = "tracing")]
        if let Some(e) = &err {
            tracing::warn!(
                code = %envelope.code,
                state = %envelope.state,
                error = %e,
                "remote call failed"
            );
        }

        Self {
            status,
            raw_body,
            envelope: Some(envelope),
            data,
            err,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }

    #[must_use]
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Converts into `Err` when the call failed.
    pub fn into_result(mut self) -> Result<Self> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// The `response` subtree, `Null` when absent.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Looks up a dotted path inside `response`.
    ///
    /// Numeric segments index into arrays, so `items.0.name` reads the first
    /// element's `name`. An empty path returns the whole subtree.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.data);
        }
        path.split('.').try_fold(&self.data, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Integer at `path`; numeric strings are accepted as the server often
    /// sends ids as strings.
    #[must_use]
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// Elements of the array at `path`; empty when missing or not an array.
    #[must_use]
    pub fn array(&self, path: &str) -> &[Value] {
        self.get(path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Decodes the whole `response` subtree.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.decode_at("")
    }

    /// Decodes the subtree at `path`.
    pub fn decode_at<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self
            .get(path)
            .ok_or_else(|| Error::decode(path, "no value at path"))?;
        deserialize_value(path, value)
    }
}

#[cfg(not(feature = "tracing"))]
fn deserialize_value<T: DeserializeOwned>(path: &str, value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|e| Error::decode(path, e.to_string()))
}

/// Same as the plain variant, but reports the failing field path and logs
/// fields the target type ignores.
#[cfg(feature = "tracing")]
fn deserialize_value<T: DeserializeOwned>(path: &str, value: &Value) -> Result<T> {
    let mut ignored = Vec::new();
    let de = serde_ignored::Deserializer::new(value, |p| ignored.push(p.to_string()));
    let decoded = serde_path_to_error::deserialize(de).map_err(|e| {
        let inner = e.path().to_string();
        let full = match (path.is_empty(), inner.as_str()) {
            (_, "." | "") => path.to_owned(),
            (true, _) => inner.clone(),
            (false, _) => format!("{path}.{inner}"),
        };
        Error::decode(full, e.into_inner().to_string())
    })?;

    if !ignored.is_empty() {
        tracing::debug!(path, fields = ?ignored, "ignored unknown response fields");
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::error::{Decode, Kind};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
        status: String,
    }

    #[test]
    fn success_envelope() {
        let reply = Reply::parse(
            br#"{"result":{"code":"200","state":"ok","message":"ok"},"response":{"x":1}}"#,
        );

        assert!(reply.is_success());
        assert_eq!(reply.get_i64("x"), Some(1));
        assert_eq!(reply.envelope().map(|e| e.code.as_str()), Some("200"));
    }

    #[test]
    fn failure_envelope_is_a_protocol_error() {
        let reply = Reply::parse(br#"{"result":{"code":"400","state":"bad","message":"m"}}"#);

        let err = reply.into_result().expect_err("code 400 is a failure");
        assert_eq!(err.kind(), Kind::Protocol);
        let protocol = err.protocol_error().expect("protocol payload");
        assert_eq!(protocol.code, "400");
        assert_eq!(protocol.state, "bad");
        assert_eq!(protocol.message, "m");
    }

    #[test]
    fn code_200_with_bad_state_still_fails() {
        let reply = Reply::parse(
            br#"{"result":{"code":"200","state":"sign_error","message":"sign is wrong"}}"#,
        );

        let protocol = reply.err().and_then(Error::protocol_error).expect("failure");
        assert!(protocol.is_sign_error());
    }

    #[test]
    fn empty_message_falls_back_to_raw_body() {
        let raw = r#"{"result":{"code":"500","state":"system","message":""}}"#;
        let reply = Reply::parse(raw.as_bytes());

        let protocol = reply.err().and_then(Error::protocol_error).expect("failure");
        assert_eq!(protocol.message, raw);

        let err = reply.into_result().expect_err("code 500 is a failure");
        assert_eq!(err.to_string(), raw);
    }

    #[test]
    fn null_message_and_state_still_classify() {
        let reply = Reply::parse(
            br#"{"result":{"code":"200","state":"ok","message":null},"response":{"x":1}}"#,
        );
        assert!(reply.is_success(), "{:?}", reply.err());
        assert_eq!(reply.get_i64("x"), Some(1));

        let reply = Reply::parse(br#"{"result":{"code":"200","state":"ok"},"response":{"x":2}}"#);
        assert!(reply.is_success(), "{:?}", reply.err());
        assert_eq!(reply.envelope().map(|e| e.message.as_str()), Some(""));

        let raw = r#"{"result":{"code":"200","state":null,"message":null}}"#;
        let reply = Reply::parse(raw.as_bytes());
        let protocol = reply
            .err()
            .and_then(Error::protocol_error)
            .expect("null state is a failure");
        assert_eq!(protocol.code, "200");
        assert_eq!(protocol.state, "");
        assert_eq!(protocol.message, raw);

        let reply = Reply::parse(br#"{"result":{"code":"400"}}"#);
        assert_eq!(reply.err().map(Error::kind), Some(Kind::Protocol));
    }

    #[test]
    fn numeric_code_is_normalised() {
        let reply =
            Reply::parse(br#"{"result":{"code":200,"state":"ok","message":"ok"},"response":null}"#);

        assert!(reply.is_success());
        assert_eq!(reply.data(), &Value::Null);
    }

    #[test]
    fn non_envelope_bodies() {
        let reply = Reply::from_http(502, b"bad gateway".to_vec());
        let protocol = reply.err().and_then(Error::protocol_error).expect("failure");
        assert_eq!(protocol.code, "502");
        assert_eq!(protocol.state, "http_error");
        assert_eq!(protocol.message, "bad gateway");
        assert_eq!(reply.status(), Some(502));

        let reply = Reply::from_http(200, b"<html>".to_vec());
        assert_eq!(reply.err().map(Error::kind), Some(Kind::Decode));
    }

    #[test]
    fn envelope_wins_over_status() {
        let reply = Reply::from_http(
            403,
            br#"{"result":{"code":"403","state":"rest_sign","message":"sign is wrong"}}"#.to_vec(),
        );

        let protocol = reply.err().and_then(Error::protocol_error).expect("failure");
        assert_eq!(protocol.state, "rest_sign");
        assert_eq!(protocol.message, "sign is wrong");
    }

    #[test]
    fn dotted_paths_reach_into_arrays() {
        let reply = Reply::parse(
            br#"{"result":{"code":"200","state":"ok","message":"ok"},
                 "response":{"result":[{"name":"menu","status":"1"},{"name":"page","status":"0"}],
                             "id":"42","enable":"1"}}"#,
        );

        assert_eq!(reply.get_str("result.1.name"), Some("page"));
        assert_eq!(reply.get_i64("id"), Some(42));
        assert_eq!(reply.get_bool("enable"), Some(true));
        assert_eq!(reply.array("result").len(), 2);
        assert!(reply.array("missing").is_empty());
        assert!(reply.get("result.x").is_none());
        assert!(reply.get("id.0").is_none());

        let items: Vec<Item> = reply.decode_at("result").expect("array of items");
        assert_eq!(
            items[0],
            Item {
                name: "menu".to_owned(),
                status: "1".to_owned()
            }
        );
        let first: Item = reply.decode_at("result.0").expect("single item");
        assert_eq!(first.name, "menu");
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        let reply = Reply::parse(
            br#"{"result":{"code":"200","state":"ok","message":"ok"},"response":{"result":[{"name":1}]}}"#,
        );

        let err = reply.decode_at::<Vec<Item>>("result").expect_err("name is not a string");
        assert_eq!(err.kind(), Kind::Decode);

        let err = reply.decode_at::<Item>("nothing.here").expect_err("missing path");
        assert_eq!(
            err.downcast_ref::<Decode>().map(|d| d.path.as_str()),
            Some("nothing.here")
        );
        assert!(reply.is_success(), "accessor failures do not touch the reply");
    }
}
