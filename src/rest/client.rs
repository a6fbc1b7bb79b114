use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use reqwest::Client as ReqwestClient;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::ExposeSecret as _;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Result;
use crate::error::{Error, TransportReason};
use crate::reply::Reply;
use crate::rest::config::{Config, ConfigRegistry};
use crate::rest::policy::{self, RequestIpPolicy};
use crate::rest::types::{CallOptions, HttpVerb, PayloadMode, RequestSpec, RequestSpecs};
use crate::sign::{self, CanonicalParams, EMPTY_BODY, SignInput};

pub const SIGN: &str = "sign";
pub const PAYLOAD: &str = "payload";
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// A fully signed request, ready to send. Built per call and never reused.
#[derive(Clone, Debug)]
pub struct SignedRequest {
    pub code: u32,
    pub verb: HttpVerb,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub timeout: Duration,
    pub params: CanonicalParams,
    pub sign: String,
}

impl SignedRequest {
    fn into_request(self, client: &ReqwestClient) -> Result<reqwest::Request> {
        let mut builder = client
            .request(self.verb.as_method(), self.url)
            .headers(self.headers)
            .timeout(self.timeout);
        if let Some(body) = self.body {
            builder = builder.body(body);
        }
        Ok(builder.build()?)
    }
}

/// Handle to an in-flight call. Resolves exactly once with the call's [`Reply`].
///
/// Dropping the handle detaches the call; use [`PendingCall::abort`] or the
/// call's cancellation token to stop it.
#[derive(Debug)]
pub struct PendingCall {
    task: JoinHandle<Reply>,
}

impl PendingCall {
    pub fn abort(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for PendingCall {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                let reason = if e.is_cancelled() {
                    TransportReason::Cancelled
                } else {
                    TransportReason::Aborted
                };
                Reply::from_error(Error::transport(reason, e.to_string()))
            })
        })
    }
}

/// Signed REST client for one logical configuration.
///
/// Cheap to clone; clones share the registry, the method table and the HTTP
/// connection pool.
#[derive(Clone, Debug)]
pub struct RestClient {
    registry: Arc<ConfigRegistry>,
    config_name: String,
    specs: Arc<RequestSpecs>,
    version: String,
    request_ip: RequestIpPolicy,
    local_ip: Arc<OnceLock<String>>,
    client: ReqwestClient,
}

#[bon::bon]
impl RestClient {
    /// Creates a client bound to the configuration registered as `config_name`.
    ///
    /// Fails immediately if that name is not registered.
    #[builder]
    pub fn new(
        registry: Arc<ConfigRegistry>,
        #[builder(into)] config_name: String,
        specs: RequestSpecs,
        http: Option<ReqwestClient>,
        #[builder(default)] request_ip: RequestIpPolicy,
        #[builder(into, default = sign::VERSION.to_owned())] version: String,
    ) -> Result<Self> {
        registry.lookup(&config_name)?;

        Ok(Self {
            registry,
            config_name,
            specs: Arc::new(specs),
            version,
            request_ip,
            local_ip: Arc::new(OnceLock::new()),
            client: http.unwrap_or_default(),
        })
    }
}

impl RestClient {
    #[must_use]
    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn specs(&self) -> &RequestSpecs {
        &self.specs
    }

    /// Builds the signed request for `code` without sending it.
    pub fn prepare<P: Serialize + ?Sized>(
        &self,
        code: u32,
        payload: &P,
        options: &CallOptions,
    ) -> Result<SignedRequest> {
        let spec = self.specs.get(code)?;
        let config = self.registry.lookup(&self.config_name)?;
        self.sign_request(spec, &config, payload, options)
    }

    fn sign_request<P: Serialize + ?Sized>(
        &self,
        spec: &RequestSpec,
        config: &Config,
        payload: &P,
        options: &CallOptions,
    ) -> Result<SignedRequest> {
        let json = match serde_json::to_string(payload)? {
            json if json.is_empty() || json == "null" => EMPTY_BODY.to_owned(),
            json => json,
        };
        let (signed_body, body, payload_param) = match spec.payload {
            PayloadMode::Post => (json.clone(), Some(json), None),
            PayloadMode::Get => (String::new(), None, Some(json)),
        };

        let token = options
            .token
            .as_ref()
            .map(|t| t.expose_secret().to_owned())
            .unwrap_or_default();
        let request_ip = match &options.identity {
            Some(identity) => identity.signed_ip().to_owned(),
            None => self.request_ip.resolve(|| self.local_ip()),
        };
        let timestamp = policy::resolve_timestamp(options.timestamp);

        let input = SignInput {
            id_param: spec.id_param,
            app_id: config.app_key(),
            version: &self.version,
            method: &spec.method,
            timestamp: &timestamp,
            request_ip: &request_ip,
            token: &token,
            body: &signed_body,
        };
        let params = input.canonical();
        let sign = params.sign(input.body, config.app_secret());

        let mut url = config.endpoint(&spec.path);
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params.pairs() {
                query.append_pair(key, value);
            }
            query.append_pair(SIGN, &sign);
            if let Some(payload) = &payload_param {
                query.append_pair(PAYLOAD, payload);
            }
        }

        let mut headers = HeaderMap::new();
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(identity) = &options.identity {
            headers.insert(X_REQUEST_ID, HeaderValue::from_str(&identity.id)?);
        }

        Ok(SignedRequest {
            code: spec.code,
            verb: spec.verb,
            url,
            headers,
            body,
            timeout: spec.timeout,
            params,
            sign,
        })
    }

    fn local_ip(&self) -> String {
        self.local_ip
            .get_or_init(|| {
                policy::detect_local_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_default()
            })
            .clone()
    }

    /// Starts the call for `code` on the current tokio runtime.
    ///
    /// Only construction failures (unknown code, missing config, payload that
    /// does not serialize, no runtime) are returned here. Everything that
    /// happens on the wire is reported through the handle's [`Reply`].
    pub fn call<P: Serialize + ?Sized>(
        &self,
        code: u32,
        payload: &P,
        options: CallOptions,
    ) -> Result<PendingCall> {
        let signed = self.prepare(code, payload, &options)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::validation(format!("no async runtime to dispatch on: {e}")))?;
        let cancel = options.cancel.unwrap_or_default();

        let task = runtime.spawn(dispatch(self.client.clone(), signed, cancel));
        Ok(PendingCall { task })
    }

    /// Calls `code` and waits for the reply, turning failures into `Err`.
    pub async fn invoke<P: Serialize + ?Sized>(
        &self,
        code: u32,
        payload: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(code, payload, options)?.await.into_result()
    }
}

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            code = signed.code,
            verb = %signed.verb,
            path = signed.url.path(),
            status_code = tracing::field::Empty
        )
    )
)]
async fn dispatch(
    client: ReqwestClient,
    signed: SignedRequest,
    cancel: CancellationToken,
) -> Reply {
    let request = match signed.into_request(&client) {
        Ok(request) => request,
        Err(e) => return Reply::from_error(e),
    };

    let reply = tokio::select! {
        biased;
        () = cancel.cancelled() => Reply::from_error(Error::cancelled()),
        reply = exchange(&client, request) => reply,
    };

    #[cfg(feature = "tracing")]
    match reply.err() {
        Some(e) => tracing::warn!(error = %e, "call failed"),
        None => tracing::debug!("call succeeded"),
    }

    reply
}

async fn exchange(client: &ReqwestClient, request: reqwest::Request) -> Reply {
    let response = match client.execute(request).await {
        Ok(response) => response,
        Err(e) => return Reply::from_error(e.into()),
    };
    let status = response.status().as_u16();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status);

    match response.bytes().await {
        Ok(body) => Reply::from_http(status, body.to_vec()),
        Err(e) => Reply::from_error(e.into()),
    }
}
