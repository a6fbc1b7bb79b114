use std::sync::Arc;

use httpmock::prelude::*;
use lsys_rest_client::cache::TtlCache;
use lsys_rest_client::rest::{
    CallOptions, Config, ConfigRegistry, RawConfig, RequestIpPolicy, RequestSpec, RequestSpecs,
    RestClient,
};
use lsys_rest_client::sign::IdParam;
use lsys_rest_client::{Kind, Result};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;

const SUB_APP_INFO: u32 = 100;

#[derive(Clone, Debug, Deserialize, PartialEq)]
struct SubAppInfo {
    name: String,
    client_id: String,
}

struct SubApps {
    client: RestClient,
    cache: TtlCache<String, SubAppInfo>,
}

impl SubApps {
    async fn info(&self, client_id: &str) -> Result<SubAppInfo> {
        self.cache
            .get_or_fetch(client_id.to_owned(), |id| {
                let client = self.client.clone();
                let payload = json!({"client_id": id});
                async move {
                    client
                        .invoke(SUB_APP_INFO, &payload, CallOptions::default())
                        .await?
                        .decode_at("info")
                }
            })
            .await
    }
}

fn sub_apps(base_url: &str) -> SubApps {
    let registry = Arc::new(ConfigRegistry::new());
    registry.register(
        Config::from_raw(RawConfig {
            name: "rest".to_owned(),
            app_key: "parent".to_owned(),
            app_secret: SecretString::from("secret"),
            base_url: base_url.to_owned(),
        })
        .expect("valid config"),
    );
    let specs = RequestSpecs::try_from_iter([RequestSpec::builder()
        .code(SUB_APP_INFO)
        .path("/rest/subapp")
        .method("info")
        .id_param(IdParam::ClientId)
        .build()])
    .expect("valid method table");

    SubApps {
        client: RestClient::builder()
            .registry(registry)
            .config_name("rest")
            .specs(specs)
            .request_ip(RequestIpPolicy::Omit)
            .build()
            .expect("config is registered"),
        cache: TtlCache::new(),
    }
}

#[tokio::test]
async fn cached_lookup_hits_the_remote_once() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let apps = sub_apps(&server.base_url());

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/subapp")
                .query_param("client_id", "parent")
                .json_body(json!({"client_id": "child"}));
            then.status(200).json_body(json!({
                "result": {"code": "200", "state": "ok", "message": "ok"},
                "response": {"info": {"name": "Child", "client_id": "child"}},
            }));
        })
        .await;

    let first = apps.info("child").await?;
    let second = apps.info("child").await?;

    mock.assert_async().await;
    assert_eq!(first, second);
    assert_eq!(first.name, "Child");
    Ok(())
}

#[tokio::test]
async fn failed_lookup_is_not_cached() {
    let server = MockServer::start_async().await;
    let apps = sub_apps(&server.base_url());

    server
        .mock_async(|when, then| {
            when.path("/rest/subapp");
            then.status(200).json_body(json!({
                "result": {"code": "404", "state": "not_found", "message": "app not found"},
            }));
        })
        .await;

    let err = apps.info("ghost").await.expect_err("remote reports not found");

    assert_eq!(err.kind(), Kind::Protocol);
    assert!(apps.cache.is_empty().await, "errors must not be cached");
}
