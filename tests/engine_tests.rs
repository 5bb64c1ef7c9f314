//! End-to-end engine scenarios: configuration, startup deployment,
//! dispatch through the router, and hot undeploy.

use arbor::prelude::*;
use arbor_testing::{BundleFixture, FnInitializer, RecordingLeaf, RequestBuilder, StaticAuthorizer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn config_for(fixture: &BundleFixture) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.deploy.root = fixture.root().to_path_buf();
    config.deploy.debounce_ms = 50;
    config
}

/// Registry holding one static handler outside every bundle
fn static_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .add(
            "/core",
            Handler::composite("core")
                .index(from_fn(|_call: &mut Call<'_>| Ok(json!("core index"))))
                .build(),
        )
        .unwrap();
    registry
        .add(
            "/core/ping",
            Handler::leaf("ping", from_fn(|_call: &mut Call<'_>| Ok(json!("pong"))))
                .description("Liveness check")
                .build(),
        )
        .unwrap();
    registry
}

fn orders_catalog(search: &RecordingLeaf) -> InitializerCatalog {
    let catalog = InitializerCatalog::new();
    let action = search.clone();
    FnInitializer::new(move |registrar| {
        registrar.add(
            "/orders",
            Handler::composite("orders")
                .description("Order queries")
                .build(),
        )?;
        registrar.add(
            "/orders/search",
            Handler::leaf("search", action.clone())
                .grant("orders_read")
                .parameter(Parameter::new("q"))
                .build(),
        )
    })
    .register(&catalog, "orders.bundle");
    catalog
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = EngineConfig::default();
    config.router.max_forwards = 0;
    assert!(Engine::builder().config(config).build().is_err());

    let mut config = EngineConfig::default();
    config.router.help_keyword = "a/b".to_string();
    assert!(Engine::builder().config(config).build().is_err());
}

#[tokio::test]
async fn test_disabled_deployment_skips_scan_and_watch() {
    let fixture = BundleFixture::new().unwrap();
    fixture.bundle("orders", "orders.bundle").write().unwrap();
    let mut config = config_for(&fixture);
    config.deploy.enabled = false;

    let search = RecordingLeaf::new();
    let engine = Engine::builder()
        .config(config)
        .catalog(orders_catalog(&search))
        .build()
        .unwrap();

    assert_eq!(engine.start().await.unwrap(), 0);
    assert!(!engine.is_watching());
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_start_deploys_existing_bundles() {
    let fixture = BundleFixture::new().unwrap();
    fixture.bundle("orders", "orders.bundle").write().unwrap();
    fixture.bundle("broken", "no.such.initializer").write().unwrap();

    let search = RecordingLeaf::new().returning(json!(["o-1"]));
    let engine = Engine::builder()
        .config(config_for(&fixture))
        .registry(static_registry())
        .authorizer(StaticAuthorizer::new().grant("clerk", ["orders_read"]))
        .catalog(orders_catalog(&search))
        .build()
        .unwrap();

    // the broken bundle is logged and skipped
    assert_eq!(engine.start().await.unwrap(), 1);
    assert!(engine.is_watching());
    assert!(engine.deployer().is_deployed(fixture.path("orders")));

    let mut ctx = RequestBuilder::new("/orders/search?q=lamp")
        .caller("clerk")
        .build()
        .unwrap();
    let value = engine.dispatch(&mut ctx).await.unwrap().into_value().unwrap();
    assert_eq!(value, json!(["o-1"]));
    assert_eq!(leaf_query(&search), Some(json!("lamp")));

    let mut anonymous = RequestContext::new("/orders/search?q=lamp");
    let err = engine.dispatch(&mut anonymous).await.unwrap_err();
    assert_eq!(err.code(), codes::ACCESS_DENIED);

    engine.shutdown().await;
    assert!(!engine.is_watching());
}

fn leaf_query(leaf: &RecordingLeaf) -> Option<Value> {
    leaf.last_call().and_then(|call| call.params.get("q").cloned())
}

#[tokio::test]
async fn test_help_and_fallback_through_engine() {
    let fixture = BundleFixture::new().unwrap();
    let engine = Engine::builder()
        .config(config_for(&fixture))
        .registry(static_registry())
        .build()
        .unwrap();

    let mut help = RequestContext::new("/core/ping/help");
    let outcome = engine.dispatch(&mut help).await.unwrap();
    let node = outcome.help_node().unwrap();
    assert_eq!(node.name(), "ping");
    assert_eq!(node.description(), "Liveness check");

    let mut fallback = RequestContext::new("/core/unknown/segments");
    let outcome = engine.dispatch(&mut fallback).await.unwrap();
    assert_eq!(outcome.value(), Some(&json!("core index")));
}

#[tokio::test]
async fn test_custom_help_keyword() {
    let fixture = BundleFixture::new().unwrap();
    let mut config = config_for(&fixture);
    config.router.help_keyword = "describe".to_string();
    let engine = Engine::builder()
        .config(config)
        .registry(static_registry())
        .build()
        .unwrap();

    let mut ctx = RequestContext::new("/core/ping/describe");
    assert!(engine.dispatch(&mut ctx).await.unwrap().is_help());

    // the default keyword is now an ordinary segment under a leaf
    let mut ctx = RequestContext::new("/core/ping/help");
    let outcome = engine.dispatch(&mut ctx).await.unwrap();
    assert_eq!(outcome.value(), Some(&json!("pong")));
}

#[tokio::test]
async fn test_forward_limit_comes_from_config() {
    let fixture = BundleFixture::new().unwrap();
    let mut config = config_for(&fixture);
    config.router.max_forwards = 3;

    let registry = static_registry();
    registry
        .add("/core/loop", Handler::leaf("loop", Loop).build())
        .unwrap();
    let engine = Engine::builder()
        .config(config)
        .registry(registry)
        .build()
        .unwrap();

    let mut ctx = RequestContext::new("/core/loop");
    let err = engine.dispatch(&mut ctx).await.unwrap_err();
    assert_eq!(err.code(), codes::FORWARD_LIMIT);
    assert_eq!(err.data().and_then(|data| data.get("path")), Some(&json!("/core/loop")));
}

struct Loop;

#[async_trait::async_trait]
impl Execute for Loop {
    async fn execute(&self, call: &mut Call<'_>) -> Result<Value> {
        call.forward("/core/loop", false).await?.into_value()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hot_deploy_and_undeploy_restore_registry() {
    let fixture = BundleFixture::new().unwrap();
    let search = RecordingLeaf::new();
    let engine = Engine::builder()
        .config(config_for(&fixture))
        .registry(static_registry())
        .authorizer(AllowAll)
        .catalog(orders_catalog(&search))
        .build()
        .unwrap();
    let before = engine.registry().snapshot();

    assert_eq!(engine.start().await.unwrap(), 0);
    assert!(engine.is_watching());

    fixture.bundle("orders", "orders.bundle").write().unwrap();
    let registry = engine.registry().clone();
    assert!(wait_for(|| registry.has("/orders/search")).await);

    let mut ctx = RequestBuilder::new("/orders/search").query("q", "lamp").build().unwrap();
    engine.dispatch(&mut ctx).await.unwrap();
    assert_eq!(search.call_count(), 1);

    fixture.remove("orders").unwrap();
    assert!(wait_for(|| !registry.has("/orders")).await);
    assert_eq!(engine.registry().snapshot(), before);
    assert!(engine.deployer().bundles().is_empty());

    engine.shutdown().await;
}
