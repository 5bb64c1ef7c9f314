use arbor_core::{Handler, Parameter, Registry, Router, codes};
use arbor_deploy::{Deployer, DeployerConfig, InitializerCatalog};
use arbor_testing::{BundleFixture, FnInitializer, RecordingLeaf, RequestBuilder, StaticAuthorizer};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_fixture_bundle_serves_recorded_calls() {
    let fixture = BundleFixture::new().unwrap();
    let leaf = RecordingLeaf::new();

    let catalog = InitializerCatalog::new();
    let action = leaf.clone();
    FnInitializer::new(move |registrar| {
        let mount = registrar
            .context()
            .setting("mount")
            .and_then(|v| v.as_str())
            .unwrap_or("/fallback")
            .to_string();
        registrar.add(
            &format!("{}/search", mount),
            Handler::leaf("search", action.clone())
                .grant("orders_read")
                .parameter(Parameter::new("q"))
                .parameter(Parameter::new("limit").optional())
                .build(),
        )
    })
    .register(&catalog, "orders.bundle");

    let registry = Arc::new(Registry::new());
    let deployer = Deployer::new(
        registry.clone(),
        Arc::new(catalog),
        DeployerConfig::new(fixture.root()),
    );
    let dir = fixture
        .bundle("orders", "orders.bundle")
        .setting("mount", "/orders")
        .write()
        .unwrap();
    assert_eq!(deployer.deploy(&dir).unwrap().finished().await.unwrap(), 1);

    let authorizer = StaticAuthorizer::new().grant("clerk", ["orders_read"]);
    let router = Router::new(registry.clone(), Arc::new(authorizer));

    let mut denied = RequestBuilder::new("/orders/search?q=lamp").build().unwrap();
    let err = router.dispatch(&mut denied).await.unwrap_err();
    assert_eq!(err.code(), codes::ACCESS_DENIED);
    assert!(!leaf.was_called());

    let mut ctx = RequestBuilder::new("/orders/search")
        .query("q", "lamp")
        .caller("clerk")
        .build()
        .unwrap();
    let value = router.dispatch(&mut ctx).await.unwrap().into_value().unwrap();
    assert_eq!(value, json!({ "q": "lamp", "limit": null }));

    let call = leaf.last_call().unwrap();
    assert_eq!(call.path, "/orders/search");
    assert_eq!(call.caller.as_deref(), Some("clerk"));

    fixture.remove("orders").unwrap();
    assert!(deployer.reconcile(&dir).unwrap().is_none());
    assert!(registry.is_empty());
}
