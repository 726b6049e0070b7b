//! Equivalent requests share one cache key; different filters do not.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use quarry_core::{CustomerContext, CustomerId};
use quarry_named_query::{
    CacheKey, MemoryCatalog, NamedQueryRecord, OutputKind, ProjectionConfig, ProjectionRequest,
    ProjectionService, QueryArgs,
};
use quarry_test_utils::{TEST_CUSTOMER, TestContext, named_query, test_customer};

fn catalog_with(template: &str) -> MemoryCatalog {
    MemoryCatalog::new()
        .with_customer(CustomerContext::new(test_customer(), "acme"))
        .with_query(named_query("book", template))
}

async fn key(catalog: MemoryCatalog, args: QueryArgs) -> CacheKey {
    let service = TestContext::with_catalog(catalog).service();
    let request = ProjectionRequest::new("acme", "book", OutputKind::Document).with_args(args);
    CacheKey::derive(&service.parse(&request).await.unwrap()).unwrap()
}

#[tokio::test]
async fn positional_forms_and_keyed_form_agree() {
    let by_p = key(catalog_with("space=p1&s1=p2"), QueryArgs::from_path("4/ledger")).await;
    let by_brace = key(catalog_with("space={1}&s1={2}"), QueryArgs::from_path("4/ledger")).await;
    let by_name = key(
        catalog_with("space={space}&s1={title}"),
        QueryArgs::new()
            .with_keyed("title", "ledger")
            .with_keyed("space", "4"),
    )
    .await;
    let literal = key(catalog_with("s1=ledger&space=4"), QueryArgs::new()).await;

    assert_eq!(by_p, by_brace);
    assert_eq!(by_p, by_name);
    assert_eq!(by_p, literal);
}

#[tokio::test]
async fn equivalent_numbers_share_a_key() {
    let plain = key(catalog_with("n1=p1"), QueryArgs::from_path("7")).await;
    let padded = key(catalog_with("n1=p1"), QueryArgs::from_path("007")).await;
    assert_eq!(plain, padded);
}

#[tokio::test]
async fn first_page_shares_the_unpaged_key() {
    let implicit = key(catalog_with("space=4&n=20"), QueryArgs::new()).await;
    let explicit = key(catalog_with("space=4&n=20&page=1"), QueryArgs::new()).await;
    let second = key(catalog_with("space=4&n=20&page=2"), QueryArgs::new()).await;
    assert_eq!(implicit, explicit);
    assert_ne!(implicit, second);

    let unsized_page = key(catalog_with("space=4&page=3"), QueryArgs::new()).await;
    let unpaged = key(catalog_with("space=4"), QueryArgs::new()).await;
    assert_eq!(unsized_page, unpaged);
}

#[tokio::test]
async fn default_ordering_shares_the_unordered_key() {
    let unordered = key(catalog_with("space=4"), QueryArgs::new()).await;
    let explicit_dir = key(catalog_with("space=4&orderdir=asc"), QueryArgs::new()).await;
    let explicit_field = key(catalog_with("space=4&orderby=ordinal"), QueryArgs::new()).await;
    let descending = key(catalog_with("space=4&orderdir=desc"), QueryArgs::new()).await;

    assert_eq!(unordered, explicit_dir);
    assert_eq!(unordered, explicit_field);
    assert_ne!(unordered, descending);
}

#[tokio::test]
async fn kind_and_filters_separate_keys() {
    let service = TestContext::with_catalog(catalog_with("space=p1")).service();
    let doc = ProjectionRequest::new("acme", "book", OutputKind::Document)
        .with_args(QueryArgs::from_path("4"));
    let archive = ProjectionRequest::new("acme", "book", OutputKind::Archive)
        .with_args(QueryArgs::from_path("4"));
    let other_space = ProjectionRequest::new("acme", "book", OutputKind::Document)
        .with_args(QueryArgs::from_path("5"));

    let doc = CacheKey::derive(&service.parse(&doc).await.unwrap()).unwrap();
    let archive = CacheKey::derive(&service.parse(&archive).await.unwrap()).unwrap();
    let other_space = CacheKey::derive(&service.parse(&other_space).await.unwrap()).unwrap();

    assert_eq!(doc.hash.len(), 64);
    assert_ne!(doc.hash, archive.hash);
    assert_ne!(doc, other_space);
    assert!(doc.control_path().starts_with(&format!(
        "customer={TEST_CUSTOMER}/named-query=book/document/"
    )));
    assert!(
        archive
            .artifact_path(&quarry_core::BuildId::generate())
            .ends_with(".tar")
    );
}

#[tokio::test]
async fn customer_token_forms_share_a_key() {
    let catalog = catalog_with("space=p1");
    let service = ProjectionService::from_catalog(
        std::sync::Arc::new(catalog),
        std::sync::Arc::new(quarry_core::MemoryBackend::new()),
        ProjectionConfig::default(),
    );
    let by_name = ProjectionRequest::new("acme", "book", OutputKind::Manifest)
        .with_args(QueryArgs::from_path("4"));
    let by_id = ProjectionRequest::new("42", "book", OutputKind::Manifest)
        .with_args(QueryArgs::from_path("4"));
    assert_eq!(
        CacheKey::derive(&service.parse(&by_name).await.unwrap()).unwrap(),
        CacheKey::derive(&service.parse(&by_id).await.unwrap()).unwrap()
    );
}

#[tokio::test]
async fn customers_never_share_keys() {
    let other = CustomerId::new(7);
    let catalog = catalog_with("space=p1")
        .with_customer(CustomerContext::new(other, "globex"))
        .with_query(NamedQueryRecord {
            customer: other,
            ..named_query("book", "space=p1")
        });
    let service = TestContext::with_catalog(catalog).service();
    let mine = ProjectionRequest::new("acme", "book", OutputKind::Document)
        .with_args(QueryArgs::from_path("4"));
    let theirs = ProjectionRequest::new("globex", "book", OutputKind::Document)
        .with_args(QueryArgs::from_path("4"));
    let mine = CacheKey::derive(&service.parse(&mine).await.unwrap()).unwrap();
    let theirs = CacheKey::derive(&service.parse(&theirs).await.unwrap()).unwrap();
    assert_ne!(mine.hash, theirs.hash);
    assert!(theirs.prefix().starts_with("customer=7/"));
}

proptest! {
    #[test]
    fn template_pair_order_never_changes_key(
        space in 1u32..1000,
        number in -500i64..500,
        rotate in 0usize..3,
    ) {
        let mut pairs = vec![
            format!("space={space}"),
            format!("n2={number}"),
            "orderby=n2 desc".to_string(),
        ];
        let baseline = pairs.join("&");
        pairs.rotate_left(rotate);
        let rotated = pairs.join("&");

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (a, b) = runtime.block_on(async {
            (
                key(catalog_with(&baseline), QueryArgs::new()).await,
                key(catalog_with(&rotated), QueryArgs::new()).await,
            )
        });
        prop_assert_eq!(a, b);
    }
}
