//! Command execution against a catalog file and a directory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use clap::Parser;
use quarry_cli::{Cli, Commands, commands};
use quarry_core::{CancelSignal, CustomerContext, CustomerId};
use quarry_named_query::{Asset, MemoryCatalog, NamedQueryRecord};

fn write_catalog(dir: &Path) -> std::path::PathBuf {
    let customer = CustomerId::new(42);
    let mut first = Asset::new(customer, 4, "page-1");
    first.ordinal = 1;
    let mut second = Asset::new(customer, 4, "page-2");
    second.ordinal = 2;

    let catalog = MemoryCatalog::new()
        .with_customer(CustomerContext::new(customer, "acme"))
        .with_query(NamedQueryRecord {
            name: "book".to_string(),
            customer,
            template: "space=p1".to_string(),
            global: false,
        })
        .with_asset(second)
        .with_asset(first);

    let path = dir.join("catalog.json");
    std::fs::write(&path, serde_json::to_vec(&catalog.snapshot()).unwrap()).unwrap();
    path
}

fn cli(dir: &Path, catalog: &Path, rest: &[&str]) -> Cli {
    let store = dir.join("store");
    let mut argv = vec![
        "quarry".to_string(),
        "--catalog".to_string(),
        catalog.display().to_string(),
        "--store".to_string(),
        store.display().to_string(),
    ];
    argv.extend(rest.iter().map(ToString::to_string));
    Cli::parse_from(argv)
}

#[tokio::test]
async fn build_writes_document_and_control_reports_ready() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = write_catalog(dir.path());
    let output = dir.path().join("book.pdf");

    let build = cli(
        dir.path(),
        &catalog,
        &["build", "acme", "book", "4", "--output", output.to_str().unwrap()],
    );
    let config = build.config().unwrap();
    let Commands::Build(args) = build.command else {
        panic!("expected build");
    };
    commands::build::execute(&args, &config, &CancelSignal::never())
        .await
        .unwrap();

    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"%PDF-"));

    let control = cli(dir.path(), &catalog, &["control", "acme", "book", "4"]);
    let Commands::Control(args) = control.command else {
        panic!("expected control");
    };
    let service = config.service().unwrap();
    let record = service
        .control_file(&args.target.request(args.kind))
        .await
        .unwrap();
    assert!(record.exists);
    assert_eq!(record.item_count, 2);
    commands::control::show(&args, &config).await.unwrap();
}

#[tokio::test]
async fn invalidate_clears_the_control_record() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = write_catalog(dir.path());

    let build = cli(dir.path(), &catalog, &["build", "acme", "book", "4", "--kind", "archive"]);
    let config = build.config().unwrap();
    let Commands::Build(args) = build.command else {
        panic!("expected build");
    };
    commands::build::execute(&args, &config, &CancelSignal::never())
        .await
        .unwrap();

    let invalidate = cli(
        dir.path(),
        &catalog,
        &["invalidate", "acme", "book", "4", "--kind", "archive"],
    );
    let Commands::Invalidate(args) = invalidate.command else {
        panic!("expected invalidate");
    };
    commands::control::invalidate(&args, &config).await.unwrap();

    let record = config
        .service()
        .unwrap()
        .control_file(&args.target.request(args.kind))
        .await
        .unwrap();
    assert!(record.is_empty());
}

#[tokio::test]
async fn resolve_rejects_unknown_query() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = write_catalog(dir.path());

    let resolve = cli(dir.path(), &catalog, &["resolve", "acme", "missing"]);
    let config = resolve.config().unwrap();
    let Commands::Resolve(args) = resolve.command else {
        panic!("expected resolve");
    };
    let err = commands::resolve::execute(&args, &config, &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}
