//! End-to-end pipeline tests: two-pass ordering, idempotent re-runs, and
//! the streaming export source.

#![allow(clippy::unwrap_used)]

use porter_core::{
    EnqueueOutcome, MigrationConfig, MigrationState, Migrator, RecordingImporter, SkipReason,
    SourceSpec, deterministic_filename,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tree_config(root: &Path, assets_dir: &Path, source_site: &str) -> MigrationConfig {
    MigrationConfig {
        source: SourceSpec::MarkdownTree {
            root: root.to_path_buf(),
        },
        source_site_url: source_site.to_string(),
        target_site_url: "https://new.example".to_string(),
        assets_base_url: "https://new.example/assets".to_string(),
        assets_dir: assets_dir.to_path_buf(),
        concurrency: 2,
        poll_interval_ms: 5,
        continue_on_error: false,
    }
}

/// Two markdown files, one referencing `![alt](http://@site/img1.png)`:
/// exactly one download task runs, both posts import, the referencing
/// post's content points at the final asset URL, nothing fails.
#[tokio::test]
async fn markdown_tree_scenario() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("img1.png"), b"pixels").unwrap();
    fs::write(
        source.path().join("intro.md"),
        "# Intro\n\nPlain text, no references.",
    )
    .unwrap();
    fs::write(
        source.path().join("shots.md"),
        "# Shots\n\n![alt](http://@site/img1.png)\n",
    )
    .unwrap();
    let assets = TempDir::new().unwrap();

    let config = tree_config(source.path(), assets.path(), "https://legacy.example");
    let mut migrator = Migrator::new(config).unwrap();
    let mut importer = RecordingImporter::new();
    let summary = migrator.run(&mut importer).await.unwrap();

    assert_eq!(migrator.state(), MigrationState::Done);
    assert_eq!(summary.assets_fetched, 1);
    assert_eq!(summary.entities_imported, 2);
    assert!(summary.asset_failures.is_empty());
    assert!(summary.entity_failures.is_empty());

    let filename = deterministic_filename(&Url::parse("http://@site/img1.png").unwrap());
    let asset_path = assets.path().join(&filename);
    assert_eq!(fs::read(&asset_path).unwrap(), b"pixels");

    let shots = importer
        .accepted()
        .iter()
        .find(|entity| entity.source_identity() == "shots.md")
        .unwrap();
    let content = shots.str_field("post_content").unwrap();
    assert!(
        content.contains(&format!("![alt](https://new.example/assets/{filename})")),
        "rewritten content: {content}"
    );
}

/// Running the pipeline twice over an unchanged source with a shared assets
/// directory fetches nothing the second time.
#[tokio::test]
async fn second_run_is_idempotent() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("img1.png"), b"pixels").unwrap();
    fs::write(
        source.path().join("post.md"),
        "# Post\n\n![a](http://@site/img1.png)",
    )
    .unwrap();
    let assets = TempDir::new().unwrap();

    let config = tree_config(source.path(), assets.path(), "https://legacy.example");
    let first = Migrator::new(config.clone())
        .unwrap()
        .run(&mut RecordingImporter::new())
        .await
        .unwrap();
    assert_eq!(first.assets_fetched, 1);

    let second = Migrator::new(config)
        .unwrap()
        .run(&mut RecordingImporter::new())
        .await
        .unwrap();
    assert_eq!(second.assets_fetched, 0);
    assert_eq!(second.entities_imported, 1);
    assert!(second.asset_failures.is_empty());
}

/// An entity whose reference appears in the stream before its asset could
/// possibly have downloaded still ends up rewritten: the asset lands during
/// the drain between the passes.
#[tokio::test]
async fn reference_before_download_completion_is_still_rewritten() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uploads/hero.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hero-bytes".to_vec())
                .set_delay(std::time::Duration::from_millis(80)),
        )
        .mount(&server)
        .await;

    let origin = server.uri();
    let source = TempDir::new().unwrap();
    fs::write(
        source.path().join("first.md"),
        format!("# First\n\n<img src=\"{origin}/uploads/hero.png\">\n"),
    )
    .unwrap();
    let assets = TempDir::new().unwrap();

    let config = tree_config(source.path(), assets.path(), &origin);
    let mut importer = RecordingImporter::new();
    let summary = Migrator::new(config)
        .unwrap()
        .run(&mut importer)
        .await
        .unwrap();

    assert_eq!(summary.assets_fetched, 1);
    let source_url = Url::parse(&format!("{origin}/uploads/hero.png")).unwrap();
    let filename = deterministic_filename(&source_url);
    assert_eq!(
        fs::read(assets.path().join(&filename)).unwrap(),
        b"hero-bytes"
    );

    let content = importer.accepted()[0].str_field("post_content").unwrap();
    assert!(content.contains(&format!("https://new.example/assets/{filename}")));
    assert!(!content.contains(&origin));
}

/// Streaming export source end to end: attachment posts are fetched over
/// HTTP and every same-origin URL (content, guid, attachment_url) points at
/// the destination afterwards.
#[tokio::test]
async fn wxr_export_migrates_attachments_and_reroots() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uploads/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"logo".to_vec()))
        .mount(&server)
        .await;

    let origin = server.uri();
    let export = format!(
        r#"<rss><channel><title>Old Site</title>
<item>
  <title>Logo</title>
  <wp:post_type>attachment</wp:post_type>
  <wp:attachment_url>{origin}/uploads/logo.png</wp:attachment_url>
</item>
<item>
  <title>Welcome</title>
  <guid>{origin}/?p=1</guid>
  <content:encoded><![CDATA[<p>Hi <img src="{origin}/uploads/logo.png"> and <a href="{origin}/about">about</a></p>]]></content:encoded>
  <wp:post_type>post</wp:post_type>
</item>
</channel></rss>"#
    );
    let source = TempDir::new().unwrap();
    let export_path = source.path().join("export.xml");
    fs::write(&export_path, export).unwrap();
    let assets = TempDir::new().unwrap();

    let config = MigrationConfig {
        source: SourceSpec::WxrExport { path: export_path },
        source_site_url: origin.clone(),
        target_site_url: "https://new.example".to_string(),
        assets_base_url: "https://new.example/assets".to_string(),
        assets_dir: assets.path().to_path_buf(),
        concurrency: 2,
        poll_interval_ms: 5,
        continue_on_error: false,
    };
    let mut importer = RecordingImporter::new();
    let summary = Migrator::new(config)
        .unwrap()
        .run(&mut importer)
        .await
        .unwrap();

    assert_eq!(summary.assets_fetched, 1);
    assert_eq!(summary.entities_imported, 2);

    let source_url = Url::parse(&format!("{origin}/uploads/logo.png")).unwrap();
    let filename = deterministic_filename(&source_url);
    assert!(assets.path().join(&filename).exists());

    let attachment = &importer.accepted()[0];
    assert_eq!(
        attachment.str_field("attachment_url").unwrap(),
        format!("https://new.example/assets/{filename}")
    );

    let post = &importer.accepted()[1];
    let content = post.str_field("post_content").unwrap();
    assert!(content.contains(&format!("https://new.example/assets/{filename}")));
    assert!(content.contains("https://new.example/about"));
    assert_eq!(post.str_field("guid").unwrap(), "https://new.example/?p=1");
}

/// The enqueue no-op contract, observed directly on the downloader across
/// the shared sink.
#[tokio::test]
async fn enqueue_is_a_no_op_for_satisfied_targets() {
    let assets = TempDir::new().unwrap();
    fs::write(assets.path().join("seen.png"), b"already here").unwrap();

    let mut downloader = porter_core::AttachmentDownloader::new(assets.path(), 2).unwrap();
    assert_eq!(
        downloader.enqueue_if_not_exists("https://x.example/seen.png", "seen.png"),
        EnqueueOutcome::Skipped(SkipReason::AlreadyExists)
    );
    assert!(!downloader.poll());
}
