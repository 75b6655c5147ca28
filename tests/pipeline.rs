//! Pipeline driver tests over pre-extracted pages.
//!
//! No pdfium or vision provider is needed: pages are built in memory, the
//! describer is a fake, and blob storage is either in-memory or a wiremock
//! server speaking the storage HTTP API.

mod common;

use common::*;
use lecture_ingest::serialize::token_urls;
use lecture_ingest::{
    BlobStore, DocumentContent, EnrichmentError, IngestError, OutputMode, Pipeline, PipelineConfig,
    ServiceConfig, SupabaseBlobStore, FAILED_UPLOAD_URL,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(mode: OutputMode) -> PipelineConfig {
    PipelineConfig::builder()
        .mode(mode)
        .image_delay_ms(0)
        .build()
        .unwrap()
}

fn flattened(content: &DocumentContent) -> &str {
    match content {
        DocumentContent::Flattened(s) => s,
        DocumentContent::Structured(_) => panic!("expected flattened content"),
    }
}

#[tokio::test]
async fn progress_runs_from_first_page_to_one() {
    setup_tracing();
    let progress = Arc::new(RecordingProgress::default());
    let config = PipelineConfig::builder()
        .image_delay_ms(0)
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let pipeline = Pipeline::new(
        config,
        Arc::new(MemoryBlobs::default()),
        Arc::new(FakeDescriber::ok("d")),
    );

    let doc = document(vec![vec![text(0.0, "a")]; 4]);
    pipeline.ingest_extracted(doc, "deck.pdf", "s").await.unwrap();

    assert_eq!(*progress.started.lock().unwrap(), Some(4));
    assert_eq!(*progress.fractions.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(*progress.finished.lock().unwrap(), Some((4, 0)));
}

#[tokio::test]
async fn three_page_lecture_flattened() {
    setup_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/storage/v1/object/lecture-images/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Key":"ok"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let blobs = Arc::new(SupabaseBlobStore::new(ServiceConfig::new(server.uri(), "service-key")));
    let describer = Arc::new(FakeDescriber::ok("A \"four-membered\" lactam ring."));
    let pipeline = Pipeline::new(config(OutputMode::Flattened), blobs, describer.clone());

    let output = pipeline
        .ingest_extracted(three_page_lecture(), "Antibiotics 101.pdf", "Pharmacology")
        .await
        .unwrap();

    let expected_url = format!(
        "{}/storage/v1/object/public/lecture-images/doc_Antibiotics_101_p1_img1.png",
        server.uri()
    );
    let content = flattened(&output.document.content);
    assert_eq!(
        content,
        format!(
            "Intro\n\n\
             Figure 1: beta-lactam ring\n\n\
             <<SLIDE_IMAGE: url=\"{expected_url}\" caption=\"Image 1 (Page 2)\" \
             context=\"A 'four-membered' lactam ring.\">>\n\n"
        )
    );
    assert_eq!(output.document.page_count, 3);
    assert_eq!(output.document.subject, "Pharmacology");
    assert_eq!(describer.calls(), 1);
    assert!(!output.is_degraded());
    assert_eq!(output.stats.images_enriched, 1);
}

#[tokio::test]
async fn images_below_threshold_are_never_sent() {
    setup_tracing();
    let blobs = Arc::new(MemoryBlobs::default());
    let describer = Arc::new(FakeDescriber::ok("d"));
    let pipeline = Pipeline::new(config(OutputMode::Flattened), blobs.clone(), describer.clone());

    let doc = document(vec![vec![image(0.0, 2047), text(10.0, "Bullet"), image(20.0, 100)]]);
    let output = pipeline.ingest_extracted(doc, "a.pdf", "s").await.unwrap();

    assert_eq!(flattened(&output.document.content), "Bullet\n\n");
    assert!(blobs.stored.lock().unwrap().is_empty());
    assert_eq!(describer.calls(), 0);
    assert_eq!(output.stats.images_skipped, 2);
}

#[tokio::test]
async fn blocks_follow_top_edge_with_stable_ties() {
    setup_tracing();
    let pipeline = Pipeline::new(
        config(OutputMode::Flattened),
        Arc::new(MemoryBlobs::default()),
        Arc::new(FakeDescriber::ok("d")),
    );
    let doc = document(vec![vec![
        text(300.0, "fourth"),
        text(100.0, "second"),
        text(20.0, "first"),
        text(100.0, "third"),
    ]]);
    let output = pipeline.ingest_extracted(doc, "a.pdf", "s").await.unwrap();
    assert_eq!(
        flattened(&output.document.content),
        "first\n\nsecond\n\nthird\n\nfourth\n\n"
    );
}

#[tokio::test]
async fn unreachable_storage_degrades_every_token() {
    setup_tracing();
    let mut services = ServiceConfig::new("http://127.0.0.1:9", "k");
    services.http_timeout_secs = 2;
    let blobs = Arc::new(SupabaseBlobStore::new(services));
    let pipeline = Pipeline::new(
        config(OutputMode::Flattened),
        blobs,
        Arc::new(FakeDescriber::ok("Dose-response curve")),
    );

    let doc = document(vec![
        vec![image(0.0, 4096), image(300.0, 4096)],
        vec![image(0.0, 8192)],
    ]);
    let output = pipeline.ingest_extracted(doc, "a.pdf", "s").await.unwrap();

    let content = flattened(&output.document.content);
    let urls = token_urls(content);
    assert_eq!(urls, vec![FAILED_UPLOAD_URL; 3]);
    assert_eq!(content.matches("context=\"Dose-response curve\"").count(), 3);
    assert_eq!(output.stats.storage_failures, 3);
    assert!(output
        .warnings
        .iter()
        .all(|w| matches!(w, EnrichmentError::StorageFailure { .. })));
}

#[tokio::test]
async fn failed_descriptions_carry_an_error_marker() {
    setup_tracing();
    let pipeline = Pipeline::new(
        config(OutputMode::Flattened),
        Arc::new(MemoryBlobs::default()),
        Arc::new(FakeDescriber::failing("401 Unauthorized")),
    );
    let doc = document(vec![vec![image(0.0, 4096)]]);
    let output = pipeline.ingest_extracted(doc, "a.pdf", "s").await.unwrap();

    let content = flattened(&output.document.content);
    assert!(content.contains("context=\"[Image description unavailable: 401 Unauthorized]\""));
    assert!(output.is_degraded());
}

#[tokio::test]
async fn reingest_reuses_keys_and_accepts_duplicates() {
    setup_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/lecture-images/doc_week_2_p0_img1.png"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/lecture-images/doc_week_2_p0_img1.png"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_string(r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#),
        )
        .mount(&server)
        .await;

    let blobs = Arc::new(SupabaseBlobStore::new(ServiceConfig::new(server.uri(), "k")));
    let pipeline = Pipeline::new(config(OutputMode::Flattened), blobs, Arc::new(FakeDescriber::ok("d")));

    let first = pipeline
        .ingest_extracted(document(vec![vec![image(0.0, 4096)]]), "week 2.pdf", "s")
        .await
        .unwrap();
    let second = pipeline
        .ingest_extracted(document(vec![vec![image(0.0, 4096)]]), "week 2.pdf", "s")
        .await
        .unwrap();

    assert!(second.warnings.is_empty(), "duplicate must count as success");
    assert_eq!(
        token_urls(flattened(&first.document.content)),
        token_urls(flattened(&second.document.content))
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn url_syntax_in_filename_keeps_uploads_apart() {
    setup_tracing();
    let server = MockServer::start().await;
    for key in ["doc_Lecture__3_p0_img1.png", "doc_Lecture__3_p0_img2.png"] {
        Mock::given(method("POST"))
            .and(path(format!("/storage/v1/object/lecture-images/{key}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let services = ServiceConfig::new(server.uri(), "k");
    let blobs = Arc::new(SupabaseBlobStore::new(services.clone()));
    let pipeline = Pipeline::new(config(OutputMode::Flattened), blobs, Arc::new(FakeDescriber::ok("d")));

    let doc = document(vec![vec![image(0.0, 4096), image(300.0, 4096)]]);
    let output = pipeline
        .ingest_extracted(doc, "Lecture #3.pdf", "s")
        .await
        .unwrap();
    assert!(output.warnings.is_empty());

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths.len(), 2);
    assert_ne!(paths[0], paths[1]);

    let urls = token_urls(flattened(&output.document.content));
    assert_eq!(
        urls,
        vec![
            format!("{}/storage/v1/object/public/lecture-images/doc_Lecture__3_p0_img1.png", server.uri()),
            format!("{}/storage/v1/object/public/lecture-images/doc_Lecture__3_p0_img2.png", server.uri()),
        ]
    );
    let reader = SupabaseBlobStore::new(services);
    let keys: Vec<Option<String>> = urls.iter().map(|u| reader.key_for_url(u)).collect();
    assert_eq!(
        keys,
        vec![
            Some("doc_Lecture__3_p0_img1.png".to_string()),
            Some("doc_Lecture__3_p0_img2.png".to_string())
        ]
    );
}

#[tokio::test]
async fn parsed_urls_match_uploads_in_order() {
    setup_tracing();
    let blobs = Arc::new(MemoryBlobs::default());
    let pipeline = Pipeline::new(config(OutputMode::Flattened), blobs.clone(), Arc::new(FakeDescriber::ok("d")));

    let doc = document(vec![
        vec![image(200.0, 3000), text(10.0, "t"), image(50.0, 3000)],
        vec![image(0.0, 3000)],
    ]);
    let output = pipeline.ingest_extracted(doc, "deck.pdf", "s").await.unwrap();

    let issued: Vec<String> = blobs
        .stored
        .lock()
        .unwrap()
        .iter()
        .map(|k| format!("{MEMORY_PREFIX}{k}"))
        .collect();
    assert_eq!(token_urls(flattened(&output.document.content)), issued);
    assert_eq!(
        *blobs.stored.lock().unwrap(),
        vec!["doc_deck_p0_img1.png", "doc_deck_p0_img2.png", "doc_deck_p1_img3.png"]
    );
}

#[tokio::test]
async fn structured_mode_builds_page_records() {
    setup_tracing();
    let blobs = Arc::new(MemoryBlobs {
        fail_store: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(config(OutputMode::Structured), blobs, Arc::new(FakeDescriber::ok("Ring")));

    let doc = document(vec![
        vec![text(10.0, "Intro")],
        vec![text(10.0, "Structure"), image(100.0, 6000)],
        vec![],
    ]);
    let output = pipeline.ingest_extracted(doc, "a.pdf", "s").await.unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&output.document.serialized_content()).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            { "page_number": 1, "text": "Intro", "image": null },
            { "page_number": 2, "text": "Structure", "image": { "url": null, "description": "Ring" } },
            { "page_number": 3, "text": "No text on this slide.", "image": null }
        ])
    );
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_after_each_enriched_image() {
    let config = PipelineConfig::builder().build().unwrap();
    let pipeline = Pipeline::new(config, Arc::new(MemoryBlobs::default()), Arc::new(FakeDescriber::ok("d")));

    let doc = document(vec![
        vec![image(0.0, 3000), image(10.0, 10)],
        vec![text(0.0, "no images")],
        vec![image(0.0, 3000), image(50.0, 3000)],
    ]);
    let start = tokio::time::Instant::now();
    pipeline.ingest_extracted(doc, "a.pdf", "s").await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test]
async fn non_pdf_input_fails_without_side_effects() {
    setup_tracing();
    let blobs = Arc::new(MemoryBlobs::default());
    let describer = Arc::new(FakeDescriber::ok("d"));
    let pipeline = Pipeline::new(config(OutputMode::Flattened), blobs.clone(), describer.clone());

    let err = pipeline
        .ingest(b"GIF89a not a pdf".to_vec(), "a.pdf", "s")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::MalformedDocument { .. }));
    assert!(blobs.stored.lock().unwrap().is_empty());
    assert_eq!(describer.calls(), 0);
}
