//! End-to-end streaming crawl scenarios against a mock HTTP server.

use crawlstream::crawl::stream::StreamCrawl;
use crawlstream::crawl::{CrawlContext, CrawlOptions, CrawlSource};
use crawlstream::host::bridge::open_source;
use crawlstream::{Database, Settings};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn ctx() -> CrawlContext {
    init_tracing();
    CrawlContext::new(Database::in_memory().unwrap())
}

fn options() -> CrawlOptions {
    CrawlOptions::from_settings(&Settings::default())
}

async fn mount_html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.to_string().into_bytes(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn seed_only_emits_one_row() {
    let server = MockServer::start().await;
    mount_html(&server, "/a", "<html><body>hello</body></html>").await;

    let url = format!("{}/a", server.uri());
    let mut op = StreamCrawl::new(ctx(), CrawlSource::Urls(vec![url.clone()]), options());

    let row = op.next_row().await.unwrap().unwrap();
    assert_eq!(row.url, url);
    assert_eq!(row.status, 200);
    assert_eq!(row.depth, 1);
    assert!(row.error.is_empty());
    // The document carries the body verbatim.
    assert_eq!(row.html.document, "<html><body>hello</body></html>");
    assert!(row.content_type.starts_with("text/html"));

    assert!(op.next_row().await.unwrap().is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn cache_hit_serves_without_network() {
    let server = MockServer::start().await;
    mount_html(&server, "/a", "<p>cached</p>").await;
    let url = format!("{}/a", server.uri());

    let db = Database::in_memory().unwrap();
    let ctx = CrawlContext::new(db.clone());

    let mut first = StreamCrawl::new(
        ctx.clone(),
        CrawlSource::Urls(vec![url.clone()]),
        options(),
    );
    let first_row = first.next_row().await.unwrap().unwrap();
    assert_eq!(first_row.status, 200);

    // The mock only ever sees the first fetch; the second run is served
    // from the response cache.
    let mut opts = options();
    opts.cache = true;
    opts.cache_ttl_hours = 24;
    let mut second = StreamCrawl::new(ctx, CrawlSource::Urls(vec![url]), opts);
    let second_row = second.next_row().await.unwrap().unwrap();
    assert_eq!(second_row.status, 200);
    assert_eq!(second_row.response_time_ms, first_row.response_time_ms);
    assert_eq!(second_row.html.document, "<p>cached</p>");

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn depth_two_follow_is_breadth_first() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_html(
        &server,
        "/a",
        &format!("<html><body><a href=\"{base}/b\">next</a></body></html>"),
    )
    .await;
    mount_html(&server, "/b", "<html><body>leaf</body></html>").await;

    let mut opts = options();
    opts.follow = Some("a".to_string());
    opts.max_depth = 2;
    let mut op = StreamCrawl::new(
        ctx(),
        CrawlSource::Urls(vec![format!("{base}/a")]),
        opts,
    );

    let first = op.next_row().await.unwrap().unwrap();
    assert_eq!(first.url, format!("{base}/a"));
    assert_eq!(first.depth, 1);
    let second = op.next_row().await.unwrap().unwrap();
    assert_eq!(second.url, format!("{base}/b"));
    assert_eq!(second.depth, 2);
    assert!(op.next_row().await.unwrap().is_none());
}

#[tokio::test]
async fn same_url_across_depths_is_deduplicated() {
    let server = MockServer::start().await;
    let base = server.uri();
    // /a links to /b and back to /a; /b links to /a.
    mount_html(
        &server,
        "/a",
        &format!("<a href=\"{base}/b\">b</a><a href=\"{base}/a\">self</a>"),
    )
    .await;
    mount_html(&server, "/b", &format!("<a href=\"{base}/a\">back</a>")).await;

    let mut opts = options();
    opts.follow = Some("a".to_string());
    opts.max_depth = 4;
    let mut op = StreamCrawl::new(
        ctx(),
        CrawlSource::Urls(vec![format!("{base}/a")]),
        opts,
    );

    let mut urls = Vec::new();
    while let Some(row) = op.next_row().await.unwrap() {
        urls.push(row.url);
    }
    assert_eq!(urls, vec![format!("{base}/a"), format!("{base}/b")]);
}

#[tokio::test]
async fn state_table_makes_reruns_resumable() {
    init_tracing();
    let server = MockServer::start().await;
    mount_html(&server, "/a", "<p>once</p>").await;
    let url = format!("{}/a", server.uri());

    // On-disk database so the state survives reopening the handle.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    let mut opts = options();
    opts.state_table = Some("progress".to_string());
    opts.cache = false;

    let db = Database::open(&db_path).unwrap();
    let mut first = StreamCrawl::new(
        CrawlContext::new(db.clone()),
        CrawlSource::Urls(vec![url.clone()]),
        opts.clone(),
    );
    assert!(first.next_row().await.unwrap().is_some());
    assert!(first.next_row().await.unwrap().is_none());
    drop(first);
    drop(db);

    // A fresh handle over the same file resumes from the state table and
    // skips the already-crawled URL.
    let reopened = Database::open(&db_path).unwrap();
    let mut second = StreamCrawl::new(
        CrawlContext::new(reopened.clone()),
        CrawlSource::Urls(vec![url]),
        opts,
    );
    assert!(second.next_row().await.unwrap().is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let conn = reopened.connect().unwrap();
    let recorded: i64 = conn
        .query_row("SELECT count(*) FROM \"progress\"", [], |r| r.get(0))
        .unwrap();
    assert_eq!(recorded, 1);
}

#[tokio::test]
async fn transport_failure_yields_error_row() {
    // Nothing is listening on this port.
    let mut opts = options();
    opts.timeout = std::time::Duration::from_millis(500);
    opts.cache = false;
    let mut op = StreamCrawl::new(
        ctx(),
        CrawlSource::Urls(vec!["http://127.0.0.1:1/down".to_string()]),
        opts,
    );
    let row = op.next_row().await.unwrap().unwrap();
    assert_eq!(row.status, 0);
    assert!(!row.error.is_empty());
    assert!(row.error.starts_with("network_"));
}

#[tokio::test]
async fn max_results_caps_emission() {
    let server = MockServer::start().await;
    for route in ["/1", "/2", "/3"] {
        mount_html(&server, route, "<p>x</p>").await;
    }
    let base = server.uri();

    let mut opts = options();
    opts.max_results = Some(2);
    let seeds = vec![
        format!("{base}/1"),
        format!("{base}/2"),
        format!("{base}/3"),
    ];
    let mut op = StreamCrawl::new(ctx(), CrawlSource::Urls(seeds), opts);
    let rows = op.collect_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn declarative_extraction_populates_extract_column() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/p",
        r#"<html><head>
            <meta property="og:title" content="Widget Page">
            <script type="application/ld+json">{"@type":"Product","name":"Widget"}</script>
        </head><body><h1 class="name">Widget</h1></body></html>"#,
    )
    .await;

    let mut opts = options();
    opts.extract = vec![
        "heading := $('h1.name')".to_string(),
        "title := opengraph.title".to_string(),
        "product := jsonld.Product.name".to_string(),
    ];
    let mut op = StreamCrawl::new(
        ctx(),
        CrawlSource::Urls(vec![format!("{}/p", server.uri())]),
        opts,
    );
    let row = op.next_row().await.unwrap().unwrap();
    let extracted: serde_json::Value = serde_json::from_str(&row.extract).unwrap();
    assert_eq!(extracted["heading"], "Widget");
    assert_eq!(extracted["title"], "Widget Page");
    assert_eq!(extracted["product"], "Widget");
}

#[tokio::test]
async fn redirects_are_followed_with_exact_count() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/middle"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/middle"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", format!("{base}/end")))
        .mount(&server)
        .await;
    mount_html(&server, "/end", "<p>arrived</p>").await;

    let pool = crawlstream::http::HttpPool::new();
    let request = crawlstream::http::FetchRequest::new(format!("{base}/start"), "ua").unwrap();
    let response = pool.fetch(&request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.redirect_count, 2);
    assert_eq!(response.final_url, format!("{base}/end"));
    assert_eq!(response.body, "<p>arrived</p>");
}

#[tokio::test]
async fn facade_rejects_oversized_and_unwanted_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0u8; 64]),
        )
        .mount(&server)
        .await;
    mount_html(&server, "/huge", &"x".repeat(4096)).await;
    let base = server.uri();

    let mut pool = crawlstream::http::HttpPool::new();
    pool.reject_types = "image/*".to_string();
    pool.max_body_bytes = 1024;
    let pool = std::sync::Arc::new(pool);

    let image = crawlstream::http::FetchRequest::new(format!("{base}/image"), "ua").unwrap();
    let response = pool.fetch(&image).await;
    assert_eq!(response.status, 0);
    assert_eq!(response.error, "content_type_rejected");

    let huge = crawlstream::http::FetchRequest::new(format!("{base}/huge"), "ua").unwrap();
    let response = pool.fetch(&huge).await;
    assert_eq!(response.status, 0);
    assert_eq!(response.error, "content_too_large");
}

#[tokio::test]
async fn batch_fetch_preserves_input_order() {
    let server = MockServer::start().await;
    for route in ["/1", "/2", "/3", "/4"] {
        mount_html(&server, route, route).await;
    }
    let base = server.uri();

    let pool = crawlstream::http::HttpPool::new();
    let requests: Vec<_> = (1..=4)
        .map(|i| crawlstream::http::FetchRequest::new(format!("{base}/{i}"), "ua").unwrap())
        .collect();
    let responses = pool.fetch_all(requests, 4).await;
    assert_eq!(responses.len(), 4);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.status, 200);
        assert_eq!(response.body, format!("/{}", i + 1));
    }
}

#[tokio::test]
async fn bridge_runs_crawl_table_function() {
    let server = MockServer::start().await;
    mount_html(&server, "/a", "<p>bridged</p>").await;
    let url = format!("{}/a", server.uri());

    let ctx = ctx();
    let sql = format!("SELECT url, status FROM crawl(['{url}'], cache := false)");
    let mut stream = open_source(&ctx, &sql).await.unwrap();
    assert_eq!(stream.columns(), vec!["url", "status"]);
    let rows = stream.collect().await.unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0][0], rusqlite::types::Value::Text(url));
    assert_eq!(rows.rows[0][1], rusqlite::types::Value::Integer(200));
}
