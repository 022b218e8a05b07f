//! Sitemap scanning and robots.txt behavior against a mock server.

use std::io::Write;

use crawlstream::crawl::stream::StreamCrawl;
use crawlstream::crawl::{CrawlContext, CrawlOptions, CrawlSource};
use crawlstream::{Database, Settings, SitemapOptions, SitemapScan};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ctx() -> CrawlContext {
    CrawlContext::new(Database::in_memory().unwrap())
}

async fn mount(server: &MockServer, route: &str, content_type: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", content_type)
                .set_body_bytes(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn index_recursion_with_robots_discovery() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/robots.txt",
        "text/plain",
        format!("User-agent: *\nSitemap: {base}/sitemap_index.xml\n").into_bytes(),
    )
    .await;
    mount(
        &server,
        "/sitemap_index.xml",
        "application/xml",
        format!(
            "<sitemapindex><sitemap><loc>{base}/maps/articles.xml</loc></sitemap></sitemapindex>"
        )
        .into_bytes(),
    )
    .await;
    mount(
        &server,
        "/maps/articles.xml",
        "application/xml",
        format!(
            "<urlset>\
             <url><loc>{base}/a</loc><lastmod>2025-02-01</lastmod><priority>0.9</priority></url>\
             <url><loc>{base}/b?x=1&amp;y=2</loc><changefreq>weekly</changefreq></url>\
             </urlset>"
        )
        .into_bytes(),
    )
    .await;

    let mut options = SitemapOptions::from_settings(&Settings::default());
    options.discover = true;
    let scan = SitemapScan::new(ctx(), options);
    let mut entries = scan.run(&base).await.unwrap();
    entries.sort_by(|a, b| a.url.cmp(&b.url));

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].url, format!("{base}/a"));
    assert_eq!(entries[0].lastmod.as_deref(), Some("2025-02-01"));
    assert_eq!(entries[0].priority, Some(0.9));
    assert_eq!(entries[1].url, format!("{base}/b?x=1&y=2"));
    assert_eq!(entries[1].changefreq.as_deref(), Some("weekly"));
}

#[tokio::test]
async fn gzipped_sitemap_is_decoded() {
    let server = MockServer::start().await;
    let base = server.uri();

    let xml = format!("<urlset><url><loc>{base}/zipped</loc></url></urlset>");
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    let gz = encoder.finish().unwrap();
    mount(&server, "/sitemap.xml.gz", "application/gzip", gz).await;

    let options = SitemapOptions::from_settings(&Settings::default());
    let scan = SitemapScan::new(ctx(), options);
    let entries = scan.run(&format!("{base}/sitemap.xml.gz")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, format!("{base}/zipped"));
}

#[tokio::test]
async fn filter_restricts_urls() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount(
        &server,
        "/sitemap.xml",
        "application/xml",
        format!(
            "<urlset>\
             <url><loc>{base}/docs/alpha</loc></url>\
             <url><loc>{base}/blog/beta</loc></url>\
             </urlset>"
        )
        .into_bytes(),
    )
    .await;

    let mut options = SitemapOptions::from_settings(&Settings::default());
    options.filter = Some("/docs/".to_string());
    let scan = SitemapScan::new(ctx(), options);
    let entries = scan.run(&format!("{base}/sitemap.xml")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].url.contains("/docs/"));
}

#[tokio::test]
async fn respect_robots_blocks_disallowed_paths() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount(
        &server,
        "/robots.txt",
        "text/plain",
        b"User-agent: *\nDisallow: /private/\n".to_vec(),
    )
    .await;
    mount(&server, "/open/page", "text/html", b"<p>ok</p>".to_vec()).await;
    mount(
        &server,
        "/private/page",
        "text/html",
        b"<p>secret</p>".to_vec(),
    )
    .await;

    let mut options = CrawlOptions::from_settings(&Settings::default());
    options.respect_robots = true;
    options.cache = false;
    let mut op = StreamCrawl::new(
        ctx(),
        CrawlSource::Urls(vec![
            format!("{base}/open/page"),
            format!("{base}/private/page"),
        ]),
        options,
    );

    let open = op.next_row().await.unwrap().unwrap();
    assert_eq!(open.status, 200);
    assert!(open.error.is_empty());

    let blocked = op.next_row().await.unwrap().unwrap();
    assert_eq!(blocked.status, 0);
    assert_eq!(blocked.error, "robots_disallowed");

    // The disallowed path was never requested.
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/private")));
}
