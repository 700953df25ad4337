// src/core/scanner/crawler.rs

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::core::scanner::rate_limiter::host_key;

static HREF: Lazy<Selector> = Lazy::new(|| Selector::parse("[href]").unwrap());

/// Fetches `base` once and returns the same-host links it references.
///
/// Failures and error statuses yield nothing; the crawl only seeds the
/// wordlist and is never fatal.
pub async fn crawl(http: &reqwest::Client, base: &Url) -> Vec<String> {
    let response = match http.get(base.as_str()).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %base, error = %e, "Crawl request failed.");
            return Vec::new();
        }
    };
    if response.status().as_u16() >= 400 {
        debug!(url = %base, status = %response.status(), "Crawl target answered with an error.");
        return Vec::new();
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(url = %base, error = %e, "Could not read crawl body.");
            return Vec::new();
        }
    };

    let links = same_host_links(base, &body);
    debug!(url = %base, links = links.len(), "Crawl finished.");
    links
}

/// Resolves every `href` in `html` against `base`, keeping links whose
/// `host[:port]` matches the base. Fragment-only links are skipped.
pub fn same_host_links(base: &Url, html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let origin = host_key(base);

    let mut links: Vec<String> = Vec::new();
    for element in document.select(&HREF) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(link) = base.join(href) else {
            continue;
        };
        if link.host_str().is_none() || host_key(&link) != origin {
            continue;
        }
        let link = link.to_string();
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_same_host_links() {
        let base = Url::parse("http://example.com:8080/app/").unwrap();
        let html = r##"
            <html><head><link href="/static/site.css"></head>
            <body>
              <a href="#top">top</a>
              <a href="login">login</a>
              <a href="http://example.com:8080/admin">admin</a>
              <a href="http://example.com/other-port">other</a>
              <a href="https://evil.test/">evil</a>
              <a href="login">dup</a>
              <a>no href</a>
            </body></html>"##;

        let links = same_host_links(&base, html);
        assert_eq!(
            links,
            vec![
                "http://example.com:8080/static/site.css",
                "http://example.com:8080/app/login",
                "http://example.com:8080/admin",
            ]
        );
    }
}
