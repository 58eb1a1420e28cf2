//! Request classification.
//!
//! Pure functions mapping an inbound request to the strategy that serves it.
//! Rule order is a pinned product decision: the static checks run before the
//! API marker, so `/api/menu.json` classifies Static. Tests assert the order.

use crate::config::WorkerConfig;
use crate::request::{Method, Request};

/// Dispatch category for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// App shell files, served cache-first.
  Static,
  /// API calls and explicitly uncacheable content, served network-first.
  Dynamic,
  /// Allow-listed third-party resources (fonts), stale-while-revalidate.
  External,
  /// Everything else, network with cache fallback.
  Default,
}

/// Pre-filter: only GET requests over http(s) are intercepted at all.
/// Everything else passes through to the platform untouched.
pub fn should_intercept(request: &Request) -> bool {
  request.method == Method::GET && matches!(request.url.scheme(), "http" | "https")
}

/// Classify an intercepted request. First matching rule wins.
pub fn classify(request: &Request, config: &WorkerConfig) -> RequestClass {
  if is_static_file(request, config) {
    RequestClass::Static
  } else if is_dynamic_content(request) {
    RequestClass::Dynamic
  } else if is_external_resource(request, config) {
    RequestClass::External
  } else {
    RequestClass::Default
  }
}

const STATIC_EXTENSIONS: [&str; 4] = [".css", ".js", ".html", ".json"];

fn is_static_file(request: &Request, config: &WorkerConfig) -> bool {
  let path = request.url.path();

  STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    || path == "/"
    || config
      .static_manifest
      .iter()
      .any(|entry| manifest_matches(entry, request))
}

/// Exact match against a manifest entry: full URL for absolute entries,
/// path for relative ones.
fn manifest_matches(entry: &str, request: &Request) -> bool {
  if entry.starts_with("http://") || entry.starts_with("https://") {
    request.url.as_str() == entry
  } else {
    request.url.path() == entry
  }
}

fn is_dynamic_content(request: &Request) -> bool {
  request.url.path().contains("/api/")
    || request.url.query_pairs().any(|(name, _)| name == "dynamic")
    || request.header("cache-control") == Some("no-cache")
}

fn is_external_resource(request: &Request, config: &WorkerConfig) -> bool {
  let host = request.url.host_str().unwrap_or("");
  let path = request.url.path();

  config.cacheable_hosts.iter().any(|d| host.contains(d.as_str()))
    || path.contains("font")
    || path.contains(".woff")
    || path.contains(".woff2")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn get(url: &str) -> Request {
    Request::parse_get(url).unwrap()
  }

  fn classify_url(url: &str) -> RequestClass {
    classify(&get(url), &WorkerConfig::default())
  }

  #[test]
  fn non_get_requests_are_not_intercepted() {
    let url = url::Url::parse("https://rolan-icecream.com/api/orders").unwrap();
    let post = Request::post_json(url, &serde_json::json!({"flavor": "pistachio"}));
    assert!(!should_intercept(&post));
  }

  #[test]
  fn non_http_schemes_are_not_intercepted() {
    let request = get("chrome-extension://abcdef/inject.js");
    assert!(!should_intercept(&request));

    let request = get("https://rolan-icecream.com/");
    assert!(should_intercept(&request));
  }

  #[test]
  fn static_extensions_and_root_classify_static() {
    assert_eq!(classify_url("https://rolan-icecream.com/styles.css"), RequestClass::Static);
    assert_eq!(classify_url("https://rolan-icecream.com/script.js"), RequestClass::Static);
    assert_eq!(classify_url("https://rolan-icecream.com/index.html"), RequestClass::Static);
    assert_eq!(classify_url("https://rolan-icecream.com/"), RequestClass::Static);
  }

  #[test]
  fn manifest_entries_match_exactly() {
    assert_eq!(
      classify_url(
        "https://fonts.googleapis.com/css2?family=Cairo:wght@400;600;700&display=swap"
      ),
      RequestClass::Static
    );
    // Same host, different URL: not a manifest hit, falls to the host
    // allow-list rule instead.
    assert_eq!(
      classify_url("https://fonts.googleapis.com/css2?family=Amiri"),
      RequestClass::External
    );
  }

  #[test]
  fn api_paths_classify_dynamic() {
    assert_eq!(classify_url("https://rolan-icecream.com/api/menu"), RequestClass::Dynamic);
    assert_eq!(classify_url("https://rolan-icecream.com/api/orders/42"), RequestClass::Dynamic);
  }

  #[test]
  fn dynamic_query_parameter_classifies_dynamic() {
    assert_eq!(
      classify_url("https://rolan-icecream.com/offers?dynamic=1"),
      RequestClass::Dynamic
    );
  }

  #[test]
  fn no_cache_header_classifies_dynamic() {
    let request =
      get("https://rolan-icecream.com/offers").with_header("Cache-Control", "no-cache");
    assert_eq!(
      classify(&request, &WorkerConfig::default()),
      RequestClass::Dynamic
    );
  }

  #[test]
  fn allow_listed_hosts_and_fonts_classify_external() {
    assert_eq!(
      classify_url("https://fonts.gstatic.com/s/cairo/v28/other.ttf"),
      RequestClass::External
    );
    assert_eq!(
      classify_url("https://cdn.example.net/assets/cairo.woff2"),
      RequestClass::External
    );
    assert_eq!(
      classify_url("https://cdn.example.net/fonts/cairo.ttf"),
      RequestClass::External
    );
  }

  #[test]
  fn everything_else_classifies_default() {
    assert_eq!(
      classify_url("https://rolan-icecream.com/images/cone.webp"),
      RequestClass::Default
    );
  }

  // Rule-order pins. These encode observed product behavior; do not "fix".

  #[test]
  fn json_under_api_is_static() {
    // Static extension check runs before the API marker.
    assert_eq!(
      classify_url("https://rolan-icecream.com/api/menu.json"),
      RequestClass::Static
    );
  }

  #[test]
  fn api_path_on_external_host_is_dynamic() {
    // Dynamic rules run before the external allow-list.
    assert_eq!(
      classify_url("https://fonts.gstatic.com/api/usage"),
      RequestClass::Dynamic
    );
  }

  #[test]
  fn font_css_is_static_before_external() {
    assert_eq!(
      classify_url("https://cdn.example.net/fonts/cairo.css"),
      RequestClass::Static
    );
  }
}
