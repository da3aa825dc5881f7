use crate::config::RouteRules;
use crate::http::RequestDescriptor;

/// Handling policy for a read request. Recomputed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyClass {
  StaticAsset,
  ApiData,
  NavigablePage,
}

/// Classify a request. First match wins:
/// 1. static prefix or a file extension on the last segment
/// 2. data endpoint prefix
/// 3. everything else is a page
///
/// Only the last segment is checked for an extension, so a dotted directory
/// such as `/v1.2/cells` stays a page. A plain "path contains a dot" test
/// would send it to the static store.
pub fn classify(request: &RequestDescriptor, routes: &RouteRules) -> PolicyClass {
  let path = request.url().path();

  if has_any_prefix(path, &routes.static_prefixes) || has_file_extension(path) {
    PolicyClass::StaticAsset
  } else if has_any_prefix(path, &routes.api_prefixes) {
    PolicyClass::ApiData
  } else {
    PolicyClass::NavigablePage
  }
}

fn has_any_prefix(path: &str, prefixes: &[String]) -> bool {
  prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

fn has_file_extension(path: &str) -> bool {
  let last = path.rsplit('/').next().unwrap_or("");
  match last.rfind('.') {
    Some(dot) => dot + 1 < last.len(),
    None => false,
  }
}
