//! Route templates and URL assembly.
//!
//! A template is a `/`-separated path whose segments may hold named tokens:
//! a whole segment `:name`, or `{name}` anywhere inside a segment.

use crate::error::{InvokeError, Result};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Substitute route tokens, returning the resolved path segments.
///
/// Values are returned raw; encoding happens in [`make_url`].
pub fn substitute(template: &str, routes: &HashMap<String, String>) -> Result<Vec<String>> {
    let trimmed = template.strip_prefix('/').unwrap_or(template);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split('/')
        .map(|segment| substitute_segment(segment, routes))
        .collect()
}

fn lookup<'a>(name: &str, routes: &'a HashMap<String, String>) -> Result<&'a str> {
    if name.is_empty() {
        return Err(InvokeError::Routing("empty route token".to_string()));
    }
    routes
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| InvokeError::Routing(format!("route `{}` not set", name)))
}

fn substitute_segment(segment: &str, routes: &HashMap<String, String>) -> Result<String> {
    if let Some(name) = segment.strip_prefix(':') {
        return lookup(name, routes).map(str::to_string);
    }

    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(InvokeError::Routing(format!(
                "unmatched `}}` in segment `{}`",
                segment
            )));
        }
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            InvokeError::Routing(format!("unclosed `{{` in segment `{}`", segment))
        })?;
        let name = &after[..close];
        if name.contains('{') {
            return Err(InvokeError::Routing(format!(
                "nested `{{` in segment `{}`",
                segment
            )));
        }
        out.push_str(lookup(name, routes)?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Assemble `scheme://host/segments?queries`.
///
/// Query keys come out sorted; values keep their per-key insertion order.
pub fn make_url(
    scheme: &str,
    host: &str,
    segments: &[String],
    queries: &BTreeMap<String, Vec<String>>,
) -> Result<Url> {
    let mut url = Url::parse(&format!("{}://{}/", scheme, host))
        .map_err(|e| InvokeError::Build(format!("invalid url: {}", e)))?;

    url.path_segments_mut()
        .map_err(|_| InvokeError::Build(format!("host `{}` cannot carry a path", host)))?
        .clear()
        .extend(segments);

    if queries.values().any(|values| !values.is_empty()) {
        let mut pairs = url.query_pairs_mut();
        for (key, values) in queries {
            for value in values {
                pairs.append_pair(key, value);
            }
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_colon_and_brace_tokens() {
        let r = routes(&[("id", "42"), ("fmt", "json")]);
        assert_eq!(substitute("/user/:id", &r).unwrap(), vec!["user", "42"]);
        assert_eq!(
            substitute("/user/{id}.{fmt}", &r).unwrap(),
            vec!["user", "42.json"]
        );
    }

    #[test]
    fn test_literal_paths() {
        let r = routes(&[]);
        assert!(substitute("/", &r).unwrap().is_empty());
        assert!(substitute("", &r).unwrap().is_empty());
        assert_eq!(substitute("health", &r).unwrap(), vec!["health"]);
        assert_eq!(substitute("/a/b/", &r).unwrap(), vec!["a", "b", ""]);
    }

    #[test]
    fn test_unresolved_and_malformed_tokens() {
        let r = routes(&[("id", "1")]);
        for template in ["/user/:name", "/user/:", "/user/{}", "/user/{id", "/user/id}", "/{a{id}}"] {
            assert!(
                matches!(substitute(template, &r), Err(InvokeError::Routing(_))),
                "{template} should fail"
            );
        }
    }

    #[test]
    fn test_make_url_matches_example() {
        let mut queries = BTreeMap::new();
        queries.insert("verbose".to_string(), vec!["true".to_string()]);
        let url = make_url("http", "10.0.0.5:8080", &["user".into(), "42".into()], &queries).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:8080/user/42?verbose=true");
    }

    #[test]
    fn test_repeated_query_values_keep_order() {
        let mut queries = BTreeMap::new();
        queries.insert("b".to_string(), vec!["2".to_string(), "1".to_string()]);
        queries.insert("a".to_string(), vec!["x y".to_string()]);
        let url = make_url("https", "svc", &[], &queries).unwrap();
        assert_eq!(url.as_str(), "https://svc/?a=x+y&b=2&b=1");
    }

    #[test]
    fn test_route_values_are_segment_encoded() {
        let r = routes(&[("name", "a/b c")]);
        let segments = substitute("/files/:name", &r).unwrap();
        let url = make_url("http", "h:1", &segments, &BTreeMap::new()).unwrap();
        assert_eq!(url.path(), "/files/a%2Fb%20c");
    }
}
