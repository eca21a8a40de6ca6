use std::borrow::Cow;
use std::collections::HashMap;

/// Parses the query part of `uri` into decoded key/value pairs.
///
/// A key without `=` maps to an empty string; repeated keys keep the last value.
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let Some((_, query)) = uri.split_once('?') else {
        return HashMap::new();
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, raw)) => {
                let value = urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
                (key.to_string(), value.into_owned())
            }
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// 1-based page number, defaulting to the first page.
pub fn get_page(params: &HashMap<String, String>) -> usize {
    params
        .get("page")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}
