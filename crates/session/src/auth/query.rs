//! Query-string handling for redirect responses and form bodies.

use std::collections::HashMap;

use url::form_urlencoded;

/// Parse `key=value&...` into a map. A leading `?` is ignored.
///
/// Keys without `=` map to an empty value. When a key repeats, which value
/// wins is not part of the contract.
#[must_use]
pub fn parse_query_parameters(query: &str) -> HashMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

/// Encode key/value pairs as `application/x-www-form-urlencoded`.
#[must_use]
pub fn query_encode<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    form_urlencoded::Serializer::new(String::new()).extend_pairs(params).finish()
}
