//! Plain `Cookie` header parsing shared by the site modules.

/// Split a cookie header into ordered `(name, value)` pairs.
///
/// Fragments without `=` are dropped; duplicate names keep the last value.
pub fn parse_cookie_pairs(cookies: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for part in cookies.split(';') {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match pairs.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.trim().to_string(),
            None => pairs.push((name.to_string(), value.trim().to_string())),
        }
    }
    pairs
}

/// Extract a specific cookie value from a cookie string.
///
/// ```
/// use warden_platforms::cookie_header::extract_cookie_value;
///
/// let cookies = "SESSDATA=abc123; bili_jct=xyz789";
/// assert_eq!(extract_cookie_value(cookies, "SESSDATA"), Some("abc123".to_string()));
/// ```
pub fn extract_cookie_value(cookies: &str, name: &str) -> Option<String> {
    parse_cookie_pairs(cookies)
        .into_iter()
        .find_map(|(n, v)| (n == name).then_some(v))
}
