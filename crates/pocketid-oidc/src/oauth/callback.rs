//! Redirect/callback URL matching with wildcards.
//!
//! Registered patterns support:
//! - `*` as the whole pattern: any URL
//! - `*` inside an authority element (scheme, userinfo, host label, port):
//!   any run of characters within that element
//! - `*` in the path: any run of characters except `/`
//! - `**` in the path: any run of characters including `/`
//! - `*` / `?` globs in query parameter values
//!
//! Plain-`http` loopback callbacks (`localhost`, `127.0.0.0/8`, `[::1]`)
//! match regardless of port (RFC 8252 §7.3).

use std::collections::BTreeMap;
use std::net::IpAddr;

use regex::Regex;

/// Errors produced while resolving or validating callback URLs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The candidate matches none of the registered patterns.
    #[error("invalid callback URL")]
    NoMatch,

    /// The client has no callback URLs registered.
    #[error("no callback URLs registered")]
    NoneRegistered,

    /// A registered pattern is malformed.
    #[error("invalid callback URL pattern: {0}")]
    InvalidPattern(String),
}

/// Resolves `candidate` against the registered `patterns`.
///
/// An empty candidate resolves to the first pattern. On success the returned
/// URL is always the candidate as given (ports included).
///
/// # Errors
///
/// Returns `CallbackError::NoMatch` if no pattern accepts the candidate.
pub fn match_callback_url(patterns: &[String], candidate: &str) -> Result<String, CallbackError> {
    if candidate.is_empty() {
        return patterns.first().cloned().ok_or(CallbackError::NoneRegistered);
    }

    let loopback_variant = loopback_without_port(candidate);

    for pattern in patterns {
        if matches_pattern(pattern, candidate) {
            return Ok(candidate.to_string());
        }

        if let Some(variant) = &loopback_variant {
            let pattern_variant = loopback_without_port(pattern);
            let pattern_variant = pattern_variant.as_deref().unwrap_or(pattern);
            if matches_pattern(pattern_variant, variant) {
                return Ok(candidate.to_string());
            }
        }
    }

    Err(CallbackError::NoMatch)
}

/// Checks that a pattern is well formed enough to ever match.
///
/// # Errors
///
/// Returns `CallbackError::InvalidPattern` describing the first problem found.
pub fn validate_callback_pattern(pattern: &str) -> Result<(), CallbackError> {
    if pattern == "*" {
        return Ok(());
    }
    if pattern.contains('#') {
        return Err(CallbackError::InvalidPattern(
            "fragments are not allowed".to_string(),
        ));
    }

    let (base, _) = split_query(pattern);
    let parts = UrlParts::parse(base)
        .ok_or_else(|| CallbackError::InvalidPattern(format!("not an absolute URL: {pattern}")))?;
    if parts.scheme.is_empty() {
        return Err(CallbackError::InvalidPattern("missing scheme".to_string()));
    }
    if parts.host.is_empty() {
        return Err(CallbackError::InvalidPattern("missing host".to_string()));
    }
    if parts.host.starts_with('[') && !parts.host.ends_with(']') {
        return Err(CallbackError::InvalidPattern(
            "unterminated IPv6 literal".to_string(),
        ));
    }
    Ok(())
}

fn matches_pattern(pattern: &str, candidate: &str) -> bool {
    if pattern == candidate || pattern == "*" {
        return true;
    }

    let pattern = strip_fragment(pattern);
    let candidate = strip_fragment(candidate);

    let (pattern_base, pattern_query) = split_query(pattern);
    let (candidate_base, candidate_query) = split_query(candidate);

    if !query_matches(pattern_query, candidate_query) {
        return false;
    }

    let (Some(pattern_parts), Some(candidate_parts)) =
        (UrlParts::parse(pattern_base), UrlParts::parse(candidate_base))
    else {
        return false;
    };

    authority_matches(pattern_parts.authority, candidate_parts.authority)
        && path_matches(pattern_parts.path, candidate_parts.path)
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(before, _)| before)
}

fn split_query(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    }
}

// =============================================================================
// URL decomposition
// =============================================================================

/// The pieces of `scheme://[userinfo@]host[:port]/path` needed for matching.
#[derive(Debug)]
struct UrlParts<'a> {
    scheme: &'a str,
    /// Everything before the path, scheme included.
    authority: &'a str,
    host: &'a str,
    port: Option<&'a str>,
    path: &'a str,
}

impl<'a> UrlParts<'a> {
    fn parse(base: &'a str) -> Option<Self> {
        let scheme_end = base.find("://")?;
        let scheme = &base[..scheme_end];
        let after_scheme = scheme_end + 3;

        let path_start = base[after_scheme..]
            .find('/')
            .map_or(base.len(), |i| after_scheme + i);
        let authority = &base[..path_start];
        let path = &base[path_start..];

        let host_port = &base[after_scheme..path_start];
        let host_port = host_port.rsplit_once('@').map_or(host_port, |(_, hp)| hp);

        let (host, port) = if host_port.starts_with('[') {
            match host_port.find(']') {
                Some(end) => {
                    let port = host_port[end + 1..].strip_prefix(':');
                    (&host_port[..=end], port)
                }
                None => (host_port, None),
            }
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            }
        };

        Some(Self {
            scheme,
            authority,
            host,
            port,
            path,
        })
    }
}

/// For `http` loopback URLs, the same URL with the port removed.
fn loopback_without_port(url: &str) -> Option<String> {
    let (base, query) = split_query(strip_fragment(url));
    let parts = UrlParts::parse(base)?;
    if parts.scheme != "http" {
        return None;
    }

    let bare_host = parts.host.trim_start_matches('[').trim_end_matches(']');
    let is_loopback = bare_host.eq_ignore_ascii_case("localhost")
        || bare_host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback());
    if !is_loopback {
        return None;
    }

    let port = parts.port?;
    let authority = parts
        .authority
        .strip_suffix(port)
        .and_then(|a| a.strip_suffix(':'))?;

    let mut stripped = format!("{authority}{}", parts.path);
    if let Some(query) = query {
        stripped.push('?');
        stripped.push_str(query);
    }
    Some(stripped)
}

// =============================================================================
// Authority
// =============================================================================

const AUTHORITY_DELIMITERS: [char; 6] = [':', '/', '[', ']', '@', '.'];

#[derive(Debug, PartialEq, Eq)]
enum AuthorityToken<'a> {
    Delimiter(char),
    Element(&'a str),
}

fn tokenize_authority(authority: &str) -> Vec<AuthorityToken<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    for (i, c) in authority.char_indices() {
        if AUTHORITY_DELIMITERS.contains(&c) {
            if start < i {
                tokens.push(AuthorityToken::Element(&authority[start..i]));
            }
            tokens.push(AuthorityToken::Delimiter(c));
            start = i + c.len_utf8();
        }
    }
    if start < authority.len() {
        tokens.push(AuthorityToken::Element(&authority[start..]));
    }
    tokens
}

fn authority_matches(pattern: &str, candidate: &str) -> bool {
    let pattern_tokens = tokenize_authority(pattern);
    let candidate_tokens = tokenize_authority(candidate);

    pattern_tokens.len() == candidate_tokens.len()
        && pattern_tokens
            .iter()
            .zip(&candidate_tokens)
            .all(|(p, c)| match (p, c) {
                (AuthorityToken::Delimiter(a), AuthorityToken::Delimiter(b)) => a == b,
                (AuthorityToken::Element(p), AuthorityToken::Element(c)) => {
                    p.eq_ignore_ascii_case(c) || glob_match(p, c)
                }
                _ => false,
            })
}

// =============================================================================
// Path
// =============================================================================

fn path_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("^");
    let mut rest = pattern;
    while let Some(star) = rest.find('*') {
        expr.push_str(&regex::escape(&rest[..star]));
        if rest[star + 1..].starts_with('*') {
            expr.push_str(".*");
            rest = &rest[star + 2..];
        } else {
            expr.push_str("[^/]*");
            rest = &rest[star + 1..];
        }
    }
    expr.push_str(&regex::escape(rest));
    expr.push('$');
    Regex::new(&expr).ok()
}

fn path_matches(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }
    path_regex(pattern).is_some_and(|re| re.is_match(candidate))
}

// =============================================================================
// Query
// =============================================================================

fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    params
}

fn query_matches(pattern: Option<&str>, candidate: Option<&str>) -> bool {
    let pattern = parse_query(pattern);
    let candidate = parse_query(candidate);

    if pattern.len() != candidate.len() {
        return false;
    }

    pattern.iter().all(|(key, pattern_values)| {
        candidate.get(key).is_some_and(|candidate_values| {
            pattern_values.len() == candidate_values.len()
                && pattern_values
                    .iter()
                    .zip(candidate_values)
                    .all(|(p, c)| glob_match(p, c))
        })
    })
}

// =============================================================================
// Single-segment glob
// =============================================================================

/// `*` matches any run of non-`/` characters, `?` exactly one non-`/` character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('?') if text[t] != '/' => {
                p += 1;
                t += 1;
            }
            Some(&c) if c != '?' && c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) if text[star_t] != '/' => {
                    backtrack = Some((star_p, star_t + 1));
                    p = star_p + 1;
                    t = star_t + 1;
                }
                _ => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
