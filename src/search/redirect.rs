//! Unwrapping of search-engine click-tracking URLs.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use url::Url;

/// Query parameters that commonly carry the real destination.
const GENERIC_PARAMS: &[&str] = &["url", "target", "link", "dest", "to"];

fn is_http(candidate: &str) -> bool {
    candidate.starts_with("http://") || candidate.starts_with("https://")
}

/// Parse absolute, protocol-relative (`//host/...`) or root-relative
/// wrapper links. Relative links get a placeholder host so that their
/// query string can still be read.
fn parse_loose(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("//") {
        return Url::parse(&format!("https://{}", rest)).ok();
    }
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("https://relative.invalid/")
            .ok()?
            .join(raw)
            .ok(),
        Err(_) => None,
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Bing `ck/a` links carry `u=a1<base64 url>`.
fn decode_bing(url: &Url) -> Option<String> {
    let encoded = query_param(url, "u")?;
    let payload = encoded.strip_prefix("a1").unwrap_or(&encoded);
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Yahoo puts the target in a path segment: `/RU=<encoded>/RK=...`.
fn decode_yahoo(raw: &str) -> Option<String> {
    let start = raw.find("/RU=")? + 4;
    let rest = &raw[start..];
    let end = rest.find("/RK=").or_else(|| rest.find("/RS=")).unwrap_or(rest.len());
    urlencoding::decode(&rest[..end]).ok().map(|s| s.into_owned())
}

/// The real destination behind a redirect wrapper, or `None` when `raw`
/// is not a recognised wrapper (or cannot be decoded).
pub fn resolve_redirect(raw: &str) -> Option<String> {
    let url = parse_loose(raw)?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = url.path();

    let decoded = if let Some(target) = query_param(&url, "uddg") {
        Some(target)
    } else if host.ends_with("bing.com") && path.starts_with("/ck/a") {
        decode_bing(&url)
    } else if host.contains("google.") && path == "/url" {
        query_param(&url, "q").or_else(|| query_param(&url, "url"))
    } else if raw.contains("/RU=") {
        decode_yahoo(raw)
    } else {
        GENERIC_PARAMS
            .iter()
            .filter_map(|p| query_param(&url, p))
            .find(|v| is_http(v))
    };

    decoded
        .map(|d| d.trim().to_string())
        .filter(|d| is_http(d) && d != raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duckduckgo_uddg() {
        assert_eq!(
            resolve_redirect("//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn&rut=abc").as_deref(),
            Some("https://www.rust-lang.org/learn")
        );
        assert_eq!(
            resolve_redirect("/l/?uddg=https%3A%2F%2Fexample.com%2F").as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn bing_base64_payload() {
        let encoded = URL_SAFE_NO_PAD.encode("https://doc.rust-lang.org/book/");
        let wrapped = format!("https://www.bing.com/ck/a?!&&p=abc&u=a1{}&ntb=1", encoded);
        assert_eq!(
            resolve_redirect(&wrapped).as_deref(),
            Some("https://doc.rust-lang.org/book/")
        );
    }

    #[test]
    fn google_url_param() {
        assert_eq!(
            resolve_redirect("https://www.google.com/url?sa=t&url=https%3A%2F%2Fcrates.io%2F&ved=x").as_deref(),
            Some("https://crates.io/")
        );
        assert_eq!(
            resolve_redirect("https://www.google.co.uk/url?q=https://serde.rs/&sa=U").as_deref(),
            Some("https://serde.rs/")
        );
    }

    #[test]
    fn yahoo_ru_segment() {
        let wrapped = "https://r.search.yahoo.com/_ylt=A0;_ylu=Y29s/RV=2/RE=1/RO=10/RU=https%3a%2f%2ftokio.rs%2f/RK=2/RS=zz-";
        assert_eq!(resolve_redirect(wrapped).as_deref(), Some("https://tokio.rs/"));
    }

    #[test]
    fn generic_params_need_absolute_targets() {
        assert_eq!(
            resolve_redirect("https://out.example/redirect?target=https%3A%2F%2Fdest.example%2Fa").as_deref(),
            Some("https://dest.example/a")
        );
        assert_eq!(resolve_redirect("https://site.example/page?to=checkout"), None);
    }

    #[test]
    fn plain_urls_pass_through() {
        assert_eq!(resolve_redirect("https://www.rust-lang.org/"), None);
    }
}
