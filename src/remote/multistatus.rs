use percent_encoding::percent_decode_str;
use url::Url;

/// Extracts child entry names from a PROPFIND multi-status body.
///
/// The scanner is deliberately tolerant of serializer differences: it walks
/// `href` elements regardless of namespace prefix or casing, decodes XML
/// entities and percent-encoding, and strips the queried folder's own path to
/// yield bare names. Entries whose path cannot be prefix-stripped fall back
/// to their last path segment. The folder's self entry is skipped, so an
/// empty folder produces an empty listing.
pub(super) fn file_names(body: &str, folder: &Url) -> Vec<String> {
    let folder_path = ensure_trailing_slash(
        percent_decode_str(folder.path())
            .decode_utf8_lossy()
            .into_owned(),
    );
    hrefs(body)
        .into_iter()
        .filter_map(|href| entry_name(&href, &folder_path))
        .collect()
}

fn hrefs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        let Some(end) = rest.find('>') else { break };
        let tag = &rest[..end];
        rest = &rest[end + 1..];
        if !is_href_tag(tag) {
            continue;
        }
        let Some(close) = rest.find('<') else { break };
        out.push(unescape_xml(rest[..close].trim()));
        rest = &rest[close..];
    }
    out
}

fn is_href_tag(tag: &str) -> bool {
    let tag = tag.trim();
    if tag.starts_with('/') || tag.starts_with('?') || tag.starts_with('!') {
        return false;
    }
    let name = tag.split_whitespace().next().unwrap_or("");
    let local = name.rsplit(':').next().unwrap_or(name);
    local.eq_ignore_ascii_case("href")
}

fn entry_name(href: &str, folder_path: &str) -> Option<String> {
    let decoded = percent_decode_str(href).decode_utf8_lossy().into_owned();
    let path = strip_origin(&decoded);
    if path.trim_end_matches('/') == folder_path.trim_end_matches('/') {
        return None;
    }
    let name = match path.strip_prefix(folder_path) {
        Some(child) => child.trim_matches('/').to_string(),
        None => last_segment(path).to_string(),
    };
    if name.is_empty() { None } else { Some(name) }
}

fn strip_origin(href: &str) -> &str {
    if let Some(scheme_end) = href.find("://") {
        let after = &href[scheme_end + 3..];
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else {
        href
    }
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn ensure_trailing_slash(mut path: String) -> String {
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}
