//! Entry-name helpers: `Content-Disposition` parsing, URL basenames and
//! per-archive collision handling.

use reqwest::Url;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Used when neither the response headers nor the URL yield a usable name.
pub const FALLBACK_ENTRY_NAME: &str = "file";

/// Extract the `filename` parameter of a `Content-Disposition` value.
///
/// Handles quoted and bare values. The extended `filename*=charset'lang'value`
/// form takes precedence over plain `filename` when both are present.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain: Option<String> = None;
    let mut extended: Option<String> = None;

    for (key, val) in parse_params(value) {
        match key.as_str() {
            "filename" => plain = Some(val),
            "filename*" => extended = decode_ext_value(&val),
            _ => {}
        }
    }

    extended
        .and_then(|name| sanitize_entry_name(&name))
        .or_else(|| plain.and_then(|name| sanitize_entry_name(&name)))
}

/// Final path segment of a URL, percent-decoded. Query and fragment are ignored.
pub fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path().trim_end_matches('/').rsplit('/').next()?;
    if last.is_empty() || last == "." {
        return None;
    }

    let decoded = urlencoding::decode(last)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| last.to_string());
    sanitize_entry_name(&decoded)
}

/// Reduce a name to its last path component so it cannot escape the archive root.
pub fn sanitize_entry_name(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let last = normalized.rsplit('/').next().unwrap_or("");
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Archive name as it may appear inside a quoted header parameter.
pub fn header_safe_filename(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();

    if cleaned.trim().is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Split `report.final.pdf` into (`report.final`, `.pdf`). A leading dot does
/// not start an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Names already handed out within one archive.
#[derive(Debug, Default)]
pub struct UsedNames {
    counters: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl UsedNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `base`, or the next free `stem_N.ext` variant if it was used before.
    pub fn claim(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }

        let (stem, ext) = split_extension(base);
        let counter = self.counters.entry(base.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}{}", stem, counter, ext);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Split `attachment; a=b; c="d; e"` into lowercase keys and unquoted values.
/// The leading disposition type is skipped.
fn parse_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();

    // disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }

    loop {
        let mut key = String::new();
        let mut has_value = false;
        for c in chars.by_ref() {
            if c == '=' {
                has_value = true;
                break;
            }
            if c == ';' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_ascii_lowercase();

        if !has_value {
            if chars.peek().is_none() {
                break;
            }
            continue;
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut val = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            val.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => val.push(c),
                }
            }
            // skip to the next separator
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                val.push(c);
            }
            val = val.trim().to_string();
        }

        if !key.is_empty() {
            params.push((key, val));
        }

        if chars.peek().is_none() {
            break;
        }
    }

    params
}

/// Decode an RFC 5987 `charset'lang'pct-encoded` value (UTF-8 and ISO-8859-1).
fn decode_ext_value(raw: &str) -> Option<String> {
    let mut parts = raw.splitn(3, '\'');
    let charset = parts.next()?.trim().to_ascii_lowercase();
    let _lang = parts.next()?;
    let encoded = parts.next()?;

    let bytes = urlencoding::decode_binary(encoded.as_bytes());
    match charset.as_str() {
        "utf-8" => String::from_utf8(bytes.into_owned()).ok(),
        "iso-8859-1" => Some(bytes.iter().map(|&b| b as char).collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_quoted() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
    }

    #[test]
    fn test_content_disposition_bare_and_spacing() {
        assert_eq!(
            filename_from_content_disposition("inline;filename=data.csv ; size=10"),
            Some("data.csv".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; FileName = \"a;b.txt\""),
            Some("a;b.txt".to_string())
        );
    }

    #[test]
    fn test_content_disposition_extended_wins() {
        let header = "attachment; filename=\"fallback.txt\"; filename*=UTF-8''r%C3%A9sum%C3%A9.txt";
        assert_eq!(
            filename_from_content_disposition(header),
            Some("résumé.txt".to_string())
        );
    }

    #[test]
    fn test_content_disposition_unusable_extended_falls_back() {
        let header = "attachment; filename=\"good.txt\"; filename*=UTF-8''..";
        assert_eq!(
            filename_from_content_disposition(header),
            Some("good.txt".to_string())
        );
        let header = "attachment; filename*=UTF-8''%2F; filename=plain.bin";
        assert_eq!(
            filename_from_content_disposition(header),
            Some("plain.bin".to_string())
        );
    }

    #[test]
    fn test_content_disposition_without_filename() {
        assert_eq!(filename_from_content_disposition("attachment"), None);
        assert_eq!(filename_from_content_disposition("attachment; filename=\"\""), None);
        assert_eq!(filename_from_content_disposition(""), None);
    }

    #[test]
    fn test_content_disposition_skips_valueless_params() {
        assert_eq!(
            filename_from_content_disposition("attachment; hidden; filename=x.bin"),
            Some("x.bin".to_string())
        );
    }

    #[test]
    fn test_content_disposition_strips_directories() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"C:\\\\tmp\\\\x.bin\""),
            Some("x.bin".to_string())
        );
    }

    #[test]
    fn test_url_basename() {
        let url = Url::parse("https://example.com/exports/dataset.csv?x=1#top").unwrap();
        assert_eq!(filename_from_url(&url), Some("dataset.csv".to_string()));

        let url = Url::parse("https://example.com/dir/sub/").unwrap();
        assert_eq!(filename_from_url(&url), Some("sub".to_string()));

        let url = Url::parse("https://example.com/my%20file.txt").unwrap();
        assert_eq!(filename_from_url(&url), Some("my file.txt".to_string()));
    }

    #[test]
    fn test_url_without_path() {
        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(filename_from_url(&url), None);

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("A.zip"), ("A", ".zip"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".env"), (".env", ""));
    }

    #[test]
    fn test_used_names_disambiguates_in_order() {
        let mut used = UsedNames::new();
        assert_eq!(used.claim("A.zip"), "A.zip");
        assert_eq!(used.claim("A.zip"), "A_1.zip");
        assert_eq!(used.claim("A.zip"), "A_2.zip");
        assert_eq!(used.claim("B"), "B");
        assert_eq!(used.claim("B"), "B_1");
    }

    #[test]
    fn test_used_names_skips_taken_suffix() {
        let mut used = UsedNames::new();
        assert_eq!(used.claim("A_1.zip"), "A_1.zip");
        assert_eq!(used.claim("A.zip"), "A.zip");
        assert_eq!(used.claim("A.zip"), "A_2.zip");
    }

    #[test]
    fn test_header_safe_filename() {
        assert_eq!(header_safe_filename("my \"best\".zip", "files.zip"), "my best.zip");
        assert_eq!(header_safe_filename("a\r\nb.zip", "files.zip"), "ab.zip");
        assert_eq!(header_safe_filename("\"\"", "files.zip"), "files.zip");
    }
}
