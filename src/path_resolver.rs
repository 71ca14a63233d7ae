//! Normalizes raw classpath path strings before they become elements.
//!
//! Raw paths match the grammar `[scheme ":"]? base ("!" inner)*`, where
//! `scheme` is one of `jar`, `file`, `http`, `https` and `inner` is
//! slash-separated. This module only does the lexical half of that
//! grammar — stripping scheme prefixes, canonicalizing separators, and
//! splitting off the first archive separator. Canonicalizing the
//! filesystem base (resolving `.`/`..`, symlinks) is a separate, fallible
//! step left to the caller (`ClasspathElement::open`), since it may need
//! to retry the singleton lookup with the canonical form.
use std::io;
use std::path::{Path, PathBuf};

/// A classpath path string exactly as it appeared in the source classpath,
/// before any normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawPath(String);

impl RawPath {
    pub fn new(s: impl Into<String>) -> Self {
        RawPath(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RawPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RawPath {
    fn from(s: String) -> Self {
        RawPath(s)
    }
}

impl From<&str> for RawPath {
    fn from(s: &str) -> Self {
        RawPath(s.to_string())
    }
}

/// The result of lexically parsing one raw path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    /// `true` if `raw` matched an `http(s)://` scheme prefix. Remote paths
    /// carry the original URL as `filesystem_base` verbatim and are never
    /// filesystem-canonicalized (§4.3 step 1).
    pub is_remote: bool,
    /// The left side of the first `!` separator (or the whole string if
    /// there is none), with the scheme prefix stripped and separators
    /// normalized to `/`.
    pub filesystem_base: String,
    /// The right side of the first `!` separator, if any — a path inside
    /// an archive, possibly itself containing further `!` separators for
    /// deeper nesting (left to the Nested Archive Handler to unpack).
    pub inner_path: Option<String>,
}

const STRIPPABLE_SCHEMES: [&str; 2] = ["jar:", "file:"];

/// Whether `raw` parses as an absolute URL with an `http`/`https` scheme
/// (§6 path grammar). Delegated to `url::Url` rather than a prefix check
/// so that scheme matching follows the same rules a real URL consumer
/// would use (case-insensitive scheme, no false positive on something
/// like `httpfoo://`).
fn is_http_scheme(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Strips any number of leading `jar:`/`file:` prefixes. Nix-index-style
/// classpath strings occasionally nest these (`jar:file:/a.jar!/`), so this
/// loops rather than stripping once.
fn strip_scheme_prefixes(mut raw: &str) -> &str {
    loop {
        match STRIPPABLE_SCHEMES.iter().find(|scheme| raw.starts_with(*scheme)) {
            Some(scheme) => raw = &raw[scheme.len()..],
            None => return raw,
        }
    }
}

fn normalize_separators(path: &str, cwd: &Path) -> String {
    let forward_slashed = path.replace('\\', "/");
    let as_path = Path::new(&forward_slashed);
    let resolved: PathBuf = if as_path.is_absolute() {
        as_path.to_path_buf()
    } else {
        cwd.join(as_path)
    };
    resolved.to_string_lossy().replace('\\', "/")
}

fn split_at_first_bang(path: &str) -> (String, Option<String>) {
    match path.find('!') {
        None => (path.to_string(), None),
        Some(idx) => {
            let base = path[..idx].trim_end_matches('/').to_string();
            let inner = path[idx + 1..].trim_start_matches('/').to_string();
            (base, if inner.is_empty() { None } else { Some(inner) })
        }
    }
}

/// Parses one raw classpath path string, relative to `cwd` for resolving
/// non-absolute filesystem bases.
pub fn parse_raw_path(raw: &RawPath, cwd: &Path) -> ParsedPath {
    let raw_str = raw.as_str();

    if is_http_scheme(raw_str) {
        return ParsedPath {
            is_remote: true,
            filesystem_base: raw_str.to_string(),
            inner_path: None,
        };
    }

    let stripped = strip_scheme_prefixes(raw_str);
    let normalized = normalize_separators(stripped, cwd);
    let (filesystem_base, inner_path) = split_at_first_bang(&normalized);

    ParsedPath {
        is_remote: false,
        filesystem_base,
        inner_path,
    }
}

/// Canonicalizes a filesystem base path, returning it as a forward-slashed
/// string. Distinct from `std::fs::canonicalize` only in its string form,
/// so canonical identities are comparable regardless of host path syntax.
pub fn canonicalize(path: &str) -> io::Result<String> {
    let canonical = std::fs::canonicalize(path)?;
    Ok(canonical.to_string_lossy().replace('\\', "/"))
}
