//! Conversion between `did:web` identifiers and their HTTPS locations.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ::url::{form_urlencoded, Url};

use super::DidWebError;
use crate::config::{DID_DOCUMENT_FILE, DID_METHOD, DID_SCHEME, DID_WEB_PREFIX, WELL_KNOWN_SEGMENT};

// ---------------------------------------------------------------------------
// DidWebUrl
// ---------------------------------------------------------------------------

/// A parsed `did:web` identifier.
///
/// The host is kept exactly as written (still percent-encoded) so that
/// [`DidWebUrl::id`] reproduces it byte for byte. Path segments are kept
/// unescaped and re-escaped on output.
///
/// # Examples
///
/// ```
/// use didsrv_protocol::didweb::DidWebUrl;
///
/// let url = DidWebUrl::parse("did:web:example.com:path:some%2Bsubpath").unwrap();
/// assert_eq!(url.segments(), ["path", "some+subpath"]);
/// assert_eq!(url.id(), "example.com:path:some%2Bsubpath");
/// assert_eq!(url.url().unwrap().as_str(), "https://example.com/path/some+subpath/did.json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidWebUrl {
    host: String,
    segments: Vec<String>,
    query: BTreeMap<String, Vec<String>>,
    fragment: Option<String>,
}

impl DidWebUrl {
    /// Parse a full `did:web:...` identifier.
    ///
    /// Empty path tokens (`did:web:example.com::alice`) are skipped. A query
    /// or fragment trailing the path is split off into
    /// [`DidWebUrl::query`] and [`DidWebUrl::fragment`]. Each path token is
    /// unescaped exactly once and kept as written otherwise, so
    /// `Parse(id).did() == id` holds for every accepted identifier. Control
    /// characters, raw or escaped, are rejected.
    pub fn parse(id: &str) -> Result<Self, DidWebError> {
        if id.chars().any(char::is_control) {
            return Err(DidWebError::EncodingError(id.to_string()));
        }

        let (rest, fragment) = match id.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (id, None),
        };
        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));

        let tokens: Vec<&str> = rest.split(':').collect();
        if tokens.len() < 3 || tokens[0] != DID_SCHEME || tokens[1] != DID_METHOD {
            return Err(DidWebError::MalformedIdentifier(id.to_string()));
        }

        let host = tokens[2];
        if host.is_empty() {
            return Err(DidWebError::MalformedIdentifier(id.to_string()));
        }

        let segments = tokens[3..]
            .iter()
            .filter(|token| !token.is_empty())
            .map(|token| {
                let segment = query_unescape(token)?;
                if segment.chars().any(char::is_control) {
                    return Err(DidWebError::EncodingError(token.to_string()));
                }
                Ok(segment)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            pairs.entry(key.into_owned()).or_default().push(value.into_owned());
        }

        Ok(Self {
            host: host.to_string(),
            segments,
            query: pairs,
            fragment,
        })
    }

    /// Parse either a full DID or a bare method-specific id
    /// (`example.com:alice`).
    pub fn parse_id(id: &str) -> Result<Self, DidWebError> {
        let id = id.strip_prefix(DID_WEB_PREFIX).unwrap_or(id);
        Self::parse(&format!("{DID_WEB_PREFIX}{id}"))
    }

    /// Map an inbound HTTP path (`host/seg/.../did.json`) back to the
    /// identifier it serves.
    ///
    /// The final segment must be `did.json` (any case). A `.well-known`
    /// directory directly in front of it is dropped, so
    /// `example.com/.well-known/did.json` maps to `did:web:example.com`.
    pub fn parse_path(path: &str) -> Result<Self, DidWebError> {
        let mut parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 2 {
            return Err(DidWebError::NotAWellKnownPath(path.to_string()));
        }

        match parts.pop() {
            Some(last) if last.eq_ignore_ascii_case(DID_DOCUMENT_FILE) => {}
            _ => return Err(DidWebError::NotAWellKnownPath(path.to_string())),
        }
        if parts
            .last()
            .is_some_and(|part| part.eq_ignore_ascii_case(WELL_KNOWN_SEGMENT))
        {
            parts.pop();
        }

        Self::parse(&format!("{DID_WEB_PREFIX}{}", parts.join(":")))
    }

    /// The host exactly as it appeared in the identifier.
    pub fn raw_host(&self) -> &str {
        &self.host
    }

    /// The decoded host, with a percent-encoded port reattached as
    /// `host:port`.
    ///
    /// Decoding is best-effort: an undecodable host, or one whose `:` suffix
    /// is not a port number, is returned still encoded.
    pub fn host(&self) -> String {
        let Ok(decoded) = query_unescape(&self.host) else {
            return self.host.clone();
        };

        match decoded.split_once(':') {
            Some((name, port)) if !port.contains(':') => match port.parse::<u16>() {
                Ok(0) => name.to_string(),
                Ok(port) => format!("{name}:{port}"),
                Err(_) => self.host.clone(),
            },
            _ => decoded,
        }
    }

    /// Unescaped path segments, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Query parameters found after the path, multi-valued.
    pub fn query(&self) -> &BTreeMap<String, Vec<String>> {
        &self.query
    }

    /// Fragment found after the path, without the `#`.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Method-specific identifier: the raw host followed by the
    /// `:`-joined, percent-escaped path segments.
    pub fn id(&self) -> String {
        if self.segments.is_empty() {
            return self.host.clone();
        }
        let escaped: Vec<String> = self.segments.iter().map(|s| query_escape(s)).collect();
        format!("{}:{}", self.host, escaped.join(":"))
    }

    /// The full `did:web:` identifier.
    pub fn did(&self) -> String {
        format!("{DID_WEB_PREFIX}{}", self.id())
    }

    /// The HTTPS location of the DID document.
    pub fn url(&self) -> Result<Url, DidWebError> {
        self.url_with_scheme("https")
    }

    /// Like [`DidWebUrl::url`] with a caller-chosen scheme. Fails for a
    /// `.` or `..` segment, which would name a different location than the
    /// identifier does.
    pub(crate) fn url_with_scheme(&self, scheme: &str) -> Result<Url, DidWebError> {
        if let Some(dot) = self.segments.iter().find(|s| *s == "." || *s == "..") {
            return Err(DidWebError::InvalidUrl(format!("dot segment '{dot}' in {}", self.did())));
        }
        let mut url = Url::parse(&format!("{scheme}://{}/", self.host()))
            .map_err(|e| DidWebError::InvalidUrl(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| DidWebError::InvalidUrl(format!("'{}' has no path", self.host)))?;
            path.clear();
            if self.segments.is_empty() {
                path.push(WELL_KNOWN_SEGMENT);
            } else {
                path.extend(&self.segments);
            }
            path.push(DID_DOCUMENT_FILE);
        }
        Ok(url)
    }
}

impl fmt::Display for DidWebUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.did())
    }
}

impl FromStr for DidWebUrl {
    type Err = DidWebError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Form-style escaping: unreserved characters pass through, a space
/// becomes `+`, everything else is `%XX`.
pub(crate) fn query_escape(segment: &str) -> String {
    urlencoding::encode(segment).replace("%20", "+")
}

/// Inverse of [`query_escape`].
pub(crate) fn query_unescape(token: &str) -> Result<String, DidWebError> {
    percent_decode(&token.replace('+', " "))
        .map_err(|_| DidWebError::EncodingError(token.to_string()))
}

fn percent_decode(token: &str) -> Result<String, DidWebError> {
    if !is_well_formed(token) {
        return Err(DidWebError::EncodingError(token.to_string()));
    }
    urlencoding::decode(token)
        .map(Cow::into_owned)
        .map_err(|_| DidWebError::EncodingError(token.to_string()))
}

/// Every `%` must introduce exactly two hex digits.
fn is_well_formed(token: &str) -> bool {
    let mut rest = token;
    while let Some(pos) = rest.find('%') {
        match rest.get(pos + 1..pos + 3) {
            Some(hex) if hex.bytes().all(|b| b.is_ascii_hexdigit()) => rest = &rest[pos + 3..],
            _ => return false,
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
