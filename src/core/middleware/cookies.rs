//! Session cookie handling.
//!
//! Parses the inbound `Cookie` header into an ordered set and renders
//! `Set-Cookie` values for the outbound response. Values too large for a
//! single cookie are split into numbered chunks (`name.0`, `name.1`, ...).

/// Largest value written into a single cookie before chunking.
pub const MAX_CHUNK_SIZE: usize = 3180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Attributes attached to a cookie when it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<u64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            http_only: true,
            secure: false,
            same_site: Some(SameSite::Lax),
        }
    }
}

impl CookieOptions {
    /// Same attributes with `Max-Age=0`, which tells the browser to drop the cookie.
    #[must_use]
    pub fn expired(&self) -> Self {
        Self {
            max_age: Some(0),
            ..self.clone()
        }
    }
}

/// A single cookie write destined for the outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl SessionCookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            options,
        }
    }

    /// A write that deletes `name` on the client.
    #[must_use]
    pub fn removal(name: impl Into<String>, options: &CookieOptions) -> Self {
        Self::new(name, "", options.expired())
    }

    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.options.max_age == Some(0)
    }

    /// Renders the `Set-Cookie` header value.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(ref path) = self.options.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(ref domain) = self.options.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.options.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.options.http_only {
            out.push_str("; HttpOnly");
        }
        if self.options.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.options.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        out
    }
}

/// Ordered name/value pairs carried by the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    entries: Vec<(String, String)>,
}

impl CookieSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one `Cookie` header. Malformed segments are skipped; for
    /// duplicate names the first occurrence wins.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut set = Self::new();
        set.extend_from_header(header);
        set
    }

    /// Parses every `Cookie` header of a request (HTTP/2 clients may send several).
    #[must_use]
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::new();
        for header in headers {
            set.extend_from_header(header);
        }
        set
    }

    fn extend_from_header(&mut self, header: &str) {
        for cookie in header.split(';') {
            let Some((name, value)) = cookie.trim().split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() || self.contains(name) {
                continue;
            }
            self.entries.push((name.to_string(), value.trim().to_string()));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Replaces the value in place, or appends a new entry.
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    /// Mirrors an outbound write onto the request side.
    pub fn apply(&mut self, cookie: &SessionCookie) {
        if cookie.is_removal() {
            self.remove(&cookie.name);
        } else {
            self.set(&cookie.name, &cookie.value);
        }
    }

    /// Renders the set back into a `Cookie` header value.
    #[must_use]
    pub fn to_header_value(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(
            self.entries
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Indices of `name.N` chunks present in the set, ascending.
    #[must_use]
    pub fn chunk_indices(&self, name: &str) -> Vec<usize> {
        let prefix = format!("{name}.");
        let mut indices: Vec<usize> = self
            .entries
            .iter()
            .filter_map(|(n, _)| n.strip_prefix(&prefix)?.parse().ok())
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Reads a possibly chunked value. The unchunked cookie wins when
    /// present; otherwise chunks are joined from `.0` up to the first gap.
    #[must_use]
    pub fn chunked_value(&self, name: &str) -> Option<String> {
        if let Some(value) = self.get(name) {
            return Some(value.to_string());
        }

        let mut joined = String::new();
        let mut index = 0;
        while let Some(part) = self.get(&format!("{name}.{index}")) {
            joined.push_str(part);
            index += 1;
        }

        if index == 0 { None } else { Some(joined) }
    }
}

/// Builds the writes that store `value` under `name`, splitting it when it
/// exceeds [`MAX_CHUNK_SIZE`] and expiring leftovers from an earlier layout.
#[must_use]
pub fn chunk_cookies(
    name: &str,
    value: &str,
    options: &CookieOptions,
    existing: &CookieSet,
) -> Vec<SessionCookie> {
    let parts = split_value(value, MAX_CHUNK_SIZE);
    let mut writes = Vec::new();

    if parts.len() <= 1 {
        writes.push(SessionCookie::new(name, value, options.clone()));
        for index in existing.chunk_indices(name) {
            writes.push(SessionCookie::removal(format!("{name}.{index}"), options));
        }
        return writes;
    }

    for (index, part) in parts.iter().enumerate() {
        writes.push(SessionCookie::new(
            format!("{name}.{index}"),
            *part,
            options.clone(),
        ));
    }
    if existing.contains(name) {
        writes.push(SessionCookie::removal(name, options));
    }
    for index in existing.chunk_indices(name) {
        if index >= parts.len() {
            writes.push(SessionCookie::removal(format!("{name}.{index}"), options));
        }
    }
    writes
}

/// Expires `name` and every chunk of it present on the request.
#[must_use]
pub fn clear_chunked(name: &str, options: &CookieOptions, existing: &CookieSet) -> Vec<SessionCookie> {
    let mut writes = Vec::new();
    if existing.contains(name) {
        writes.push(SessionCookie::removal(name, options));
    }
    for index in existing.chunk_indices(name) {
        writes.push(SessionCookie::removal(format!("{name}.{index}"), options));
    }
    writes
}

fn split_value(value: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = value;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        parts.push(head);
        rest = tail;
    }
    parts.push(rest);
    parts
}
