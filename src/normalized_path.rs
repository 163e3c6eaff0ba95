use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::ops::Deref;
use thiserror::Error;

pub(crate) const ENC: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("path is not valid utf-8")]
    Encoding,
    #[error("path escapes the root: {0}")]
    Traversal(String),
}

/// A virtual path in the unified namespace.
///
/// Always starts with `/`, never contains empty segments and keeps a trailing
/// `/` when it names a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn root() -> Self {
        NormalizedPath("/".into())
    }

    /// Builds a path from a raw (percent encoded) request path.
    pub fn parse(raw: &str) -> Result<NormalizedPath, PathError> {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| PathError::Encoding)?;
        NormalizedPath::from_decoded(&decoded)
    }

    pub fn from_decoded(path: &str) -> Result<NormalizedPath, PathError> {
        let col = path.ends_with('/');
        let mut segments = vec![];
        for s in path.split('/') {
            match s {
                "" | "." => continue,
                ".." => return Err(PathError::Traversal(path.to_owned())),
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Ok(NormalizedPath::root());
        }
        let mut p = format!("/{}", segments.join("/"));
        if col {
            p.push('/');
        }
        Ok(NormalizedPath(p))
    }

    pub fn is_collection(&self) -> bool {
        self.0.ends_with('/')
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_dir(&self) -> NormalizedPath {
        if self.is_collection() {
            self.clone()
        } else {
            NormalizedPath(format!("{}/", self.0))
        }
    }

    pub fn as_file(&self) -> NormalizedPath {
        if self.is_root() {
            return self.clone();
        }
        NormalizedPath(self.0.trim_end_matches('/').to_owned())
    }

    /// Last segment, empty for the root.
    pub fn name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    pub fn parent(&self) -> NormalizedPath {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) | None => NormalizedPath::root(),
            Some(i) => NormalizedPath(format!("{}/", &trimmed[..i])),
        }
    }

    pub fn join_file(&self, token: &str) -> NormalizedPath {
        let token = token.trim_matches('/');
        if token.is_empty() {
            return self.clone();
        }
        NormalizedPath(format!("{}{}", self.as_dir().0, token))
    }

    pub fn join_dir(&self, token: &str) -> NormalizedPath {
        let token = token.trim_matches('/');
        if token.is_empty() {
            return self.as_dir();
        }
        NormalizedPath(format!("{}{}/", self.as_dir().0, token))
    }

    /// Percent encoded href below `prefix`.
    pub fn to_href(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        format!("{}{}", prefix, utf8_percent_encode(&self.0, ENC))
    }
}

impl Deref for NormalizedPath {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
