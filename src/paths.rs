//! Workspace-relative path <-> `file://` URI translation.
//!
//! Inside the client everything is a workspace-relative path; on the
//! wire everything is an absolute file URI. Symbols that resolve into
//! module dependencies live outside the workspace root, so a URI that
//! does not sit under the root comes back as an absolute path rather
//! than an error. Non-`file` schemes pass through untouched.

use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Bytes escaped inside the path component of a file URI. Everything
/// RFC 3986 keeps out of a path segment, except `/` which separates
/// the segments we are encoding around.
const URI_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Translator bound to one workspace root (an absolute directory path).
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
    root_str: String,
    root_uri: String,
}

impl WorkspacePaths {
    pub fn new(root: &Path) -> Self {
        let root_str = root.to_string_lossy().into_owned();
        let root_uri = format!("file://{}", utf8_percent_encode(&root_str, URI_PATH));
        Self {
            root: root.to_path_buf(),
            root_str,
            root_uri,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The workspace root as a file URI, e.g. `file:///home/u/proj`.
    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    /// Absolute on-disk location of a workspace-relative path.
    pub fn join(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// `file://<root>/<relative>`, percent-encoded.
    pub fn to_uri(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.root_uri,
            utf8_percent_encode(relative, URI_PATH)
        )
    }

    /// Translate a URI coming back from gopls into a workspace-relative
    /// path. URIs outside the root become absolute paths; non-`file`
    /// schemes are returned verbatim.
    pub fn to_relative(&self, uri: &str) -> String {
        let Some(raw) = uri.strip_prefix("file://") else {
            return uri.to_string();
        };
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_or_else(|_| raw.to_string(), |cow| cow.into_owned());

        match decoded.strip_prefix(&self.root_str) {
            // Require a separator after the root so /ws/app2 does not
            // match a root of /ws/app.
            Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
            Some("") => String::new(),
            _ => decoded,
        }
    }
}
