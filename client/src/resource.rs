use std::fmt;

use url::Url;

use crate::error::ClientError;

const SEP: char = '/';

/// Endpoint address built from the configured API base.
#[derive(Clone, Debug)]
pub struct Resource {
    url: Url,
}

impl Resource {
    #[must_use]
    pub fn new(uri: &str) -> Option<Resource> {
        Url::parse(uri).ok().map(|url| Resource { url })
    }

    /// Same as [`Resource::new`] but reports the offending URI.
    pub fn parse(uri: &str) -> Result<Resource, ClientError> {
        Resource::new(uri).ok_or_else(|| ClientError::InvalidUrl(uri.to_owned()))
    }

    /// Appends `path` below the current one. A trailing `/` in `path` is kept.
    pub fn append_path(&mut self, path: &str) -> &mut Self {
        let Some(current) = self.url.path_segments() else {
            if let Ok(joined) = self.url.join(path) {
                self.url = joined;
            }
            return self;
        };
        let mut joined = current
            .chain(path.split(SEP))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        if path.ends_with(SEP) {
            joined.push(SEP);
        }
        self.url.set_path(&joined);
        self
    }

    /// Appends a single path segment, escaping anything that is not URL safe.
    pub fn append_segment(&mut self, segment: &str) -> &mut Self {
        let escaped = urlencoding::encode(segment);
        self.append_path(&escaped)
    }

    pub fn append_query(&mut self, key: &str, value: &str) -> &mut Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
