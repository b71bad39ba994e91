//! Request URI construction relative to a context's root.

use url::Url;

/// Builds a request URI by transforming the context's root URL.
///
/// Path segments are percent-encoded individually, so values containing
/// slashes or spaces cannot break out of their segment.
#[derive(Debug, Clone)]
pub struct UriBuilder {
    url: Url,
}

impl UriBuilder {
    pub(crate) fn new(root: Url) -> Self {
        UriBuilder { url: root }
    }

    /// Append a single path segment.
    pub fn path_segment(mut self, segment: &str) -> Self {
        if let Ok(mut segments) = self.url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(name, value);
        self
    }

    pub(crate) fn build(self) -> Url {
        self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Url {
        Url::parse("https://api.example.com").unwrap()
    }

    #[test]
    fn test_path_segments_are_appended() {
        let url = UriBuilder::new(root())
            .path_segment("v2")
            .path_segment("organizations")
            .build();
        assert_eq!(url.as_str(), "https://api.example.com/v2/organizations");
    }

    #[test]
    fn test_path_segments_are_encoded() {
        let url = UriBuilder::new(root())
            .path_segment("v3")
            .path_segment("apps")
            .path_segment("my app/odd")
            .build();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v3/apps/my%20app%2Fodd"
        );
    }

    #[test]
    fn test_query_parameters() {
        let url = UriBuilder::new(root())
            .path_segment("v2")
            .path_segment("spaces")
            .query("q", "name:development")
            .query("page", "2")
            .build();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/spaces?q=name%3Adevelopment&page=2"
        );
    }

    #[test]
    fn test_root_with_existing_path_is_extended() {
        let root = Url::parse("https://uaa.example.com/uaa").unwrap();
        let url = UriBuilder::new(root).path_segment("oauth").path_segment("token").build();
        assert_eq!(url.as_str(), "https://uaa.example.com/uaa/oauth/token");
    }
}
