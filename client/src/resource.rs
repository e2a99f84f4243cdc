use core::fmt;
use url::Url;

const SEP: char = '/';

/// Builder of request URLs relative to the server base address.
#[derive(Clone)]
pub struct Resource {
    url: Url,
}

impl Resource {
    #[must_use]
    pub fn new(uri: &str) -> Option<Resource> {
        let url = Url::parse(uri).ok()?;
        Some(Resource { url })
    }

    /// Appends `/` separated segments, keeping a trailing slash of `path`.
    pub fn append_path(&mut self, path: &str) -> &mut Self {
        let Some(existing) = self.url.path_segments() else {
            if let Ok(u) = self.url.join(path) {
                self.url = u;
            }
            return self;
        };
        let mut joined = existing
            .chain(path.split(SEP))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        if path.ends_with(SEP) {
            joined.push(SEP);
        }
        self.url.set_path(&joined);
        self
    }

    /// Appends `segment` as one path segment, percent-encoding any `/` inside it.
    pub fn append_encoded(&mut self, segment: &str) -> &mut Self {
        if let Ok(mut segments) = self.url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        self
    }

    pub fn query(&mut self, key: &str, value: &str) -> &mut Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn new_correct_some() {
        // Arrange

        // Act
        let r = Resource::new("http://localhost:3000");

        // Assert
        assert!(r.is_some());
    }

    #[test]
    fn new_incorrect_none() {
        // Arrange

        // Act
        let r = Resource::new("localhost/3000");

        // Assert
        assert!(r.is_none());
    }

    #[rstest]
    #[case("http://localhost", "x", "http://localhost/x")]
    #[case("http://localhost", "/x", "http://localhost/x")]
    #[case("http://localhost", "/x/", "http://localhost/x/")]
    #[case("http://localhost", "x/", "http://localhost/x/")]
    #[case("http://localhost/", "x/y", "http://localhost/x/y")]
    #[case("http://localhost/", "/x/y/", "http://localhost/x/y/")]
    #[case("http://localhost/x", "/y", "http://localhost/x/y")]
    #[case("http://localhost/x/", "y", "http://localhost/x/y")]
    #[case("http://localhost/x/", "/y/", "http://localhost/x/y/")]
    #[case("http://localhost:3000", "api/images", "http://localhost:3000/api/images")]
    #[case("https://img.example.com/service/", "api/stats", "https://img.example.com/service/api/stats")]
    #[trace]
    fn append_path_cases(#[case] base: &str, #[case] path: &str, #[case] expected: &str) {
        // Arrange
        let mut r = Resource::new(base).unwrap();

        // Act
        r.append_path(path);

        // Assert
        assert_eq!(r.to_string().as_str(), expected);
    }

    #[test]
    fn append_path_twice() {
        // Arrange
        let mut r = Resource::new("http://localhost").unwrap();

        // Act
        r.append_path("api").append_path("images");

        // Assert
        assert_eq!(r.to_string().as_str(), "http://localhost/api/images");
    }

    #[rstest]
    #[case("http://localhost", "blog/2026/03/1-abc.webp", "http://localhost/api/images/blog%2F2026%2F03%2F1-abc.webp")]
    #[case("http://localhost/", "a b.webp", "http://localhost/api/images/a%20b.webp")]
    #[trace]
    fn append_encoded_keeps_one_segment(#[case] base: &str, #[case] segment: &str, #[case] expected: &str) {
        // Arrange
        let mut r = Resource::new(base).unwrap();
        r.append_path("api/images");

        // Act
        r.append_encoded(segment);

        // Assert
        assert_eq!(r.to_string().as_str(), expected);
    }

    #[test]
    fn query_pairs_are_appended_in_order() {
        // Arrange
        let mut r = Resource::new("http://localhost").unwrap();
        r.append_path("api/images");

        // Act
        r.query("folder", "blog").query("page", "2");

        // Assert
        assert_eq!(
            r.to_string().as_str(),
            "http://localhost/api/images?folder=blog&page=2"
        );
    }
}
