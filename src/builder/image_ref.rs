//! `repository[:tag]` image reference handling.

use crate::env::image::DEFAULT_TAG;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Split `reference` into repository and tag. Never fails.
    ///
    /// The part after the last `:` is the tag unless it contains a `/`, in
    /// which case the colon belonged to a registry port (`host:5000/name`)
    /// and the tag defaults to `latest`.
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => Self::new(repository, tag),
            _ => Self::new(reference, DEFAULT_TAG),
        }
    }

    /// Append `:latest` to references without any `:`.
    pub fn normalize(reference: &str) -> String {
        if reference.contains(':') {
            reference.to_string()
        } else {
            format!("{}:{}", reference, DEFAULT_TAG)
        }
    }
}

impl FromStr for ImageReference {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(reference: &str) -> (String, String) {
        let parsed = ImageReference::parse(reference);
        (parsed.repository, parsed.tag)
    }

    #[test]
    fn test_parse_bare_name() {
        assert_eq!(parts("x"), ("x".into(), "latest".into()));
    }

    #[test]
    fn test_parse_name_and_tag() {
        assert_eq!(parts("x:1.0"), ("x".into(), "1.0".into()));
    }

    #[test]
    fn test_parse_registry_port_without_tag() {
        assert_eq!(parts("host:5000/x"), ("host:5000/x".into(), "latest".into()));
    }

    #[test]
    fn test_parse_registry_port_with_tag() {
        assert_eq!(parts("host:5000/x:1.0"), ("host:5000/x".into(), "1.0".into()));
    }

    #[test]
    fn test_parse_nested_repository() {
        assert_eq!(
            parts("registry.example.com:5000/team/app:v12"),
            ("registry.example.com:5000/team/app".into(), "v12".into())
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(ImageReference::normalize("myapp"), "myapp:latest");
        assert_eq!(ImageReference::normalize("myapp:v2"), "myapp:v2");
        assert_eq!(ImageReference::normalize("host:5000/myapp"), "host:5000/myapp");
    }

    #[test]
    fn test_display_round_trip() {
        let reference: ImageReference = "host:5000/x".parse().unwrap();
        assert_eq!(reference.to_string(), "host:5000/x:latest");
    }
}
