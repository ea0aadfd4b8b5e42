//! Image name parsing.

use std::fmt;

/// An image name split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    /// Repository, including any registry host.
    pub repository: String,
    /// Tag.
    pub tag: String,
}

impl ImageName {
    /// Default tag.
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Split an image name into repository and tag.
    ///
    /// Examples:
    /// - `web` -> (`web`, `latest`)
    /// - `web:dev` -> (`web`, `dev`)
    /// - `localhost:5000/web` -> (`localhost:5000/web`, `latest`)
    /// - `reg.example.com/team/web:1.0` -> (`reg.example.com/team/web`, `1.0`)
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let name = name.trim();

        if let Some(idx) = name.rfind(':') {
            // A colon followed by a slash belongs to a registry port.
            let potential_tag = &name[idx + 1..];
            if !potential_tag.contains('/') && !potential_tag.is_empty() {
                return Self {
                    repository: name[..idx].to_string(),
                    tag: potential_tag.to_string(),
                };
            }
        }

        Self {
            repository: name.to_string(),
            tag: Self::DEFAULT_TAG.to_string(),
        }
    }

    /// Reference under `registry` with an explicit tag.
    #[must_use]
    pub fn qualified(&self, registry: &str, tag: &str) -> String {
        format!("{}:{}", self.qualified_repository(registry), tag)
    }

    /// Repository under `registry`.
    #[must_use]
    pub fn qualified_repository(&self, registry: &str) -> String {
        format!("{}/{}", registry.trim_end_matches('/'), self.repository)
    }

    /// Same repository with a different tag.
    #[must_use]
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let name = ImageName::parse("web");
        assert_eq!(name.repository, "web");
        assert_eq!(name.tag, "latest");
    }

    #[test]
    fn parse_with_tag() {
        let name = ImageName::parse("web:dev");
        assert_eq!(name.repository, "web");
        assert_eq!(name.tag, "dev");
    }

    #[test]
    fn parse_registry_port() {
        let name = ImageName::parse("localhost:5000/team/web");
        assert_eq!(name.repository, "localhost:5000/team/web");
        assert_eq!(name.tag, "latest");

        let name = ImageName::parse("localhost:5000/team/web:1.0");
        assert_eq!(name.repository, "localhost:5000/team/web");
        assert_eq!(name.tag, "1.0");
    }

    #[test]
    fn qualified_trims_registry_slash() {
        let name = ImageName::parse("team/web:dev");
        assert_eq!(
            name.qualified("reg.example.com/", "1.0"),
            "reg.example.com/team/web:1.0"
        );
        assert_eq!(name.with_tag("2.0"), "team/web:2.0");
        assert_eq!(name.to_string(), "team/web:dev");
    }
}
