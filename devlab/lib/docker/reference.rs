use std::{
    fmt::{self, Display},
    sync::LazyLock,
};

use regex::Regex;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static HOST_LABEL_DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[^A-Z\d-]").unwrap());

static PORT_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{2,5}$").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A docker image string broken into its parts.
///
/// The first path segment is only treated as a registry host when it carries a port and
/// parses as a hostname, which matches how the engine CLIs disambiguate `host:port/name`
/// from `name:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Custom registry host, `None` for the default registry.
    pub host: Option<String>,

    /// The image name with host and tag stripped off.
    pub bare_image: String,

    /// The image tag, defaulted to `latest`.
    pub tag: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageRef {
    /// Parses an image string such as `registry.example.com:5000/team/app:1.2`.
    pub fn parse(image: &str) -> Self {
        let mut host = None;
        let mut bare_image = image.to_string();

        let segments: Vec<&str> = image.split('/').collect();
        let host_check = segments[0];
        if host_check.contains(':') && segments.len() > 1 {
            let host_no_port = match host_check.split_once(':') {
                Some((name, port)) if PORT_DIGITS.is_match(port) => name,
                _ => host_check,
            };
            if is_valid_hostname(host_no_port) {
                host = Some(host_check.to_string());
                bare_image = segments[1..].join("/");
            }
        }

        let (bare_image, tag) = match bare_image.split_once(':') {
            Some((name, tag)) => (name.to_string(), tag.to_string()),
            None => (bare_image, "latest".to_string()),
        };

        Self {
            host,
            bare_image,
            tag,
        }
    }

    /// Returns `bare_image:tag`, without any registry host.
    pub fn name_and_tag(&self) -> String {
        format!("{}:{}", self.bare_image, self.tag)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true when `hostname` is a syntactically valid host name.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.len() > 255 {
        return false;
    }
    if hostname == "localhost" {
        return true;
    }

    // A single trailing dot is legal.
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);

    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && !HOST_LABEL_DISALLOWED.is_match(label)
    })
}

/// Takes a docker publish string and renders the host-local side with its protocol, e.g.
/// `8080:80` becomes `8080(tcp)`.
pub fn parse_local_ports(publish: &str) -> String {
    let proto = match publish.split_once('/') {
        Some((_, proto)) => proto.to_string(),
        None => "tcp".to_string(),
    };
    let without_proto = publish.split('/').next().unwrap_or(publish);
    let segments: Vec<&str> = without_proto.split(':').collect();

    render_local_port(&segments, &proto)
}

fn render_local_port(segments: &[&str], proto: &str) -> String {
    let Some(first) = segments.first() else {
        return format!("({})", proto);
    };

    if first.parse::<u32>().is_ok() {
        return format!("{}({})", first, proto);
    }

    let range: Vec<&str> = first.split('-').collect();
    if range.len() == 2 {
        return format!("{}-{}({})", range[0], range[1], proto);
    }

    // First segment is an address, recurse into the rest.
    let tail = render_local_port(&segments[1..], proto);
    format!("{}({})", tail, proto)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}/{}:{}", host, self.bare_image, self.tag),
            None => write!(f, "{}:{}", self.bare_image, self.tag),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_image() {
        let parsed = ImageRef::parse("postgres");
        assert_eq!(parsed.host, None);
        assert_eq!(parsed.bare_image, "postgres");
        assert_eq!(parsed.tag, "latest");
    }

    #[test]
    fn test_parse_image_with_tag() {
        let parsed = ImageRef::parse("postgres:16.1");
        assert_eq!(parsed.bare_image, "postgres");
        assert_eq!(parsed.tag, "16.1");
    }

    #[test]
    fn test_parse_image_with_registry_host() {
        let parsed = ImageRef::parse("registry.example.com:5000/team/app:1.2");
        assert_eq!(parsed.host.as_deref(), Some("registry.example.com:5000"));
        assert_eq!(parsed.bare_image, "team/app");
        assert_eq!(parsed.tag, "1.2");
        assert_eq!(parsed.to_string(), "registry.example.com:5000/team/app:1.2");
    }

    #[test]
    fn test_parse_tag_is_not_mistaken_for_host() {
        // 'app:80' has no path separator, so the colon belongs to the tag.
        let parsed = ImageRef::parse("app:80");
        assert_eq!(parsed.host, None);
        assert_eq!(parsed.tag, "80");
    }

    #[test]
    fn test_hostname_validation() {
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("registry.example.com"));
        assert!(is_valid_hostname("trailing.dot."));
        assert!(!is_valid_hostname("-leading.hyphen"));
        assert!(!is_valid_hostname("under_score.example.com"));
    }

    #[test]
    fn test_parse_local_ports() {
        assert_eq!(parse_local_ports("8080:80"), "8080(tcp)");
        assert_eq!(parse_local_ports("5000-5010:5000-5010"), "5000-5010(tcp)");
        assert_eq!(parse_local_ports("53:53/udp"), "53(udp)");
        assert_eq!(
            parse_local_ports("127.0.0.1:8080:80"),
            "8080(tcp)(tcp)"
        );
    }
}
