//! Locally registered and remotely discovered service descriptions.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Where a host or service stands in its multicast lifecycle.
///
/// Advancement is monotonic; `revert` on a name conflict is the single
/// allowed step backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Lifecycle {
    #[default]
    Probing1,
    Probing2,
    Probing3,
    Announcing1,
    Announcing2,
    Announced,
    Canceled,
}

impl Lifecycle {
    pub fn advance(self) -> Self {
        match self {
            Self::Probing1 => Self::Probing2,
            Self::Probing2 => Self::Probing3,
            Self::Probing3 => Self::Announcing1,
            Self::Announcing1 => Self::Announcing2,
            Self::Announcing2 => Self::Announced,
            Self::Announced => Self::Announced,
            Self::Canceled => Self::Canceled,
        }
    }

    /// One step back, floored at the start of probing. Cancellation is
    /// final.
    pub fn revert(self) -> Self {
        match self {
            Self::Probing1 | Self::Probing2 => Self::Probing1,
            Self::Probing3 => Self::Probing2,
            Self::Announcing1 => Self::Probing3,
            Self::Announcing2 => Self::Announcing1,
            Self::Announced => Self::Announcing2,
            Self::Canceled => Self::Canceled,
        }
    }

    pub fn is_probing(self) -> bool {
        matches!(self, Self::Probing1 | Self::Probing2 | Self::Probing3)
    }

    pub fn is_announcing(self) -> bool {
        matches!(self, Self::Announcing1 | Self::Announcing2)
    }

    pub fn is_announced(self) -> bool {
        self == Self::Announced
    }

    pub fn is_canceled(self) -> bool {
        self == Self::Canceled
    }
}

/// A service: either one we publish, or one assembled from cached records.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    /// e.g. `_http._tcp.local`
    pub service_type: String,
    /// Unqualified instance label, e.g. `My Web Server`
    pub instance: String,
    /// SRV target host; empty on registration means "this responder's host"
    pub server: String,
    pub port: u16,
    pub weight: u16,
    pub priority: u16,
    pub addresses_v4: Vec<Ipv4Addr>,
    pub addresses_v6: Vec<Ipv6Addr>,
    /// Raw TXT rdata: length-prefixed key[=value] strings
    pub txt: Vec<u8>,
    pub state: Lifecycle,
}

impl ServiceInfo {
    pub fn new(service_type: &str, instance: &str, port: u16) -> Self {
        Self {
            service_type: service_type.trim_end_matches('.').to_string(),
            instance: instance.to_string(),
            port,
            ..Self::default()
        }
    }

    pub fn with_server(mut self, server: &str) -> Self {
        self.server = server.trim_end_matches('.').to_string();
        self
    }

    pub fn with_properties(mut self, props: &[(&str, Option<&[u8]>)]) -> Self {
        self.txt = encode_properties(props);
        self
    }

    /// `instance.type`, the name SRV and TXT records live under.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.instance, self.service_type)
    }

    /// Whether resolution has produced enough to hand to a caller:
    /// SRV target, TXT payload, and at least one address.
    pub fn has_data(&self) -> bool {
        !self.server.is_empty()
            && !self.txt.is_empty()
            && (!self.addresses_v4.is_empty() || !self.addresses_v6.is_empty())
    }

    /// Decoded TXT properties in record order. A key without `=` maps to
    /// `None`, `key=` to `Some("")`.
    pub fn properties(&self) -> Vec<(String, Option<Vec<u8>>)> {
        let mut props = Vec::new();
        let mut pos = 0;
        while pos < self.txt.len() {
            let len = self.txt[pos] as usize;
            pos += 1;
            if len == 0 || pos + len > self.txt.len() {
                break;
            }
            let entry = &self.txt[pos..pos + len];
            pos += len;
            match entry.iter().position(|&b| b == b'=') {
                Some(eq) => props.push((
                    String::from_utf8_lossy(&entry[..eq]).into_owned(),
                    Some(entry[eq + 1..].to_vec()),
                )),
                None => props.push((String::from_utf8_lossy(entry).into_owned(), None)),
            }
        }
        props
    }

    pub fn property(&self, key: &str) -> Option<Vec<u8>> {
        self.properties()
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v)
    }
}

impl fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}:{}", self.qualified_name(), self.server, self.port)
    }
}

/// Build TXT rdata from key/value properties (RFC 6763 §6). An empty list
/// yields the single mandatory zero byte.
pub fn encode_properties(props: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    if props.is_empty() {
        return vec![0];
    }
    let mut out = Vec::new();
    for (key, value) in props {
        let mut entry = key.as_bytes().to_vec();
        if let Some(value) = value {
            entry.push(b'=');
            entry.extend_from_slice(value);
        }
        entry.truncate(255);
        out.push(entry.len() as u8);
        out.extend_from_slice(&entry);
    }
    out
}

/// Next candidate after a name conflict: `"foo" → "foo (2)" → "foo (3)"`.
pub fn increment_name(name: &str) -> String {
    if let Some(stripped) = name.strip_suffix(')') {
        if let Some((head, n)) = stripped.rsplit_once(" (") {
            if let Ok(n) = n.parse::<u32>() {
                return format!("{} ({})", head, n + 1);
            }
        }
    }
    format!("{} (2)", name)
}

/// Host-name variant: counters go on the first label, `host.local` →
/// `host-2.local`.
pub fn increment_host_name(name: &str) -> String {
    let (label, rest) = name.split_once('.').unwrap_or((name, ""));
    let next = match label.rsplit_once('-') {
        Some((head, n)) => match n.parse::<u32>() {
            Ok(n) => format!("{}-{}", head, n + 1),
            Err(_) => format!("{}-2", label),
        },
        None => format!("{}-2", label),
    };
    if rest.is_empty() {
        next
    } else {
        format!("{}.{}", next, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_sequence() {
        let mut state = Lifecycle::default();
        let mut seen = vec![state];
        while !state.is_announced() {
            state = state.advance();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                Lifecycle::Probing1,
                Lifecycle::Probing2,
                Lifecycle::Probing3,
                Lifecycle::Announcing1,
                Lifecycle::Announcing2,
                Lifecycle::Announced,
            ]
        );
    }

    #[test]
    fn test_revert_single_step_with_floor() {
        assert_eq!(Lifecycle::Announced.revert(), Lifecycle::Announcing2);
        assert_eq!(Lifecycle::Announcing1.revert(), Lifecycle::Probing3);
        assert_eq!(Lifecycle::Probing1.revert(), Lifecycle::Probing1);
        assert_eq!(Lifecycle::Canceled.revert(), Lifecycle::Canceled);
    }

    #[test]
    fn test_increment_name() {
        assert_eq!(increment_name("printer"), "printer (2)");
        assert_eq!(increment_name("printer (2)"), "printer (3)");
        assert_eq!(increment_name("printer (9)"), "printer (10)");
        // A parenthesis that is not a counter is left intact
        assert_eq!(increment_name("printer (color)"), "printer (color) (2)");
    }

    #[test]
    fn test_increment_host_name() {
        assert_eq!(increment_host_name("host.local"), "host-2.local");
        assert_eq!(increment_host_name("host-2.local"), "host-3.local");
        assert_eq!(increment_host_name("my-box.local"), "my-box-2.local");
    }

    #[test]
    fn test_txt_properties_roundtrip() {
        let info = ServiceInfo::new("_http._tcp.local", "web", 80).with_properties(&[
            ("path", Some(b"/index.html".as_slice())),
            ("secure", None),
            ("note", Some(b"".as_slice())),
        ]);
        let props = info.properties();
        assert_eq!(props[0], ("path".into(), Some(b"/index.html".to_vec())));
        assert_eq!(props[1], ("secure".into(), None));
        assert_eq!(props[2], ("note".into(), Some(vec![])));
        assert_eq!(info.property("PATH"), Some(b"/index.html".to_vec()));
        assert_eq!(info.property("missing"), None);
    }

    #[test]
    fn test_empty_txt_is_single_zero_byte() {
        assert_eq!(encode_properties(&[]), vec![0]);
    }

    #[test]
    fn test_qualified_name() {
        let info = ServiceInfo::new("_ipp._tcp.local.", "My Printer", 631);
        assert_eq!(info.qualified_name(), "My Printer._ipp._tcp.local");
    }
}
