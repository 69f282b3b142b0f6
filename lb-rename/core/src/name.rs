use std::fmt;

/// Separates the fields of an encoded name.
pub const SEPARATOR: char = '_';

/// The external API caps names and tags at this many bytes. A value that
/// reaches the cap may have been cut short, so it is never decoded.
pub const MAX_NAME_LEN: usize = 255;

pub const DEFAULT_SERVICE_PREFIX: &str = "kube_service_";
pub const DEFAULT_LISTENER_PREFIX: &str = "listener_";
pub const DEFAULT_POOL_PREFIX: &str = "pool_";
pub const DEFAULT_MONITOR_PREFIX: &str = "monitor_";

/// The kinds of resource in a load balancer tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    LoadBalancer,
    Listener,
    Pool,
    Monitor,
}

/// The cluster identity, namespace and name encoded in a resource name or tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructuredName {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

/// The literal prefixes that mark resources as managed.
///
/// Load balancer names start with the service prefix directly. Listeners,
/// pools and monitors carry their own kind prefix followed by a numeric
/// index and then the service prefix, e.g.
/// `listener_0_kube_service_<cluster>_<namespace>_<name>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefixes {
    pub service: String,
    pub listener: String,
    pub pool: String,
    pub monitor: String,
}

/// The fragment expected in front of the service prefix.
#[derive(Copy, Clone, Debug)]
enum Lead<'a> {
    /// Nothing; used for load balancer names and tags.
    Bare,

    /// A kind prefix, a run of ASCII digits, and a separator.
    Indexed(&'a str),
}

/// Replaces the first occurrence of `old` in `original` with `target`.
///
/// This is a substring replacement rather than a re-encode: the cluster
/// identity may itself contain separators, so it cannot be rebuilt from the
/// decoded fields.
pub fn rewrite(old: &str, target: &str, original: &str) -> String {
    original.replacen(old, target, 1)
}

/// Returns true iff `raw` starts with `prefix`.
pub fn is_managed(raw: &str, prefix: &str) -> bool {
    raw.starts_with(prefix)
}

// === impl Kind ===

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadBalancer => "loadbalancer".fmt(f),
            Self::Listener => "listener".fmt(f),
            Self::Pool => "pool".fmt(f),
            Self::Monitor => "healthmonitor".fmt(f),
        }
    }
}

// === impl StructuredName ===

impl StructuredName {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StructuredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.cluster, self.namespace, self.name
        )
    }
}

// === impl Prefixes ===

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE_PREFIX.to_string(),
            listener: DEFAULT_LISTENER_PREFIX.to_string(),
            pool: DEFAULT_POOL_PREFIX.to_string(),
            monitor: DEFAULT_MONITOR_PREFIX.to_string(),
        }
    }
}

impl Prefixes {
    /// The literal a name of the given kind must start with to be managed.
    pub fn for_kind(&self, kind: Kind) -> &str {
        match kind {
            Kind::LoadBalancer => &self.service,
            Kind::Listener => &self.listener,
            Kind::Pool => &self.pool,
            Kind::Monitor => &self.monitor,
        }
    }

    pub fn is_managed(&self, kind: Kind, raw: &str) -> bool {
        is_managed(raw, self.for_kind(kind))
    }

    /// Decodes the name of a resource of the given kind.
    pub fn decompose(&self, kind: Kind, raw: &str) -> Option<StructuredName> {
        let lead = match kind {
            Kind::LoadBalancer => Lead::Bare,
            _ => Lead::Indexed(self.for_kind(kind)),
        };
        decompose(lead, &self.service, raw)
    }

    /// Decodes a free-form tag. Tags carry no kind prefix.
    pub fn decompose_tag(&self, raw: &str) -> Option<StructuredName> {
        decompose(Lead::Bare, &self.service, raw)
    }

    /// Encodes a resource name. `index` disambiguates listeners, pools and
    /// monitors that share a load balancer and is ignored for load balancers.
    pub fn compose(&self, kind: Kind, index: usize, name: &StructuredName) -> String {
        match kind {
            Kind::LoadBalancer => format!("{}{name}", self.service),
            _ => format!(
                "{}{index}{SEPARATOR}{}{name}",
                self.for_kind(kind),
                self.service
            ),
        }
    }

    /// Returns true if the load balancer name is managed and carries a
    /// cluster identity other than `cluster`.
    pub fn has_stale_cluster(&self, lb_name: &str, cluster: &str) -> bool {
        if !self.is_managed(Kind::LoadBalancer, lb_name) {
            return false;
        }
        match self.decompose(Kind::LoadBalancer, lb_name) {
            Some(decoded) => decoded.cluster != cluster,
            None => false,
        }
    }
}

// === impl Lead ===

impl Lead<'_> {
    fn strip<'s>(&self, s: &'s str) -> Option<&'s str> {
        match self {
            Self::Bare => Some(s),
            Self::Indexed(prefix) => {
                let rest = s.strip_prefix(*prefix)?;
                let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
                if digits == 0 {
                    return None;
                }
                rest[digits..].strip_prefix(SEPARATOR)
            }
        }
    }
}

/// Finds the leftmost position in `raw` at which `lead`, `service` and the
/// three encoded fields match.
fn decompose(lead: Lead<'_>, service: &str, raw: &str) -> Option<StructuredName> {
    if raw.len() >= MAX_NAME_LEN {
        tracing::debug!(len = raw.len(), %raw, "Not decoding possibly truncated name");
        return None;
    }

    raw.char_indices().find_map(|(start, _)| {
        let rest = lead.strip(&raw[start..])?;
        let rest = rest.strip_prefix(service)?;
        split_fields(rest)
    })
}

/// Splits `<cluster>_<namespace>_<name>`, taking the longest possible cluster
/// identity. The namespace and name are single non-separator tokens; anything
/// following the name is ignored.
fn split_fields(s: &str) -> Option<StructuredName> {
    s.match_indices(SEPARATOR).rev().find_map(|(at, _)| {
        let cluster = &s[..at];
        if cluster.is_empty() || cluster.contains('\n') {
            return None;
        }

        let (namespace, tail) = s[at + 1..].split_once(SEPARATOR)?;
        let name = tail.split(SEPARATOR).next().unwrap_or_default();
        if namespace.is_empty() || name.is_empty() {
            return None;
        }

        Some(StructuredName::new(cluster, namespace, name))
    })
}
