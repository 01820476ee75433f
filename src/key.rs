use std::{
    fmt,
    str::FromStr,
};

/// The kinds of cluster resources that can request a DNS name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Service,
    Ingress,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Ingress => "ingress",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed key {0:?}: expected <kind>/<namespace>/<name>")]
    Malformed(String),
    #[error("unknown resource kind {kind:?} in key {key:?}")]
    UnknownKind { kind: String, key: String },
}

/// Identifies one reconciliation unit. Serialized as `<kind>/<namespace>/<name>`, which is also the content of the TXT
/// ownership marker written next to every A record this controller manages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ReconcileKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Service, namespace, name)
    }

    pub fn ingress(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Ingress, namespace, name)
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for ReconcileKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(kind), Some(namespace), Some(name), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyError::Malformed(s.to_string()));
        };

        if namespace.is_empty() || name.is_empty() {
            return Err(KeyError::Malformed(s.to_string()));
        }

        let kind = match kind {
            "service" => ResourceKind::Service,
            "ingress" => ResourceKind::Ingress,
            other => {
                return Err(KeyError::UnknownKind {
                    kind: other.to_string(),
                    key: s.to_string(),
                })
            }
        };

        Ok(ReconcileKey::new(kind, namespace, name))
    }
}
