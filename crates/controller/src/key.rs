//! Object keys used as work queue items.
//!
//! Keys use the `namespace/name` form (just `name` for cluster-scoped
//! objects), matching how Kubernetes tooling addresses objects.

use std::fmt;
use std::str::FromStr;

use kube::{Resource, ResourceExt};

use crate::error::{Error, Result};

/// Identity of a watched object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the key for an object from its metadata.
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey)?;
        Ok(Self {
            namespace: obj.namespace().unwrap_or_default(),
            name,
        })
    }

    /// Parse a queue key, rejecting anything that is not `name` or
    /// `namespace/name`.
    pub fn parse(key: &str) -> Result<Self> {
        let malformed = |reason| Error::KeyMalformed {
            key: key.to_string(),
            reason,
        };

        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("", name),
            (Some(namespace), Some(name), None) => {
                if namespace.is_empty() {
                    return Err(malformed("empty namespace"));
                }
                (namespace, name)
            }
            _ => return Err(malformed("unexpected key format")),
        };

        if name.is_empty() {
            return Err(malformed("empty name"));
        }

        Ok(Self::new(namespace, name))
    }

    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
