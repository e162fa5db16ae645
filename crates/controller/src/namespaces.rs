//! Namespace exemption policy.

use std::collections::BTreeSet;

/// Namespaces that are never checked by default (cluster and managed-platform
/// system namespaces).
pub const DEFAULT_EXEMPT_NAMESPACES: &[&str] = &["kube-system", "gmp-system", "gmp-public", "gke-mcs"];

/// Decides which namespaces are subject to the resource policy.
///
/// A namespace is exempt when it is on the deny list, or when an allow list is
/// configured and the namespace is not on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePolicy {
    exempt: BTreeSet<String>,
    include: BTreeSet<String>,
}

impl NamespacePolicy {
    pub fn new<E, I, S, T>(exempt: E, include: I) -> Self
    where
        E: IntoIterator<Item = S>,
        I: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            exempt: exempt.into_iter().map(Into::into).collect(),
            include: include.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_exempt(&self, namespace: &str) -> bool {
        if self.exempt.contains(namespace) {
            return true;
        }
        !self.include.is_empty() && !self.include.contains(namespace)
    }
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPT_NAMESPACES.iter().copied(), Vec::<String>::new())
    }
}
