//! Resource declaration policy.
//!
//! A container is non-compliant when its resource requests or its resource
//! limits are not declared at all. Declared-but-empty sets are compliant.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

use crate::key::ObjectKey;

/// Resource quantities keyed by resource name (`cpu`, `memory`, ...).
pub type ResourceList = BTreeMap<String, Quantity>;

/// The part of a container spec the policy looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub requests: Option<ResourceList>,
    pub limits: Option<ResourceList>,
}

impl ContainerSpec {
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.requests.is_some() && self.limits.is_some()
    }
}

impl From<&Container> for ContainerSpec {
    fn from(container: &Container) -> Self {
        let (requests, limits) = container
            .resources
            .as_ref()
            .map(|r| (r.requests.clone(), r.limits.clone()))
            .unwrap_or_default();
        Self {
            name: container.name.clone(),
            requests,
            limits,
        }
    }
}

/// Read-only snapshot of a watched workload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadObject {
    pub kind: String,
    pub key: ObjectKey,
    pub containers: Vec<ContainerSpec>,
}

impl WorkloadObject {
    /// Build a snapshot from a cached `Deployment`.
    #[must_use]
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let containers = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .map(|pod| pod.containers.iter().map(ContainerSpec::from).collect())
            .unwrap_or_default();

        Self {
            kind: "Deployment".to_string(),
            key: ObjectKey::new(
                deployment.namespace().unwrap_or_default(),
                deployment.name_any(),
            ),
            containers,
        }
    }
}

/// Non-compliant containers of one object, in pod template order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationReport {
    pub kind: String,
    pub key: ObjectKey,
    pub containers: Vec<String>,
}

impl ViolationReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Names of the containers missing requests or limits, in input order.
#[must_use]
pub fn evaluate(containers: &[ContainerSpec]) -> Vec<String> {
    containers
        .iter()
        .filter(|c| !c.is_compliant())
        .map(|c| c.name.clone())
        .collect()
}

/// Evaluate a whole workload snapshot.
#[must_use]
pub fn report(object: &WorkloadObject) -> ViolationReport {
    ViolationReport {
        kind: object.kind.clone(),
        key: object.key.clone(),
        containers: evaluate(&object.containers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec, ResourceRequirements};
    use kube::api::ObjectMeta;

    fn resources(cpu: &str) -> Option<ResourceList> {
        Some(BTreeMap::from([("cpu".to_string(), Quantity(cpu.to_string()))]))
    }

    fn container(name: &str, requests: Option<ResourceList>, limits: Option<ResourceList>) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            requests,
            limits,
        }
    }

    #[test]
    fn test_evaluate_empty_input() {
        assert!(evaluate(&[]).is_empty());
    }

    #[test]
    fn test_evaluate_keeps_input_order_and_skips_compliant() {
        let containers = vec![
            container("missing-requests", None, resources("1")),
            container("compliant", resources("100m"), resources("1")),
            container("missing-both", None, None),
            container("missing-limits", resources("100m"), None),
        ];

        assert_eq!(
            evaluate(&containers),
            vec!["missing-requests", "missing-both", "missing-limits"]
        );
    }

    #[test]
    fn test_empty_but_declared_sets_are_compliant() {
        let spec = container("sidecar", Some(ResourceList::new()), Some(ResourceList::new()));
        assert!(spec.is_compliant());
        assert!(evaluate(&[spec]).is_empty());
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let containers = vec![
            container("a", None, resources("1")),
            container("b", resources("1"), resources("1")),
        ];
        let first = evaluate(&containers);
        assert_eq!(first, evaluate(&containers));
        assert_eq!(first, vec!["a"]);
    }

    #[test]
    fn test_container_without_resources_block_is_non_compliant() {
        let container = Container {
            name: "app".to_string(),
            ..Container::default()
        };
        let spec = ContainerSpec::from(&container);
        assert!(spec.requests.is_none());
        assert!(spec.limits.is_none());
        assert!(!spec.is_compliant());
    }

    #[test]
    fn test_report_from_deployment() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("prod".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![
                            Container {
                                name: "app".to_string(),
                                resources: Some(ResourceRequirements {
                                    limits: resources("1"),
                                    ..ResourceRequirements::default()
                                }),
                                ..Container::default()
                            },
                            Container {
                                name: "sidecar".to_string(),
                                resources: Some(ResourceRequirements {
                                    requests: resources("100m"),
                                    limits: resources("1"),
                                    ..ResourceRequirements::default()
                                }),
                                ..Container::default()
                            },
                        ],
                        ..PodSpec::default()
                    }),
                    ..PodTemplateSpec::default()
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        };

        let object = WorkloadObject::from_deployment(&deployment);
        let report = report(&object);

        assert_eq!(report.kind, "Deployment");
        assert_eq!(report.key, ObjectKey::new("prod", "web"));
        assert_eq!(report.containers, vec!["app"]);
    }
}
