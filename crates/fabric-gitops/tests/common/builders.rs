//! Manifest text builders for tests.

#![allow(dead_code)]

/// A VPC manifest with one subnet and the labels the default policy asks for.
pub fn vpc_yaml(name: &str, subnet: &str) -> String {
    format!(
        "apiVersion: vpc.githedgehog.com/v1beta1
kind: VPC
metadata:
  name: {name}
  labels:
    environment: prod
    team: network
spec:
  subnets:
    default:
      subnet: {subnet}
"
    )
}

/// A switch manifest in an explicit namespace.
pub fn switch_yaml(namespace: &str, name: &str) -> String {
    format!(
        "apiVersion: wiring.githedgehog.com/v1beta1
kind: Switch
metadata:
  name: {name}
  namespace: {namespace}
  labels:
    environment: prod
    team: network
spec:
  role: server-leaf
"
    )
}

/// A structurally valid document of a kind the engine does not manage.
pub fn unsupported_yaml(name: &str) -> String {
    format!(
        "apiVersion: example.com/v1
kind: UnsupportedThing
metadata:
  name: {name}
spec:
  size: 3
"
    )
}
