//! Pod specification model and semantic equality.
//!
//! Reconciliation uses [`pod_spec_equal`] to decide whether a running
//! sandbox pod still matches its desired template. Representation-only
//! differences must compare equal: "1" CPU and "1000m" CPU are the same
//! request, and an absent map is the same as an empty one. A false
//! positive silently keeps stale configuration running; a false
//! negative churns sandboxes for nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A resource quantity in canonical Kubernetes notation: a decimal
/// number with an optional decimal ("m", "k", "M", ...) or binary
/// ("Ki", "Mi", ...) suffix, or e-notation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub String);

/// Exact value form: sign * mantissa * 10^exponent, with the mantissa
/// not divisible by ten. Unique per value, so equality is structural.
#[derive(Debug, PartialEq, Eq)]
struct CanonicalQuantity {
    negative: bool,
    mantissa: u128,
    exponent: i32,
}

impl Quantity {
    pub fn new(s: impl Into<String>) -> Self {
        Quantity(s.into())
    }

    fn canonicalize(&self) -> Option<CanonicalQuantity> {
        let s = self.0.trim();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let bytes = s.as_bytes();
        let mut pos = 0;
        let mut digits = String::new();
        let mut exponent: i32 = 0;

        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            digits.push(bytes[pos] as char);
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b'.' {
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                digits.push(bytes[pos] as char);
                exponent -= 1;
                pos += 1;
            }
        }
        if digits.is_empty() {
            return None;
        }

        // e-notation only when the 'e' is followed by a (signed) digit;
        // a bare trailing 'E' is the exa suffix.
        if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
            let rest = &s[pos + 1..];
            let after_sign = rest.strip_prefix(&['-', '+'][..]).unwrap_or(rest);
            if after_sign.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                let sci: i32 = rest.parse().ok()?;
                exponent += sci;
                pos = bytes.len();
            }
        }

        let mut mantissa: u128 = digits.parse().ok()?;
        match &s[pos..] {
            "" => {}
            "m" => exponent -= 3,
            "k" => exponent += 3,
            "M" => exponent += 6,
            "G" => exponent += 9,
            "T" => exponent += 12,
            "P" => exponent += 15,
            "E" => exponent += 18,
            "Ki" => mantissa = mantissa.checked_mul(1 << 10)?,
            "Mi" => mantissa = mantissa.checked_mul(1 << 20)?,
            "Gi" => mantissa = mantissa.checked_mul(1 << 30)?,
            "Ti" => mantissa = mantissa.checked_mul(1 << 40)?,
            "Pi" => mantissa = mantissa.checked_mul(1 << 50)?,
            "Ei" => mantissa = mantissa.checked_mul(1 << 60)?,
            _ => return None,
        }

        if mantissa == 0 {
            return Some(CanonicalQuantity {
                negative: false,
                mantissa: 0,
                exponent: 0,
            });
        }
        while mantissa % 10 == 0 {
            mantissa /= 10;
            exponent += 1;
        }
        Some(CanonicalQuantity {
            negative,
            mantissa,
            exponent,
        })
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        match (self.canonicalize(), other.canonicalize()) {
            (Some(a), Some(b)) => a == b,
            // Unparseable quantities fall back to literal comparison.
            _ => self.0 == other.0,
        }
    }
}

impl Eq for Quantity {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Quantity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, Quantity>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub init_containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Semantic equality over pod specifications.
pub fn pod_spec_equal(a: &PodSpec, b: &PodSpec) -> bool {
    containers_equal(&a.containers, &b.containers)
        && containers_equal(&a.init_containers, &b.init_containers)
        && string_map_equal(a.node_selector.as_ref(), b.node_selector.as_ref())
        && a.service_account_name == b.service_account_name
        && a.restart_policy == b.restart_policy
        && a.termination_grace_period_seconds == b.termination_grace_period_seconds
}

fn containers_equal(a: &[Container], b: &[Container]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| container_equal(x, y))
}

fn container_equal(a: &Container, b: &Container) -> bool {
    a.name == b.name
        && a.image == b.image
        && a.command == b.command
        && a.args == b.args
        && env_equal(&a.env, &b.env)
        && ports_equal(&a.ports, &b.ports)
        && resources_equal(&a.resources, &b.resources)
}

fn env_equal(a: &[EnvVar], b: &[EnvVar]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.name == y.name && x.value == y.value)
}

fn ports_equal(a: &[ContainerPort], b: &[ContainerPort]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.name == y.name
                && x.container_port == y.container_port
                && x.protocol == y.protocol
        })
}

fn resources_equal(a: &ResourceRequirements, b: &ResourceRequirements) -> bool {
    quantity_map_equal(a.limits.as_ref(), b.limits.as_ref())
        && quantity_map_equal(a.requests.as_ref(), b.requests.as_ref())
}

/// Absent and empty maps are the same thing.
fn string_map_equal(
    a: Option<&BTreeMap<String, String>>,
    b: Option<&BTreeMap<String, String>>,
) -> bool {
    let a_len = a.map_or(0, BTreeMap::len);
    let b_len = b.map_or(0, BTreeMap::len);
    if a_len != b_len {
        return false;
    }
    match (a, b) {
        (Some(a), Some(b)) => a.iter().all(|(k, v)| b.get(k) == Some(v)),
        _ => true,
    }
}

fn quantity_map_equal(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let a_len = a.map_or(0, BTreeMap::len);
    let b_len = b.map_or(0, BTreeMap::len);
    if a_len != b_len {
        return false;
    }
    match (a, b) {
        (Some(a), Some(b)) => a.iter().all(|(k, v)| b.get(k) == Some(v)),
        _ => true,
    }
}
