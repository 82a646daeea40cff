// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parses ARM request paths into resource identities.
//!
//! ARM resources are addressed by hierarchical paths such as:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}
//! ```
//!
//! Child resources append more `{type}/{name}` pairs, and extension resources
//! restart the hierarchy with another `providers/{namespace}` segment. The
//! segment keys are case-insensitive.

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

const SUBSCRIPTION_TYPE: &str = "Microsoft.Resources/subscriptions";
const RESOURCE_GROUP_TYPE: &str = "Microsoft.Resources/resourceGroups";

/// The identity of the resource targeted by a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceIdentity {
    /// The subscription id.
    pub subscription_id: String,
    /// The resource group name, empty for subscription-level resources.
    pub resource_group_name: String,
    /// The fully qualified resource type, e.g. `Microsoft.Compute/virtualMachines`.
    ///
    /// Child resources include every type in the hierarchy, e.g.
    /// `Microsoft.Network/virtualNetworks/subnets`.
    pub resource_type: String,
    /// The name of the innermost resource.
    pub name: String,
}

/// The path does not identify an ARM resource.
///
/// This is not a failure of the request. Many valid requests, such as health
/// probes or tenant-level operations, do not target a single resource.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResourceIdError {
    #[error("the path {0:?} does not start with /subscriptions/{{id}}")]
    NotAResourceId(String),
    #[error("the path {path:?} has an empty segment")]
    EmptySegment { path: String },
    #[error("the path {path:?} is missing a value after {segment:?}")]
    MissingValue { path: String, segment: String },
    #[error("unexpected segment {segment:?} in {path:?}, expected {expected:?}")]
    UnexpectedSegment {
        path: String,
        segment: String,
        expected: &'static str,
    },
}

impl ResourceIdentity {
    /// Parses a request path into a resource identity.
    ///
    /// A trailing segment without a matching name, such as the `start` in
    /// `.../virtualMachines/vm1/start`, names an action on the resource and is
    /// ignored.
    ///
    /// # Example
    /// ```
    /// # use arm_middleware::resource_id::ResourceIdentity;
    /// let id = ResourceIdentity::parse(
    ///     "/subscriptions/S/resourceGroups/R/providers/Microsoft.Compute/virtualMachines/N",
    /// )?;
    /// assert_eq!(id.subscription_id, "S");
    /// assert_eq!(id.resource_group_name, "R");
    /// assert_eq!(id.resource_type, "Microsoft.Compute/virtualMachines");
    /// assert_eq!(id.name, "N");
    /// # Ok::<(), arm_middleware::resource_id::ResourceIdError>(())
    /// ```
    pub fn parse(path: &str) -> Result<Self, ResourceIdError> {
        let trimmed = path.trim_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            if trimmed.is_empty() {
                return Err(ResourceIdError::NotAResourceId(path.to_string()));
            }
            return Err(ResourceIdError::EmptySegment {
                path: path.to_string(),
            });
        }

        match segments.as_slice() {
            [key, sub, tail @ ..] if key.eq_ignore_ascii_case(SUBSCRIPTIONS) => {
                let mut identity = ResourceIdentity {
                    subscription_id: sub.to_string(),
                    resource_type: SUBSCRIPTION_TYPE.to_string(),
                    name: sub.to_string(),
                    ..Default::default()
                };
                let mut rest = tail;
                if let Some(key) = rest.first() {
                    if key.eq_ignore_ascii_case(RESOURCE_GROUPS) {
                        let rg = rest.get(1).ok_or_else(|| missing(path, key))?;
                        identity.resource_group_name = rg.to_string();
                        identity.resource_type = RESOURCE_GROUP_TYPE.to_string();
                        identity.name = rg.to_string();
                        rest = &rest[2..];
                    }
                }
                if rest.is_empty() {
                    return Ok(identity);
                }
                let (resource_type, name) = parse_provider_segments(path, rest)?;
                identity.resource_type = resource_type;
                identity.name = name;
                Ok(identity)
            }
            [key] if key.eq_ignore_ascii_case(SUBSCRIPTIONS) => Err(missing(path, key)),
            _ => Err(ResourceIdError::NotAResourceId(path.to_string())),
        }
    }
}

impl std::str::FromStr for ResourceIdentity {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn missing(path: &str, segment: &str) -> ResourceIdError {
    ResourceIdError::MissingValue {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

/// Walks `providers/{namespace}/{type}/{name}[/{type}/{name}...]`.
fn parse_provider_segments(
    path: &str,
    segments: &[&str],
) -> Result<(String, String), ResourceIdError> {
    let mut namespace = "";
    let mut types: Vec<&str> = Vec::new();
    let mut name = "";
    let mut i = 0;
    while i < segments.len() {
        let segment = segments[i];
        if segment.eq_ignore_ascii_case(PROVIDERS) {
            namespace = segments
                .get(i + 1)
                .copied()
                .ok_or_else(|| missing(path, segment))?;
            types.clear();
            i += 2;
            continue;
        }
        if namespace.is_empty() {
            return Err(ResourceIdError::UnexpectedSegment {
                path: path.to_string(),
                segment: segment.to_string(),
                expected: PROVIDERS,
            });
        }
        match segments.get(i + 1).copied() {
            Some(n) => {
                types.push(segment);
                name = n;
                i += 2;
            }
            // A trailing action, e.g. `restart` or `listKeys`.
            None if !types.is_empty() => break,
            None => return Err(missing(path, segment)),
        }
    }
    if types.is_empty() {
        return Err(missing(path, namespace));
    }
    Ok((format!("{namespace}/{}", types.join("/")), name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn identity(sub: &str, rg: &str, resource_type: &str, name: &str) -> ResourceIdentity {
        ResourceIdentity {
            subscription_id: sub.to_string(),
            resource_group_name: rg.to_string(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn basic() -> anyhow::Result<()> {
        let got = ResourceIdentity::parse("/subscriptions/S/resourceGroups/R/providers/P/T/N")?;
        assert_eq!(got, identity("S", "R", "P/T", "N"));
        Ok(())
    }

    #[test_case("/subscriptions/S/resourceGroups/R/providers/Microsoft.Compute/virtualMachines/vm1", identity("S", "R", "Microsoft.Compute/virtualMachines", "vm1"); "virtual machine")]
    #[test_case("/subscriptions/S/resourcegroups/R/PROVIDERS/Microsoft.Compute/virtualMachines/vm1", identity("S", "R", "Microsoft.Compute/virtualMachines", "vm1"); "case insensitive keys")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default", identity("S", "R", "Microsoft.Network/virtualNetworks/subnets", "default"); "child resource")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers/Microsoft.Compute/virtualMachines/vm1/start", identity("S", "R", "Microsoft.Compute/virtualMachines", "vm1"); "trailing action")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers/Microsoft.Compute/virtualMachines/vm1/", identity("S", "R", "Microsoft.Compute/virtualMachines", "vm1"); "trailing slash")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers/Microsoft.Compute/virtualMachines/vm1/providers/Microsoft.Insights/diagnosticSettings/ds", identity("S", "R", "Microsoft.Insights/diagnosticSettings", "ds"); "extension resource")]
    #[test_case("/subscriptions/S/resourceGroups/R", identity("S", "R", RESOURCE_GROUP_TYPE, "R"); "resource group")]
    #[test_case("/subscriptions/S", identity("S", "", SUBSCRIPTION_TYPE, "S"); "subscription")]
    #[test_case("/subscriptions/S/providers/Microsoft.Compute/skus/Standard_D2", identity("S", "", "Microsoft.Compute/skus", "Standard_D2"); "subscription level provider")]
    fn parse_success(input: &str, want: ResourceIdentity) -> anyhow::Result<()> {
        let got = ResourceIdentity::parse(input)?;
        assert_eq!(got, want);
        Ok(())
    }

    #[test_case("/healthz")]
    #[test_case("")]
    #[test_case("/")]
    #[test_case("/subscriptions")]
    #[test_case("/subscriptions/S/resourceGroups")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers/P")]
    #[test_case("/subscriptions/S/resourceGroups/R/providers/P/T")]
    #[test_case("/subscriptions/S/resourceGroups/R/virtualMachines/vm")]
    #[test_case("/subscriptions//resourceGroups/R")]
    fn parse_error(input: &str) {
        let got = ResourceIdentity::parse(input);
        assert!(got.is_err(), "{got:?}");
    }

    #[test]
    fn error_messages() {
        let got = ResourceIdentity::parse("/healthz");
        assert_eq!(got, Err(ResourceIdError::NotAResourceId("/healthz".to_string())));

        let got = ResourceIdentity::parse("/subscriptions/S/resourceGroups");
        assert!(
            matches!(&got, Err(ResourceIdError::MissingValue { segment, .. }) if segment == "resourceGroups"),
            "{got:?}"
        );

        let got = ResourceIdentity::parse("/subscriptions/S/resourceGroups/R/widgets/w");
        let e = got.unwrap_err();
        assert!(e.to_string().contains("widgets"), "{e}");
    }

    #[test]
    fn from_str() -> anyhow::Result<()> {
        let got: ResourceIdentity = "/subscriptions/S/resourceGroups/R/providers/P/T/N".parse()?;
        assert_eq!(got.name, "N");
        Ok(())
    }
}
