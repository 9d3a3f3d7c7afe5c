//! Building an import file from an exported Pulumi deployment enriched
//! with the captures the interceptors collected.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use stackferry_core::{Urn, PLACEHOLDER_ID};

use crate::{sort_resources, ImportFile, ImportFileError, ImportResource};

/// Supplemental data collected during provider interception.
#[derive(Debug, Clone, Default)]
pub struct CaptureMetadata {
    pub resource_type: String,
    pub name: String,
    pub logical_name: String,
    pub id: String,
    pub properties: Vec<String>,
}

/// The slice of an exported deployment the builder needs.
#[derive(Debug, Deserialize, Default)]
pub struct Deployment {
    #[serde(default)]
    pub resources: Vec<DeployedResource>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeployedResource {
    pub urn: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub inputs: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub outputs: Option<serde_json::Map<String, Value>>,
}

/// Decode the `deployment` payload of a `pulumi stack export`.
pub fn parse_exported_deployment(raw: &str) -> Result<Option<Deployment>, ImportFileError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    #[derive(Deserialize)]
    struct Exported {
        #[serde(default)]
        deployment: Option<Deployment>,
    }
    let exported: Exported =
        serde_json::from_str(raw).map_err(ImportFileError::Deployment)?;
    Ok(exported.deployment)
}

/// Build the import file. Without a deployment the captures alone are
/// projected; with one, the deployment defines the resource set and the
/// captures enrich it.
pub fn build_file(
    deployment: Option<&Deployment>,
    captures: &[CaptureMetadata],
) -> ImportFile {
    match deployment {
        None => build_from_captures(captures),
        Some(deployment) => build_from_deployment(deployment, captures),
    }
}

fn build_from_captures(captures: &[CaptureMetadata]) -> ImportFile {
    let mut resources: Vec<ImportResource> = captures
        .iter()
        .map(|capture| ImportResource {
            resource_type: capture.resource_type.clone(),
            name: capture.name.clone(),
            id: capture.id.clone(),
            logical_name: capture.logical_name.clone(),
            properties: capture.properties.clone(),
            ..Default::default()
        })
        .collect();
    sort_resources(&mut resources);
    ImportFile {
        name_table: BTreeMap::new(),
        resources,
    }
}

fn build_from_deployment(
    deployment: &Deployment,
    captures: &[CaptureMetadata],
) -> ImportFile {
    let capture_index = index_captures(captures);
    let providers = collect_provider_details(&deployment.resources);

    let mut name_table = BTreeMap::new();
    let mut resources = Vec::new();
    for resource in &deployment.resources {
        let name = urn_name(&resource.urn);
        if !name.is_empty() && !name_table.contains_key(&name) {
            name_table.insert(name.clone(), resource.urn.clone());
        }

        if !is_aws_resource(&resource.resource_type) {
            continue;
        }

        let name = if name.is_empty() {
            "resource".to_string()
        } else {
            name
        };

        let (provider_name, version) = resolve_provider(resource.provider.as_deref(), &providers);
        let parent = resolve_parent_name(resource.parent.as_deref());

        let capture = capture_index.get(&capture_key(&resource.resource_type, &name));

        let logical_name = capture
            .map(|c| c.logical_name.clone())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| name.clone());
        let mut id = capture
            .map(|c| c.id.clone())
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case(PLACEHOLDER_ID))
            .or_else(|| resource.id.clone().filter(|id| !id.is_empty()))
            .unwrap_or_else(|| PLACEHOLDER_ID.to_string());
        let properties = capture.map(|c| c.properties.clone()).unwrap_or_default();

        let component = !resource.custom;
        if component {
            id = String::new();
        }

        resources.push(ImportResource {
            resource_type: resource.resource_type.clone(),
            name,
            id,
            logical_name,
            properties,
            component,
            version,
            parent,
            provider: provider_name,
        });
    }

    sort_resources(&mut resources);
    ImportFile {
        name_table,
        resources,
    }
}

fn index_captures(captures: &[CaptureMetadata]) -> HashMap<String, CaptureMetadata> {
    let mut index = HashMap::with_capacity(captures.len());
    for capture in captures {
        let key = capture_key(&capture.resource_type, &capture.name);
        if key.is_empty() {
            continue;
        }
        index.insert(key, capture.clone());
    }
    index
}

fn capture_key(resource_type: &str, name: &str) -> String {
    if resource_type.is_empty() || name.is_empty() {
        return String::new();
    }
    format!("{resource_type}|{name}")
}

struct ProviderDetails {
    name: String,
    version: String,
}

fn collect_provider_details(resources: &[DeployedResource]) -> HashMap<String, ProviderDetails> {
    let mut providers = HashMap::new();
    for resource in resources {
        if !resource.resource_type.starts_with("pulumi:providers:") {
            continue;
        }
        let version = read_string(resource.inputs.as_ref(), "version")
            .or_else(|| read_string(resource.outputs.as_ref(), "version"))
            .unwrap_or_default();
        providers.insert(
            resource.urn.clone(),
            ProviderDetails {
                name: urn_name(&resource.urn),
                version,
            },
        );
    }
    providers
}

fn read_string(props: Option<&serde_json::Map<String, Value>>, key: &str) -> Option<String> {
    props?
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A provider reference is the provider resource's URN with its ID
/// appended (`urn::...::name::uuid`).
fn resolve_provider(
    provider_ref: Option<&str>,
    providers: &HashMap<String, ProviderDetails>,
) -> (String, String) {
    let Some(provider_ref) = provider_ref.filter(|p| !p.is_empty()) else {
        return (String::new(), String::new());
    };
    let lookup = providers.get(provider_ref).or_else(|| {
        provider_ref
            .rsplit_once("::")
            .and_then(|(urn, _id)| providers.get(urn))
    });
    if let Some(details) = lookup {
        return (details.name.clone(), details.version.clone());
    }
    let urn = provider_ref
        .rsplit_once("::")
        .map(|(urn, _)| urn)
        .unwrap_or(provider_ref);
    (urn_name(urn), String::new())
}

fn resolve_parent_name(parent: Option<&str>) -> String {
    let Some(parent) = parent.filter(|p| !p.is_empty()) else {
        return String::new();
    };
    match Urn::parse(parent) {
        Ok(urn) if urn.qualified_type() == "pulumi:pulumi:Stack" => String::new(),
        Ok(urn) => urn.name().to_string(),
        Err(_) => String::new(),
    }
}

fn urn_name(raw: &str) -> String {
    Urn::parse(raw)
        .map(|urn| urn.name().to_string())
        .unwrap_or_default()
}

fn is_aws_resource(resource_type: &str) -> bool {
    resource_type.starts_with("aws:") || resource_type.starts_with("aws-native:")
}
