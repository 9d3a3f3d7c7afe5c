//! Overlaying enriched capture data onto the skeleton manifest produced by
//! `pulumi preview --import-file`.

use std::collections::BTreeMap;
use std::collections::HashMap;

use stackferry_core::PLACEHOLDER_ID;

use crate::{sort_resources, ImportFile, ImportResource};

/// Merge the enriched file onto the skeleton. The skeleton is authoritative
/// for the resource set; enriched non-empty fields overlay its entries, and
/// enriched entries with no skeleton match are appended.
pub fn merge_with_skeleton(
    skeleton: Option<&ImportFile>,
    enriched: Option<&ImportFile>,
) -> ImportFile {
    match (skeleton, enriched) {
        (None, None) => ImportFile::default(),
        (None, Some(enriched)) => enriched.clone(),
        (Some(skeleton), None) => skeleton.clone(),
        (Some(skeleton), Some(enriched)) => ImportFile {
            name_table: merge_name_tables(&skeleton.name_table, &enriched.name_table),
            resources: merge_resources(&skeleton.resources, &enriched.resources),
        },
    }
}

fn merge_name_tables(
    skeleton: &BTreeMap<String, String>,
    enriched: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = skeleton.clone();
    for (name, urn) in enriched {
        if urn.is_empty() {
            continue;
        }
        out.insert(name.clone(), urn.clone());
    }
    out
}

fn merge_resources(
    skeleton: &[ImportResource],
    enriched: &[ImportResource],
) -> Vec<ImportResource> {
    let mut index: HashMap<String, ImportResource> = HashMap::with_capacity(enriched.len());
    for resource in enriched {
        if let Some(key) = merge_key(resource) {
            index.insert(key, resource.clone());
        }
    }

    let mut merged = Vec::with_capacity(skeleton.len() + enriched.len());
    for resource in skeleton {
        let overlay = merge_key(resource).and_then(|key| index.remove(&key));
        match overlay {
            Some(overlay) => merged.push(merge_resource(resource, &overlay)),
            None => merged.push(resource.clone()),
        }
    }

    merged.extend(index.into_values());
    sort_resources(&mut merged);
    merged
}

fn merge_resource(skeleton: &ImportResource, enriched: &ImportResource) -> ImportResource {
    let mut result = skeleton.clone();
    if !enriched.resource_type.is_empty() {
        result.resource_type = enriched.resource_type.clone();
    }
    if !enriched.name.is_empty() {
        result.name = enriched.name.clone();
    }
    if !enriched.logical_name.is_empty() {
        result.logical_name = enriched.logical_name.clone();
    }
    result.id = choose_id(&result.id, &enriched.id);
    if !enriched.properties.is_empty() {
        result.properties = enriched.properties.clone();
    }
    result.component = result.component || enriched.component;
    if !enriched.version.is_empty() {
        result.version = enriched.version.clone();
    }
    if !enriched.parent.is_empty() {
        result.parent = enriched.parent.clone();
    }
    if !enriched.provider.is_empty() {
        result.provider = enriched.provider.clone();
    }
    result
}

/// ID policy: real IDs beat placeholders and empties; when both sides hold
/// a real ID, the enriched one wins.
fn choose_id(current: &str, candidate: &str) -> String {
    let current_placeholder = current.eq_ignore_ascii_case(PLACEHOLDER_ID);
    let candidate_placeholder = candidate.eq_ignore_ascii_case(PLACEHOLDER_ID);
    match (candidate.is_empty(), candidate_placeholder) {
        (true, _) => current.to_string(),
        (false, true) => {
            if current.is_empty() || current_placeholder {
                candidate.to_string()
            } else {
                current.to_string()
            }
        }
        (false, false) => candidate.to_string(),
    }
}

/// Skeleton and enriched entries match on type plus name, falling back to
/// the logical name when the source name is absent.
fn merge_key(resource: &ImportResource) -> Option<String> {
    if resource.resource_type.is_empty() {
        return None;
    }
    let name = if resource.name.is_empty() {
        resource.logical_name.as_str()
    } else {
        resource.name.as_str()
    };
    if name.is_empty() {
        return None;
    }
    Some(format!("{}|{}", resource.resource_type, name))
}
