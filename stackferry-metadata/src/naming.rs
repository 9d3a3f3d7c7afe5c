//! Conversion from SDK-shaped (camelCase) Pulumi inputs to CFN-shaped
//! (PascalCase) property maps.
//!
//! The conversion is schema-aware where the bundle carries explicit CFN
//! names or nested type references, and falls back to mechanical case
//! conversion everywhere else. Secret envelopes from the provider wire
//! format are unwrapped; unknown sentinels are dropped.

use heck::ToUpperCamelCase;
use serde_json::{Map, Value};

use crate::bundle::{Bundle, PropertySpec, TypeSpec};

/// Key marking a special object in the Pulumi wire format.
pub const SPECIAL_SIG_KEY: &str = "4dabf18193072939515e22adb298388d";
/// Signature value for secrets.
pub const SECRET_SIG: &str = "1b47061264138c4ac30d75fd1eb44270";
/// Signature value for assets.
pub const ASSET_SIG: &str = "c44067f5952c0a294b673a41bacd8c17";
/// Signature value for archives.
pub const ARCHIVE_SIG: &str = "0def7320c3a5731c473e5ecbe6d01bc7";
/// Sentinel string standing in for values unknown during preview.
pub const UNKNOWN_VALUE: &str = "04da6b54-80e4-46f7-8198-b5e76d9cb989";

/// Convert a single Pulumi property name to its CloudFormation spelling.
pub fn to_cfn_name(sdk_name: &str) -> String {
    sdk_name.to_upper_camel_case()
}

/// Convert an SDK-shaped input map to a CFN-shaped map, guided by the
/// resource's input schema where available.
pub fn sdk_to_cfn(
    bundle: &Bundle,
    inputs_schema: &std::collections::HashMap<String, PropertySpec>,
    inputs: &Map<String, Value>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in inputs {
        let spec = inputs_schema.get(key);
        let cfn_key = spec
            .and_then(|s| s.cf_name.clone())
            .unwrap_or_else(|| to_cfn_name(key));
        if let Some(converted) = convert_value(bundle, spec, value) {
            out.insert(cfn_key, converted);
        }
    }
    out
}

fn convert_value(bundle: &Bundle, spec: Option<&PropertySpec>, value: &Value) -> Option<Value> {
    match value {
        Value::String(s) if s == UNKNOWN_VALUE => None,
        Value::Object(map) => {
            if let Some(sig) = map.get(SPECIAL_SIG_KEY).and_then(Value::as_str) {
                if sig == SECRET_SIG {
                    // Unwrap the secret; the plaintext is needed to shape
                    // the CFN payload.
                    return map
                        .get("value")
                        .and_then(|inner| convert_value(bundle, spec, inner));
                }
                // Assets and archives have no CFN representation.
                return None;
            }
            let nested = spec
                .and_then(|s| s.type_ref.as_deref())
                .and_then(|r| resolve_type(bundle, r));
            let mut out = Map::new();
            for (k, v) in map {
                let prop = nested.and_then(|t| t.properties.get(k));
                let cfn_key = prop
                    .and_then(|p| p.cf_name.clone())
                    .unwrap_or_else(|| to_cfn_name(k));
                if let Some(converted) = convert_value(bundle, prop, v) {
                    out.insert(cfn_key, converted);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => {
            let item_spec = spec.and_then(|s| s.items.as_deref());
            Some(Value::Array(
                items
                    .iter()
                    .filter_map(|v| convert_value(bundle, item_spec, v))
                    .collect(),
            ))
        }
        other => Some(other.clone()),
    }
}

fn resolve_type<'a>(bundle: &'a Bundle, reference: &str) -> Option<&'a TypeSpec> {
    let name = reference.strip_prefix("#/types/").unwrap_or(reference);
    bundle.types.get(name)
}

/// Returns true if the value tree contains an asset or archive envelope.
pub fn contains_asset(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            if let Some(sig) = map.get(SPECIAL_SIG_KEY).and_then(Value::as_str) {
                if sig == ASSET_SIG || sig == ARCHIVE_SIG {
                    return true;
                }
            }
            map.values().any(contains_asset)
        }
        Value::Array(items) => items.iter().any(contains_asset),
        _ => false,
    }
}
