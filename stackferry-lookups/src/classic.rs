//! Primary-ID resolution for the classic `aws:` provider family.
//!
//! Classic imports never consult the cloud: the ID is the physical ID, a
//! deterministic ARN synthesized from the account, or identifier segments
//! joined with the registered separator.

use serde_json::{Map, Value};
use stackferry_core::{LogicalResourceId, PrimaryResourceId, PulumiToken, ResourceType};
use stackferry_metadata::{classic_source, MetadataSource};

use crate::{primary_identifiers, render_resource_model, LookupError, Lookups};

impl Lookups {
    /// Resolve the import ID for a classic-family resource.
    pub async fn find_primary_resource_id_classic(
        &self,
        token: &PulumiToken,
        logical_id: &LogicalResourceId,
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        let metadata = classic_source();
        let (resource_type, id_parts) = primary_identifiers(metadata, token)?;
        self.snapshot().record_props(logical_id, props);
        match id_parts.len() {
            0 => Err(LookupError::EmptyPrimaryIdentifier {
                resource_type,
                logical_id: logical_id.clone(),
            }),
            1 => self.classic_single_id(&resource_type, logical_id, &id_parts[0], props),
            _ => self.classic_composite_id(
                &resource_type,
                logical_id,
                &id_parts,
                props,
                &metadata.separator(token),
            ),
        }
    }

    fn classic_single_id(
        &self,
        resource_type: &ResourceType,
        logical_id: &LogicalResourceId,
        id_property: &str,
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        if let Some(Value::String(supplied)) = props.get(id_property) {
            return Ok(PrimaryResourceId::new(supplied.clone()));
        }
        let resource = self
            .snapshot()
            .get(logical_id)
            .ok_or_else(|| LookupError::MissingStackResource {
                logical_id: logical_id.clone(),
            })?;
        if id_property.to_lowercase().ends_with("arn") {
            return self.synthesize_arn(resource_type, resource.physical_id.as_str());
        }
        Ok(PrimaryResourceId::new(resource.physical_id.into_string()))
    }

    /// Build an ARN for the resource types whose classic import ID is an
    /// ARN that CloudFormation never hands out. The shape is deterministic
    /// from the account and the physical name.
    fn synthesize_arn(
        &self,
        resource_type: &ResourceType,
        physical_name: &str,
    ) -> Result<PrimaryResourceId, LookupError> {
        match resource_type.as_str() {
            "AWS::IAM::Policy" => Ok(PrimaryResourceId::new(format!(
                "arn:aws:iam::{}:policy/{}",
                self.account(),
                physical_name
            ))),
            _ => Err(LookupError::ArnSynthesisUnsupported(resource_type.clone())),
        }
    }

    fn classic_composite_id(
        &self,
        resource_type: &ResourceType,
        logical_id: &LogicalResourceId,
        id_parts: &[String],
        props: &Map<String, Value>,
        separator: &str,
    ) -> Result<PrimaryResourceId, LookupError> {
        let (model, missing) = render_resource_model(id_parts, props, |s| s.to_string())?;
        if missing.len() > 1 {
            return Err(LookupError::MissingIdSegments {
                resource_type: resource_type.clone(),
                properties: missing,
            });
        }
        let resource = self
            .snapshot()
            .get(logical_id)
            .ok_or_else(|| LookupError::MissingStackResource {
                logical_id: logical_id.clone(),
            })?;

        // At most one segment is absent from the inputs; the physical ID
        // stands in for it, in identifier order.
        let segments: Vec<&str> = id_parts
            .iter()
            .map(|part| {
                model
                    .get(part)
                    .map(String::as_str)
                    .unwrap_or_else(|| resource.physical_id.as_str())
            })
            .collect();
        Ok(PrimaryResourceId::new(segments.join(separator)))
    }
}
