//! The Cloud Control probe: list-based identifier discovery with a per-run
//! result cache, a bounded throttling retry, and error-driven recovery of
//! list-handler resource models.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use stackferry_core::{PrimaryResourceId, ResourceType};
use tracing::debug;

use crate::LookupError;

/// One identifier Cloud Control returned from `ListResources`.
#[derive(Debug, Clone)]
pub struct ResourceIdentifier {
    pub identifier: Option<String>,
    pub properties: Option<String>,
}

#[derive(Debug, Default)]
pub struct ListResourcesPage {
    pub identifiers: Vec<ResourceIdentifier>,
    pub next_token: Option<String>,
}

/// Cloud Control error classification. The probe reacts differently to each
/// of these, so the client seam hands them over pre-classified.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CcApiError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("unsupported action: {message}")]
    UnsupportedAction { message: String },

    #[error("throttled: {message}")]
    Throttling { message: String },

    #[error("{message}")]
    Other {
        code: Option<String>,
        message: String,
    },
}

impl CcApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CcApiError::Throttling { .. } => true,
            CcApiError::Other {
                code: Some(code), ..
            } => code.to_lowercase().contains("throttling"),
            _ => false,
        }
    }
}

/// Seam over the Cloud Control client.
#[async_trait]
pub trait CloudControlApi: Send + Sync {
    async fn list_resources_page(
        &self,
        type_name: &str,
        resource_model: Option<&str>,
        next_token: Option<String>,
    ) -> Result<ListResourcesPage, CcApiError>;
}

/// Retry policy for throttled list calls. Attempts are bounded and the
/// delay grows exponentially up to a cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

type CacheKey = (ResourceType, String);

pub struct CcApiProbe {
    client: Arc<dyn CloudControlApi>,
    retry: RetryPolicy,
    cache: Mutex<HashMap<CacheKey, Vec<ResourceIdentifier>>>,
}

impl CcApiProbe {
    pub fn new(client: Arc<dyn CloudControlApi>) -> Self {
        Self::with_retry(client, RetryPolicy::default())
    }

    pub fn with_retry(client: Arc<dyn CloudControlApi>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> Arc<dyn CloudControlApi> {
        self.client.clone()
    }

    /// List all resources of a type, optionally scoped by a list-handler
    /// resource model. Results are cached per `(type, model)` for the
    /// lifetime of the probe.
    pub async fn list_resources(
        &self,
        resource_type: &ResourceType,
        resource_model: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceIdentifier>, CcApiError> {
        let key = (
            resource_type.clone(),
            model_cache_key(resource_model),
        );
        if let Some(cached) = self.cache.lock().expect("probe cache poisoned").get(&key) {
            return Ok(cached.clone());
        }

        let model_json = if resource_model.is_empty() {
            None
        } else {
            Some(serde_json::to_string(resource_model).expect("string map serializes"))
        };

        let mut identifiers = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .list_page_with_retry(resource_type.as_str(), model_json.as_deref(), next_token)
                .await?;
            identifiers.extend(page.identifiers);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        self.cache
            .lock()
            .expect("probe cache poisoned")
            .insert(key, identifiers.clone());
        Ok(identifiers)
    }

    async fn list_page_with_retry(
        &self,
        type_name: &str,
        resource_model: Option<&str>,
        next_token: Option<String>,
    ) -> Result<ListResourcesPage, CcApiError> {
        let mut attempt = 0;
        loop {
            match self
                .client
                .list_resources_page(type_name, resource_model, next_token.clone())
                .await
            {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!(type_name, attempt, ?delay, "throttled by cloud control, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Find the identifier whose value starts or ends with `suffix`.
    /// Cloud Control is inconsistent about segment order across resource
    /// types, so both orderings are accepted; the first match in returned
    /// order wins.
    pub async fn find_identifier(
        &self,
        resource_type: &ResourceType,
        suffix: &str,
        resource_model: &BTreeMap<String, String>,
        recorded_props: Option<&Map<String, Value>>,
    ) -> Result<PrimaryResourceId, LookupError> {
        let mut model = resource_model.clone();
        augment_with_required(&mut model, resource_type, recorded_props);

        let identifiers = match self.list_resources(resource_type, &model).await {
            Ok(identifiers) => identifiers,
            Err(CcApiError::UnsupportedAction { message }) => {
                debug!(
                    resource_type = resource_type.as_str(),
                    %message, "type not supported by cloud control, manual mapping required"
                );
                return Ok(PrimaryResourceId::placeholder());
            }
            Err(CcApiError::InvalidRequest { message }) => {
                return self
                    .retry_with_recovered_model(resource_type, suffix, &message, recorded_props)
                    .await;
            }
            Err(err) => {
                return Err(LookupError::Probe {
                    resource_type: resource_type.clone(),
                    source: err,
                });
            }
        };

        match_suffix(resource_type, suffix, &identifiers)
    }

    /// The list handler rejected the model. Parse the missing property out
    /// of the message, rebuild the model from the originally-captured input
    /// properties, and retry exactly once.
    async fn retry_with_recovered_model(
        &self,
        resource_type: &ResourceType,
        suffix: &str,
        message: &str,
        recorded_props: Option<&Map<String, Value>>,
    ) -> Result<PrimaryResourceId, LookupError> {
        let property = parse_missing_property(message).ok_or_else(|| {
            LookupError::UnparseableListError {
                resource_type: resource_type.clone(),
                message: message.to_string(),
            }
        })?;

        let value = recover_property_value(&property, recorded_props).ok_or_else(|| {
            LookupError::MissingListProperty {
                resource_type: resource_type.clone(),
                property: property.clone(),
            }
        })?;

        debug!(
            resource_type = resource_type.as_str(),
            %property, "recovered list-handler property from captured inputs"
        );
        let mut model = BTreeMap::new();
        model.insert(property, value);

        let identifiers = match self.list_resources(resource_type, &model).await {
            Ok(identifiers) => identifiers,
            Err(CcApiError::UnsupportedAction { message }) => {
                debug!(
                    resource_type = resource_type.as_str(),
                    %message, "type not supported by cloud control, manual mapping required"
                );
                return Ok(PrimaryResourceId::placeholder());
            }
            Err(err) => {
                return Err(LookupError::Probe {
                    resource_type: resource_type.clone(),
                    source: err,
                });
            }
        };
        match_suffix(resource_type, suffix, &identifiers)
    }
}

fn model_cache_key(model: &BTreeMap<String, String>) -> String {
    let mut key = String::new();
    for (k, v) in model {
        key.push_str(k);
        key.push('=');
        key.push_str(v);
        key.push(';');
    }
    key
}

/// Pull the list-handler required properties the registry knows about into
/// the model, drawing values from the captured inputs.
fn augment_with_required(
    model: &mut BTreeMap<String, String>,
    resource_type: &ResourceType,
    recorded_props: Option<&Map<String, Value>>,
) {
    for required in stackferry_metadata::native_source().list_handler_required(resource_type) {
        if model.contains_key(required) {
            continue;
        }
        if let Some(value) = recover_property_value(required, recorded_props) {
            model.insert(required.clone(), value);
        }
    }
}

fn match_suffix(
    resource_type: &ResourceType,
    suffix: &str,
    identifiers: &[ResourceIdentifier],
) -> Result<PrimaryResourceId, LookupError> {
    for candidate in identifiers {
        if let Some(id) = candidate.identifier.as_deref() {
            if id.ends_with(suffix) || id.starts_with(suffix) {
                return Ok(PrimaryResourceId::new(id));
            }
        }
    }
    for candidate in identifiers {
        debug!(
            identifier = candidate.identifier.as_deref().unwrap_or(""),
            properties = candidate.properties.as_deref().unwrap_or(""),
            suffix,
            "unmatched cloud control identifier"
        );
    }
    Err(LookupError::NoIdentifierMatch {
        resource_type: resource_type.clone(),
        suffix: suffix.to_string(),
        candidates: identifiers.len(),
    })
}

/// The two message shapes Cloud Control uses for a missing list-handler
/// property.
fn parse_missing_property(message: &str) -> Option<String> {
    static PATTERNS: &[&str] = &[
        r"Required property:\s*\[([A-Za-z0-9_]+)\]",
        r"required key \[([A-Za-z0-9_]+)\] not found",
    ];
    for pattern in PATTERNS {
        let re = Regex::new(pattern).expect("static pattern compiles");
        if let Some(caps) = re.captures(message) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Find a value for a recovered property: directly from the captured
/// inputs, or through a deriver for properties whose value is embedded in
/// another property.
fn recover_property_value(
    property: &str,
    recorded_props: Option<&Map<String, Value>>,
) -> Option<String> {
    let props = recorded_props?;
    if let Some(value) = props.get(property).and_then(Value::as_str) {
        return Some(value.to_string());
    }
    derive_property_value(property, props)
}

/// Derivers for list-handler properties that never appear in the inputs
/// directly. `ServiceNamespace` is the first segment of the
/// `ScalableDimension` value (`ecs:service:DesiredCount` -> `ecs`).
fn derive_property_value(property: &str, props: &Map<String, Value>) -> Option<String> {
    match property {
        "ServiceNamespace" => props
            .get("ScalableDimension")
            .and_then(Value::as_str)
            .and_then(|dimension| dimension.split(':').next())
            .map(str::to_string),
        _ => None,
    }
}
