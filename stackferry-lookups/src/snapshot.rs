//! A read-mostly snapshot of a deployed CloudFormation stack.
//!
//! Loaded once per run by paginating `ListStackResources`; afterwards the
//! only mutation is the lazy attachment of input properties the resolver
//! saw for a logical ID, which the CCAPI probe consults on its error-driven
//! retry.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use stackferry_core::{LogicalResourceId, PhysicalResourceId, ResourceType, StackName};

use crate::CloudApiError;

/// One CloudFormation resource as the stack reports it.
#[derive(Debug, Clone)]
pub struct StackResource {
    pub resource_type: ResourceType,
    pub logical_id: LogicalResourceId,
    pub physical_id: PhysicalResourceId,
    /// Input properties captured at first resolution, if any.
    pub props: Option<Map<String, Value>>,
}

/// One page of `ListStackResources` output, behind the client seam.
#[derive(Debug, Default)]
pub struct StackResourcePage {
    pub summaries: Vec<StackResourceSummary>,
    pub next_token: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct StackResourceSummary {
    pub resource_type: Option<String>,
    pub logical_id: Option<String>,
    pub physical_id: Option<String>,
}

/// Seam over the CloudFormation client so the snapshot is testable without
/// the cloud.
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    async fn list_stack_resources_page(
        &self,
        stack_name: &StackName,
        next_token: Option<String>,
    ) -> Result<StackResourcePage, CloudApiError>;
}

#[derive(Default)]
pub struct StackSnapshot {
    resources: RwLock<HashMap<LogicalResourceId, StackResource>>,
}

impl StackSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paginate the stack to completion, keeping every entry that carries
    /// all three of type, logical ID and physical ID.
    pub async fn load(
        &self,
        cfn: &dyn CloudFormationApi,
        stack_name: &StackName,
    ) -> Result<(), CloudApiError> {
        let mut next_token = None;
        loop {
            let page = cfn
                .list_stack_resources_page(stack_name, next_token.take())
                .await?;
            let mut resources = self.resources.write().expect("snapshot lock poisoned");
            for summary in page.summaries {
                let (Some(ty), Some(logical), Some(physical)) = (
                    summary.resource_type,
                    summary.logical_id,
                    summary.physical_id,
                ) else {
                    continue;
                };
                let logical_id = LogicalResourceId::new(logical);
                resources.insert(
                    logical_id.clone(),
                    StackResource {
                        resource_type: ResourceType::new(ty),
                        logical_id,
                        physical_id: PhysicalResourceId::new(physical),
                        props: None,
                    },
                );
            }
            drop(resources);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(()),
            }
        }
    }

    pub fn get(&self, logical_id: &LogicalResourceId) -> Option<StackResource> {
        self.resources
            .read()
            .expect("snapshot lock poisoned")
            .get(logical_id)
            .cloned()
    }

    /// Attach the input properties first seen for a logical ID. Later calls
    /// for the same ID keep the original capture.
    pub fn record_props(&self, logical_id: &LogicalResourceId, props: &Map<String, Value>) {
        let mut resources = self.resources.write().expect("snapshot lock poisoned");
        if let Some(resource) = resources.get_mut(logical_id) {
            if resource.props.is_none() {
                resource.props = Some(props.clone());
            }
        }
    }

    /// Logical IDs whose type matches and whose lowercased logical ID
    /// contains the given lowercased needle.
    pub fn correlate(&self, resource_type: &ResourceType, needle_lower: &str) -> Vec<StackResource> {
        let mut matches: Vec<StackResource> = self
            .resources
            .read()
            .expect("snapshot lock poisoned")
            .values()
            .filter(|r| {
                r.resource_type == *resource_type
                    && r.logical_id.as_str().to_lowercase().contains(needle_lower)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
        matches
    }

    pub fn len(&self) -> usize {
        self.resources.read().expect("snapshot lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Used by tests and the capture summary; insertion order is not
    /// meaningful, so entries come back sorted by logical ID.
    pub fn entries(&self) -> Vec<StackResource> {
        let mut all: Vec<StackResource> = self
            .resources
            .read()
            .expect("snapshot lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
        all
    }

    /// Test seeding helper.
    pub fn insert(&self, resource: StackResource) {
        self.resources
            .write()
            .expect("snapshot lock poisoned")
            .insert(resource.logical_id.clone(), resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PagedCfn {
        pages: std::sync::Mutex<Vec<StackResourcePage>>,
    }

    #[async_trait]
    impl CloudFormationApi for PagedCfn {
        async fn list_stack_resources_page(
            &self,
            _stack_name: &StackName,
            _next_token: Option<String>,
        ) -> Result<StackResourcePage, CloudApiError> {
            let mut pages = self.pages.lock().unwrap();
            Ok(pages.remove(0))
        }
    }

    fn summary(ty: &str, logical: &str, physical: &str) -> StackResourceSummary {
        StackResourceSummary {
            resource_type: Some(ty.to_string()),
            logical_id: Some(logical.to_string()),
            physical_id: Some(physical.to_string()),
        }
    }

    #[tokio::test]
    async fn test_load_paginates_and_skips_incomplete() {
        let cfn = PagedCfn {
            pages: std::sync::Mutex::new(vec![
                StackResourcePage {
                    summaries: vec![
                        summary("AWS::S3::Bucket", "Bucket", "my-bucket"),
                        StackResourceSummary {
                            resource_type: Some("AWS::S3::Bucket".to_string()),
                            logical_id: Some("NoPhysical".to_string()),
                            physical_id: None,
                        },
                    ],
                    next_token: Some("page2".to_string()),
                },
                StackResourcePage {
                    summaries: vec![summary("AWS::SQS::Queue", "Queue", "queue-url")],
                    next_token: None,
                },
            ]),
        };

        let snapshot = StackSnapshot::new();
        snapshot
            .load(&cfn, &StackName::new("my-stack"))
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get(&LogicalResourceId::new("Bucket")).is_some());
        assert!(snapshot.get(&LogicalResourceId::new("NoPhysical")).is_none());
    }

    #[tokio::test]
    async fn test_record_props_first_wins() {
        let snapshot = StackSnapshot::new();
        snapshot.insert(StackResource {
            resource_type: ResourceType::new("AWS::S3::Bucket"),
            logical_id: LogicalResourceId::new("Bucket"),
            physical_id: PhysicalResourceId::new("my-bucket"),
            props: None,
        });

        let mut first = Map::new();
        first.insert("BucketName".to_string(), "a".into());
        let mut second = Map::new();
        second.insert("BucketName".to_string(), "b".into());

        let id = LogicalResourceId::new("Bucket");
        snapshot.record_props(&id, &first);
        snapshot.record_props(&id, &second);
        assert_eq!(snapshot.get(&id).unwrap().props, Some(first));
    }

    #[test]
    fn test_correlate_is_case_insensitive() {
        let snapshot = StackSnapshot::new();
        snapshot.insert(StackResource {
            resource_type: ResourceType::new("AWS::S3::Bucket"),
            logical_id: LogicalResourceId::new("MyBucket1EAC1B2B"),
            physical_id: PhysicalResourceId::new("my-bucket"),
            props: None,
        });
        let matches = snapshot.correlate(&ResourceType::new("AWS::S3::Bucket"), "mybucket");
        assert_eq!(matches.len(), 1);
        assert!(snapshot
            .correlate(&ResourceType::new("AWS::SQS::Queue"), "mybucket")
            .is_empty());
    }
}
