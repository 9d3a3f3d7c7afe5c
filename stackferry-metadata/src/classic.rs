//! Metadata source for the classic `aws:` provider family.
//!
//! Entries come from an embedded schema-derived index; a small hand-curated
//! set replaces schema entries after that pass, because the classic provider
//! occasionally imports under a different identity than CloudFormation
//! records (inline IAM policies are the notorious case).

use std::collections::HashMap;
use std::sync::OnceLock;

use stackferry_core::{PulumiToken, ResourceType};

use crate::bundle::{infer_separator, Bundle};
use crate::MetadataSource;

static CLASSIC_METADATA: &str = include_str!("../assets/aws-classic-metadata.json");
static CLASSIC_SOURCE: OnceLock<ClassicSource> = OnceLock::new();

/// The process-wide classic metadata source.
pub fn classic_source() -> &'static ClassicSource {
    CLASSIC_SOURCE.get_or_init(|| {
        let bundle = Bundle::parse(CLASSIC_METADATA)
            .expect("embedded aws classic metadata bundle must parse");
        ClassicSource::from_bundle(bundle)
    })
}

#[derive(Debug, Clone)]
struct ClassicEntry {
    cf_type: ResourceType,
    primary_identifier: Vec<String>,
    separator: String,
}

pub struct ClassicSource {
    resources: HashMap<String, ClassicEntry>,
    reverse: HashMap<ResourceType, PulumiToken>,
}

impl ClassicSource {
    fn from_bundle(bundle: Bundle) -> Self {
        let mut resources: HashMap<String, ClassicEntry> = bundle
            .resources
            .iter()
            .map(|(token, spec)| {
                let separator = spec
                    .id_format
                    .as_deref()
                    .map(infer_separator)
                    .unwrap_or_else(|| "/".to_string());
                (
                    token.clone(),
                    ClassicEntry {
                        cf_type: ResourceType::new(spec.cf_type.clone()),
                        primary_identifier: spec.primary_identifier.clone(),
                        separator,
                    },
                )
            })
            .collect();

        for (token, entry) in curated_overrides() {
            resources.insert(token.to_string(), entry);
        }

        // Reverse index with the same fewest-siblings preference as the
        // native source. Several classic tokens share AWS::IAM::Policy;
        // the plain Policy resource must win for stack correlation.
        let mut module_counts: HashMap<String, usize> = HashMap::new();
        for token in resources.keys() {
            *module_counts.entry(token_module(token).to_string()).or_default() += 1;
        }
        let mut reverse: HashMap<ResourceType, PulumiToken> = HashMap::new();
        let mut tokens: Vec<&String> = resources.keys().collect();
        tokens.sort();
        for token in tokens {
            let entry = &resources[token];
            let candidate_count = module_counts[token_module(token)];
            let keep_existing = reverse.get(&entry.cf_type).is_some_and(|existing| {
                module_counts[token_module(existing.as_str())] <= candidate_count
            });
            if !keep_existing {
                reverse.insert(entry.cf_type.clone(), PulumiToken::new(token.clone()));
            }
        }

        Self { resources, reverse }
    }
}

fn curated_overrides() -> Vec<(&'static str, ClassicEntry)> {
    vec![
        (
            "aws:iam/policy:Policy",
            ClassicEntry {
                cf_type: ResourceType::new("AWS::IAM::Policy"),
                primary_identifier: vec!["arn".to_string()],
                separator: "/".to_string(),
            },
        ),
        (
            "aws:iam/rolePolicy:RolePolicy",
            ClassicEntry {
                cf_type: ResourceType::new("AWS::IAM::Policy"),
                primary_identifier: vec!["role".to_string(), "name".to_string()],
                separator: ":".to_string(),
            },
        ),
        (
            "aws:iam/rolePolicyAttachment:RolePolicyAttachment",
            ClassicEntry {
                cf_type: ResourceType::new("AWS::IAM::Policy"),
                primary_identifier: vec!["policyArn".to_string(), "role".to_string()],
                separator: "/".to_string(),
            },
        ),
        (
            "aws:servicediscovery/privateDnsNamespace:PrivateDnsNamespace",
            ClassicEntry {
                cf_type: ResourceType::new("AWS::ServiceDiscovery::PrivateDnsNamespace"),
                primary_identifier: vec!["id".to_string(), "vpc".to_string()],
                separator: ":".to_string(),
            },
        ),
    ]
}

impl MetadataSource for ClassicSource {
    fn resource_type(&self, token: &PulumiToken) -> Option<ResourceType> {
        self.resources
            .get(token.as_str())
            .map(|entry| entry.cf_type.clone())
    }

    fn resource_token(&self, resource_type: &ResourceType) -> Option<PulumiToken> {
        self.reverse.get(resource_type).cloned()
    }

    fn primary_identifier(&self, token: &PulumiToken) -> Option<Vec<String>> {
        let entry = self.resources.get(token.as_str())?;
        if entry.primary_identifier.is_empty() {
            return None;
        }
        Some(entry.primary_identifier.clone())
    }

    fn separator(&self, token: &PulumiToken) -> String {
        self.resources
            .get(token.as_str())
            .map(|entry| entry.separator.clone())
            .unwrap_or_else(|| "/".to_string())
    }
}

fn token_module(token: &str) -> &str {
    token.split(':').nth(1).unwrap_or("")
}
