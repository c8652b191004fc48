use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::{AccessOrderCache, CachingError, CachingPolicy, CachingPolicyBuilder};
use crate::compile;
use crate::model::Node;

/// Serializable subset of a caching policy.
///
/// ```
/// use livepath::caching::PolicyConfig;
///
/// let config = PolicyConfig::from_json(r#"{ "static_attributes": ["id", "x:*"], "capacity": 64 }"#).unwrap();
/// assert_eq!(config.capacity, Some(64));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub static_attributes: Vec<String>,
    /// Bounded access-order cache of this size; unbounded when absent.
    pub capacity: Option<usize>,
}

impl PolicyConfig {
    pub fn from_json(text: &str) -> Result<Self, CachingError> {
        serde_json::from_str(text).map_err(|error| CachingError::Configuration(error.to_string()))
    }
}

impl CachingPolicyBuilder {
    /// Reads settings from an annotation node:
    ///
    /// ```text
    /// <policy static="id label x:*" capacity="32">
    ///   <stage select="child::item" dirty="true" policy="items"/>
    ///   <template><status/></template>
    /// </policy>
    /// ```
    ///
    /// A `stage` without `policy` expands into references of the policy being
    /// built. Named policies are looked up in `policies`. Every child of a
    /// `template` element becomes a static stage.
    pub fn configure(
        mut self,
        annotation: &Node,
        policies: &HashMap<String, Arc<CachingPolicy>>,
    ) -> Result<Self, CachingError> {
        if let Some(patterns) = annotation.attribute("static") {
            self = self.static_attributes(patterns.split_whitespace());
        }
        if let Some(capacity) = annotation.attribute("capacity") {
            let capacity = capacity
                .trim()
                .parse::<usize>()
                .map_err(|error| CachingError::Configuration(format!("capacity '{capacity}': {error}")))?;
            self = self.cache(Arc::new(AccessOrderCache::new(capacity)));
        }

        for child in annotation.children() {
            match child.name().as_ref() {
                "stage" => {
                    let select = child
                        .attribute("select")
                        .ok_or_else(|| CachingError::Configuration("stage without select".to_owned()))?;
                    let path = compile(&select).map_err(|error| CachingError::Selector {
                        select: select.clone(),
                        message: error.to_string(),
                    })?;
                    let dirty = match child.attribute("dirty").as_deref() {
                        None | Some("true") => true,
                        Some("false") => false,
                        Some(other) => {
                            return Err(CachingError::Configuration(format!("dirty must be true or false, got '{other}'")));
                        }
                    };
                    self = match child.attribute("policy") {
                        Some(name) => {
                            let policy = policies
                                .get(&name)
                                .ok_or_else(|| CachingError::Configuration(format!("unknown policy '{name}'")))?;
                            self.next_stage(path, Arc::clone(policy), dirty)
                        }
                        None => self.recursive_stage(path, dirty),
                    };
                }
                "template" => {
                    for template in child.children() {
                        self = self.static_stage(template.deep_clone());
                    }
                }
                other => {
                    return Err(CachingError::Configuration(format!("unexpected element '{other}' in policy annotation")));
                }
            }
        }
        Ok(self)
    }
}
