//! External references: nodes whose content lives in a backing store and is
//! materialized on first access.
//!
//! A reference is created dirty (or clean, when its content is already
//! present). Reading its children or a non-static attribute while dirty
//! fetches the content through the policy's [`ContentSource`], patches it into
//! the tree in place and marks the reference clean. Content stays until
//! [`Node::clear_cache`] drops it again, either explicitly or because the
//! policy's [`Cache`] evicted the reference.
//!
//! After each synchronization the policy expands its next stages: matches of a
//! stage selector become further dirty (or clean) references with their own
//! policy, and static templates are appended as fresh copies.
mod cache;
mod config;
mod diff;
mod error;
mod reference;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

pub use cache::{AccessOrderCache, Cache, UnboundedCache};
pub use config::PolicyConfig;
pub use error::CachingError;
pub(crate) use reference::ReferenceState;

use crate::compiler::ir::Path;
use crate::engine::Context;
use crate::model::{Access, Node};

/// Produces the current content of an external reference.
///
/// The returned node is a detached tree whose attributes, value and children
/// describe the reference; its own name is ignored.
pub trait ContentSource: Send + Sync {
    fn fetch(&self, reference: &Node) -> Result<Node, CachingError>;
}

impl<F> ContentSource for F
where
    F: Fn(&Node) -> Result<Node, CachingError> + Send + Sync,
{
    fn fetch(&self, reference: &Node) -> Result<Node, CachingError> {
        self(reference)
    }
}

/// Attribute names a dirty reference answers without synchronizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributePattern {
    /// `*`
    Any,
    /// `prefix:*`
    Prefix(String),
    Exact(String),
}

impl AttributePattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            AttributePattern::Any
        } else if let Some(prefix) = pattern.strip_suffix(":*") {
            AttributePattern::Prefix(prefix.to_owned())
        } else {
            AttributePattern::Exact(pattern.to_owned())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            AttributePattern::Any => true,
            AttributePattern::Prefix(prefix) => {
                name.split_once(':').is_some_and(|(candidate, _)| candidate == prefix)
            }
            AttributePattern::Exact(exact) => exact == name,
        }
    }
}

/// Rule turning selected descendants of a synchronized reference into
/// references of their own.
#[derive(Clone)]
pub struct NextStage {
    pub select: Path,
    /// Policy of the created references; `None` reuses the expanding policy.
    pub policy: Option<Arc<CachingPolicy>>,
    pub dirty: bool,
}

impl fmt::Debug for NextStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextStage")
            .field("select", &self.select.source())
            .field("recursive", &self.policy.is_none())
            .field("dirty", &self.dirty)
            .finish()
    }
}

pub struct CachingPolicy {
    source: Arc<dyn ContentSource>,
    cache: Arc<dyn Cache>,
    static_attributes: Vec<AttributePattern>,
    next_stages: Vec<NextStage>,
    static_stages: Vec<Node>,
}

impl fmt::Debug for CachingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingPolicy")
            .field("cache", &self.cache)
            .field("static_attributes", &self.static_attributes)
            .field("next_stages", &self.next_stages)
            .field("static_stages", &self.static_stages.len())
            .finish()
    }
}

impl CachingPolicy {
    pub fn builder(source: impl ContentSource + 'static) -> CachingPolicyBuilder {
        CachingPolicyBuilder::new(Arc::new(source))
    }

    /// Builds a policy from an annotation node, see
    /// [`CachingPolicyBuilder::configure`].
    pub fn configure(
        source: impl ContentSource + 'static,
        annotation: &Node,
        policies: &std::collections::HashMap<String, Arc<CachingPolicy>>,
    ) -> Result<Arc<CachingPolicy>, CachingError> {
        Ok(Self::builder(source).configure(annotation, policies)?.build())
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn static_attributes(&self) -> &[AttributePattern] {
        &self.static_attributes
    }

    pub fn next_stages(&self) -> &[NextStage] {
        &self.next_stages
    }

    pub fn is_static_attribute(&self, name: &str) -> bool {
        self.static_attributes.iter().any(|pattern| pattern.matches(name))
    }

    /// Access hook of every reference governed by this policy.
    pub(crate) fn on_access(&self, reference: &Node, access: Access<'_>) -> Result<(), CachingError> {
        self.cache.touch(reference);
        if let Access::Attribute(name) = access
            && self.is_static_attribute(name)
        {
            return Ok(());
        }
        if !reference.is_dirty() {
            return Ok(());
        }
        self.sync(reference)
    }

    /// Materializes `reference` if it is dirty.
    ///
    /// No-op on a clean reference and while the tree is already being patched
    /// by another synchronization. On failure the reference stays dirty.
    pub fn sync(&self, reference: &Node) -> Result<(), CachingError> {
        let state = reference.reference_state()?;
        let root = reference.root();
        if root.0.sync_lock.load(Ordering::Acquire) {
            trace!(?reference, "sync lock held, skipping nested synchronization");
            return Ok(());
        }
        if !state.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(?reference, "synchronizing reference");
        match self.materialize(reference, &root, state) {
            Ok(()) => {
                debug!(?reference, "reference synchronized");
                Ok(())
            }
            Err(error) => {
                state.dirty.store(true, Ordering::Release);
                Err(error)
            }
        }
    }

    fn materialize(&self, reference: &Node, root: &Node, state: &ReferenceState) -> Result<(), CachingError> {
        let content = self.source.fetch(reference)?;
        check_content(reference, &content)?;
        for template in &self.static_stages {
            content.attach_unobserved(template.deep_clone());
        }
        {
            let Some(_guard) = SyncGuard::acquire(root) else {
                state.dirty.store(true, Ordering::Release);
                return Ok(());
            };
            diff::patch(reference, &content, self);
            self.expand_next_stages(reference)?;
        }
        self.cache.add(reference);
        Ok(())
    }

    /// Inserts externally sourced `content` as a child of a clean reference.
    /// Ignored while the reference is dirty, the next synchronization brings
    /// the content anyway.
    pub fn insert(&self, reference: &Node, index: usize, content: Node) -> Result<(), CachingError> {
        if reference.reference_state()?.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        check_content(reference, &content)?;
        reference.raw_insert_child(index, content);
        self.expand_next_stages(reference)
    }

    /// Patches a clean reference with externally sourced `content`, as a
    /// synchronization would, without consulting the content source.
    pub fn update(&self, reference: &Node, content: &Node) -> Result<(), CachingError> {
        if reference.reference_state()?.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        check_content(reference, content)?;
        let root = reference.root();
        let Some(_guard) = SyncGuard::acquire(&root) else {
            return Err(CachingError::Unsupported("update during synchronization"));
        };
        diff::patch(reference, content, self);
        self.expand_next_stages(reference)
    }

    /// Removes the child at `index` of a clean reference. References inside
    /// the removed subtree leave their caches.
    pub fn remove(&self, reference: &Node, index: usize) -> Result<Option<Node>, CachingError> {
        if reference.reference_state()?.dirty.load(Ordering::Acquire) {
            return Ok(None);
        }
        // forgotten while still attached, so the cache sees the ancestors
        if let Some(child) = reference.raw_children().get(index) {
            forget_references(child);
        }
        Ok(reference.raw_remove_child(index))
    }

    fn expand_next_stages(&self, reference: &Node) -> Result<(), CachingError> {
        for stage in &self.next_stages {
            let matches = stage
                .select
                .evaluate(&Context::new(reference))
                .map_err(|error| CachingError::Selector {
                    select: stage.select.source().to_owned(),
                    message: error.to_string(),
                })?;
            let policy = match &stage.policy {
                Some(policy) => Arc::clone(policy),
                None => Arc::clone(&reference.reference_state()?.policy),
            };
            for node in matches.iter().filter_map(|item| item.as_element()) {
                if node == reference || node.is_reference() || !reference.is_ancestor_of(node) {
                    continue;
                }
                replace_with_reference(node, Arc::clone(&policy), stage.dirty);
            }
        }
        Ok(())
    }
}

/// Swaps `node` for a reference carrying its name, attributes and value. A
/// clean reference also takes over the children.
fn replace_with_reference(node: &Node, policy: Arc<CachingPolicy>, dirty: bool) {
    let (Some(parent), Some(index)) = (node.parent(), node.index_in_parent()) else {
        return;
    };
    trace!(?node, dirty, "expanding next stage");
    let replacement = Node::with_state(node.name(), Some(ReferenceState::new(policy, dirty)));
    replacement.init_value(node.raw_value());
    for (name, value) in node.raw_attributes() {
        replacement.init_attribute(&name, value);
    }
    if dirty {
        for child in node.raw_children() {
            forget_references(&child);
        }
    }
    parent.raw_remove_child(index);
    if !dirty {
        while let Some(child) = node.raw_remove_child(0) {
            replacement.raw_add_child(child);
        }
    }
    parent.raw_insert_child(index, replacement);
}

/// Content patched into a reference must be a detached tree that does not
/// contain the reference.
fn check_content(reference: &Node, content: &Node) -> Result<(), CachingError> {
    if content.parent().is_some() {
        return Err(CachingError::invalid_content(reference, "content is attached to a tree"));
    }
    if content == reference || content.is_ancestor_of(reference) {
        return Err(CachingError::invalid_content(reference, "content contains the reference"));
    }
    Ok(())
}

/// Drops every reference below (and including) `node` from its cache. Must
/// run before `node` is detached.
fn forget_references(node: &Node) {
    if let Some(policy) = node.caching_policy() {
        policy.cache.remove(node);
    }
    for child in node.raw_children() {
        forget_references(&child);
    }
}

/// Holds the sync lock of a tree root. Nested synchronizations in the same
/// tree are skipped while it is alive.
pub(crate) struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    pub(crate) fn acquire(root: &'a Node) -> Option<Self> {
        root.0
            .sync_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(&root.0.sync_lock))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CachingPolicyBuilder {
    source: Arc<dyn ContentSource>,
    cache: Option<Arc<dyn Cache>>,
    static_attributes: Vec<AttributePattern>,
    next_stages: Vec<NextStage>,
    static_stages: Vec<Node>,
}

impl CachingPolicyBuilder {
    fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            cache: None,
            static_attributes: Vec::new(),
            next_stages: Vec::new(),
            static_stages: Vec::new(),
        }
    }

    /// Cache tracking synchronized references. Several policies may share one.
    /// Defaults to an [`UnboundedCache`].
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Adds an allow-list entry: an exact name, `prefix:*` or `*`.
    pub fn static_attribute(mut self, pattern: &str) -> Self {
        self.static_attributes.push(AttributePattern::parse(pattern));
        self
    }

    pub fn static_attributes<'a>(mut self, patterns: impl IntoIterator<Item = &'a str>) -> Self {
        self.static_attributes.extend(patterns.into_iter().map(AttributePattern::parse));
        self
    }

    pub fn next_stage(mut self, select: Path, policy: Arc<CachingPolicy>, dirty: bool) -> Self {
        self.next_stages.push(NextStage { select, policy: Some(policy), dirty });
        self
    }

    /// Next stage whose references use the policy being built.
    pub fn recursive_stage(mut self, select: Path, dirty: bool) -> Self {
        self.next_stages.push(NextStage { select, policy: None, dirty });
        self
    }

    /// Appends a copy of `template` to every synchronized reference.
    pub fn static_stage(mut self, template: Node) -> Self {
        self.static_stages.push(template);
        self
    }

    pub fn config(mut self, config: &PolicyConfig) -> Self {
        self.static_attributes.extend(config.static_attributes.iter().map(|pattern| AttributePattern::parse(pattern)));
        if let Some(capacity) = config.capacity {
            self.cache = Some(Arc::new(AccessOrderCache::new(capacity)));
        }
        self
    }

    pub fn build(self) -> Arc<CachingPolicy> {
        Arc::new(CachingPolicy {
            source: self.source,
            cache: self.cache.unwrap_or_else(|| Arc::new(UnboundedCache::default())),
            static_attributes: self.static_attributes,
            next_stages: self.next_stages,
            static_stages: self.static_stages,
        })
    }
}
