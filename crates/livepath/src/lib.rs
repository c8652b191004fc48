//! Live path queries over a mutable tree.
//!
//! A path such as `//item[@state = 'open']/@id` is compiled once with
//! [`compile`] and can then be evaluated as a snapshot ([`Path::evaluate`]) or
//! kept live ([`Path::add_listener`]): the listener receives the initial
//! result and afterwards only the nodes that enter or leave it as the tree
//! changes.
//!
//! Parts of the tree may be external references (see [`caching`]) whose
//! content is fetched on first access, patched in place and dropped again when
//! a bounded cache evicts it.
//!
//! ```
//! use std::sync::Arc;
//! use livepath::{Context, PathListener, PathNode, ListenerError, Path, elem};
//! use parking_lot::Mutex;
//!
//! #[derive(Default)]
//! struct Ids(Mutex<Vec<String>>);
//!
//! impl PathListener for Ids {
//!     fn notify_added(&self, _: &Context, path: &Path, step: usize, nodes: &[PathNode]) -> Result<(), ListenerError> {
//!         if step == path.len() {
//!             self.0.lock().extend(nodes.iter().map(|node| node.try_string_value().unwrap()));
//!         }
//!         Ok(())
//!     }
//!
//!     fn notify_removed(&self, _: &Context, _: &Path, _: usize, _: &[PathNode]) -> Result<(), ListenerError> {
//!         Ok(())
//!     }
//! }
//!
//! let root = elem("r").child(elem("a").attr("id", "1")).build();
//! let path = livepath::compile("a/@id").unwrap();
//! let ids = Arc::new(Ids::default());
//! let handle = path.add_listener(Context::new(root.clone()), ids.clone()).unwrap();
//!
//! root.add_child(elem("a").attr("id", "2").build());
//! assert_eq!(*ids.0.lock(), ["1", "2"]);
//! handle.remove();
//! ```
pub mod caching;
pub mod chain;
pub mod compiler;
pub mod engine;
pub mod model;
pub mod parser;

pub use caching::{
    AccessOrderCache, AttributePattern, Cache, CachingError, CachingPolicy, CachingPolicyBuilder, ContentSource,
    NextStage, PolicyConfig, UnboundedCache,
};
pub use chain::{ListenerError, ListenerHandle, PathListener};
pub use compiler::compile;
pub use compiler::ir::Path;
pub use engine::{Context, Error, Result, Value};
pub use model::{Node, NodeBuilder, NodeEvent, NodeObserver, PathNode, PathNodeKind, elem};
