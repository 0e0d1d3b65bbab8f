//! # Cuttree
//!
//! The interior-node store and traversal engine of one streaming
//! random-cut tree — the core of online anomaly detection over a sliding
//! window of high-dimensional points.
//!
//! A tree is mutated in place at high rate (one insertion and one deletion
//! per sample), so interior nodes live in a bounded arena with an explicit
//! free list, stored column-wise with width-specialized integer cells.
//! Each interior node owns a cached bounding box and range sum kept
//! consistent under insertion, deletion, and lazy reconstruction; scoring
//! is a recursive traversal with precise rules for when to consult the
//! cache versus rebuild.
//!
//! ## Design
//!
//! - One integer namespace covers interior slots and leaves; a leaf index
//!   is `capacity + 1 + point_index` over an external point store.
//! - The bounding-box cache covers a configurable fraction of the arena;
//!   everything outside it is reconstructed on demand.
//! - Cut drawing is a policy behind a trait; the engine itself is
//!   deterministic.
//!
//! ## Concurrency
//!
//! A tree is single-threaded by contract: callers serialize all mutations
//! and queries. A forest may fan out across trees in parallel, each tree
//! in isolation.

pub mod boundingbox;
pub mod boxcache;
pub mod coordinator;
pub mod cut;
pub mod intervals;
pub mod nodestore;
pub mod pointstore;
pub mod scoring;
pub mod tree;
pub mod visitor;
pub mod width;

pub(crate) mod tracing_helpers;

pub use boundingbox::BoundingBox;
pub use coordinator::UpdateCoordinator;
pub use cut::{Cut, CutSource, RandomCutSource};
pub use pointstore::{PointStore, PointStoreView};
pub use tree::{Layout, RandomCutTree, TreeBuilder, TreeColumns, TreeError, UpdateResult};
pub use visitor::{MultiVisitor, NodeView, Visitor};
