//! Coding – a store for coding trees, their scales and metrics, kept in SQLite.
//!
//! A *coding tree* is a hierarchy of labeled nodes used to classify things
//! (a taxonomy, a codebook). Next to the tree the store keeps:
//! * [`construct::Scale`]s – nominal, ordinal or interval measurement scales.
//!   Nominal and ordinal scales enumerate their values in order, interval scales
//!   carry a unit with optional bounds.
//! * [`construct::Metric`]s – named bundles of scales.
//! * Node references (links from a node to other nodes) and the metrics a
//!   node is measured with.
//!
//! Every resource kind is served through the same [`interface::Controller`]
//! contract (create, read, update, delete, query), so a transport only needs to
//! know how to decode a [`construct::Resource`] and which controller to call.
//!
//! ## Modules
//! * [`datatype`] – identifiers ([`datatype::Id`], [`datatype::OptionalId`]) and
//!   the [`datatype::Relation`] wire type.
//! * [`construct`] – the resources, their JSON encoding and query filters.
//! * [`compose`] – parameterized SQL: the [`compose::Statement`] builder and
//!   multi-table [`compose::WriteChain`]s.
//! * [`retry`] – exponential backoff that can be interrupted by an abort
//!   handshake.
//! * [`persist`] – schema management, connections and transactions.
//! * [`node`], [`scale`], [`metric`] – one store per resource kind.
//! * [`interface`] – the controller/reader contract and the threaded
//!   [`interface::StreamReader`] that every query runs on.
//! * [`config`] – settings from a file and `CODING_*` environment variables.
//! * [`server`] – an HTTP front end on axum.
//!
//! ## Persistence
//! All tables of a store share a prefix (`coding_nodes`, `coding_scales`, …), so
//! several stores can live side by side in one database file. A view named
//! `<prefix>_version` records the schema version; [`persist::Database::new`]
//! creates the schema when the view is missing and refuses to open a schema
//! newer than it understands.
//!
//! Writes touching several tables run as a [`compose::WriteChain`] inside a
//! single transaction, and answer with the resource as stored, derived
//! relations included.
//!
//! ## Queries
//! Queries stream. Each one runs on its own thread and hands over one row at a
//! time; a failing step is retried with backoff until it succeeds or the
//! consumer gives up. Giving up (a passed deadline or an early
//! [`interface::Reader::close`]) is a handshake: the worker answers with the
//! last error it saw, if any, and stops.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use coding::config::Settings;
//! use coding::construct::{Node, NodeFilter};
//! use coding::datatype::OptionalId;
//! use coding::interface::Reader;
//! use coding::node::NodeStore;
//! use coding::persist::Database;
//!
//! let database = Arc::new(Database::new(Settings::in_memory("quickstart")).unwrap());
//! let nodes = NodeStore::new(Arc::clone(&database));
//! let root = nodes.create(&Node::new("root", OptionalId::none())).unwrap();
//! nodes.create(&Node::new("leaf", OptionalId::some(root.id))).unwrap();
//! assert_eq!(nodes.read(root.id).unwrap().children.len(), 1);
//!
//! let mut reader = nodes.reader(NodeFilter::default());
//! let mut found = coding::construct::Resource::from(Node::default());
//! assert!(reader.read(&mut found).unwrap());
//! assert_eq!(found.id(), root.id);
//! assert!(!reader.read(&mut found).unwrap());
//! ```

pub mod compose;
pub mod config;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod interface;
pub mod metric;
pub mod node;
pub mod persist;
pub mod retry;
pub mod scale;
pub mod server;
