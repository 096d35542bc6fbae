//! Storage of the coding tree.
//!
//! Children are never stored: they are whatever nodes name this node as their
//! parent, aggregated when a node is read. References and metrics live in
//! link tables that are rewritten in full whenever the node is.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rusqlite::{OptionalExtension, Row};
use tracing::debug;

use crate::compose::{Link, Statement, WriteChain, WriteMode};
use crate::construct::{Node, NodeFilter, QueryParams, Resource, ResourceKind};
use crate::datatype::{Id, OptionalId, id_array};
use crate::error::{CodingError, Result};
use crate::interface::{Controller, Reader, Record, StreamReader, stream_rows};
use crate::persist::Database;
use crate::retry::AbortReply;

/// Column values of one node row, aggregates still JSON encoded.
pub struct NodeRow {
    id: Id,
    label: String,
    parent: OptionalId,
    children: Option<String>,
    references: Option<String>,
    metrics: Option<String>,
}

impl Record for Node {
    const KIND: ResourceKind = ResourceKind::Node;
    type Raw = NodeRow;
    fn fetch(row: &Row<'_>) -> rusqlite::Result<NodeRow> {
        Ok(NodeRow {
            id: row.get(0)?,
            label: row.get(1)?,
            parent: row.get(2)?,
            children: row.get(3)?,
            references: row.get(4)?,
            metrics: row.get(5)?,
        })
    }
    fn scan(raw: &NodeRow) -> Result<Node> {
        Ok(Node {
            id: raw.id,
            label: raw.label.clone(),
            parent: raw.parent,
            children: id_array(raw.children.as_deref())?,
            references: id_array(raw.references.as_deref())?,
            metrics: id_array(raw.metrics.as_deref())?,
        })
    }
}

#[derive(Clone)]
pub struct NodeStore {
    database: Arc<Database>,
}

impl NodeStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
    fn links(&self) -> (String, String) {
        (self.database.table("links"), self.database.table("node_metric"))
    }
    fn select(&self) -> Statement {
        let nodes = self.database.table("nodes");
        let (links, node_metric) = self.links();
        Statement::new(&format!(
            r#"
            select n.id, n.label, n.parent,
                (select json_group_array(c.id order by c.id) from {nodes} c where c.parent = n.id) as children,
                (select json_group_array(l."to" order by l."to") from {links} l where l."from" = n.id) as refs,
                (select json_group_array(m.metric order by m.metric) from {node_metric} m where m.node = n.id) as metrics
            from {nodes} n
            "#
        ))
    }
    fn select_owner(&self) -> Statement {
        let mut select = self.select();
        select.push("where n.id =");
        let owner = select.owner();
        select.push(owner);
        select
    }
    fn chain(&self, mode: WriteMode, primary: Statement, node: &Node) -> Result<WriteChain> {
        let (links, node_metric) = self.links();
        let mut chain = WriteChain::new(mode, primary, self.select_owner());
        chain.relation(
            Link { table: &links, owner_column: r#""from""#, target_column: r#""to""# },
            "reference",
            &node.references,
        )?;
        chain.relation(
            Link { table: &node_metric, owner_column: "node", target_column: "metric" },
            "metric",
            &node.metrics,
        )?;
        Ok(chain)
    }

    /// Stores a new node with its references and metrics. The id of `node`
    /// and its children are ignored.
    pub fn create(&self, node: &Node) -> Result<Node> {
        let mut primary = Statement::new(&format!("insert into {} (label, parent) values (", self.database.table("nodes")));
        primary.push_value("label", &node.label)?;
        primary.push(",");
        primary.push_value("parent", &node.parent)?;
        primary.push(") returning id");
        let chain = self.chain(WriteMode::Insert, primary, node)?;
        let created: Node = self.database.write(&chain)?;
        debug!(id = %created.id, label = %created.label, "created node");
        Ok(created)
    }

    pub fn read(&self, id: Id) -> Result<Node> {
        if id.is_sentinel() {
            return Err(CodingError::NotFound { kind: ResourceKind::Node, id });
        }
        let mut select = self.select();
        select.push("where n.id =");
        select.push_value("id", &id)?;
        let connection = self.database.lock()?;
        let raw = connection
            .query_row(select.sql(), select.named_params(None).as_slice(), Node::fetch)
            .optional()?;
        match raw {
            Some(raw) => Node::scan(&raw),
            None => Err(CodingError::NotFound { kind: ResourceKind::Node, id }),
        }
    }

    /// Replaces label, parent, references and metrics of an existing node.
    pub fn update(&self, node: &Node) -> Result<Node> {
        if node.id.is_sentinel() {
            return Err(CodingError::UnknownId { kind: ResourceKind::Node, id: node.id });
        }
        let mut primary = Statement::new(&format!("update {} set label =", self.database.table("nodes")));
        primary.push_value("label", &node.label)?;
        primary.push(", parent =");
        primary.push_value("parent", &node.parent)?;
        primary.push("where id =");
        primary.push_value("id", &node.id)?;
        primary.push("returning id");
        let chain = self.chain(WriteMode::Update(node.id), primary, node)?;
        let updated: Node = self.database.write(&chain)?;
        debug!(id = %updated.id, "updated node");
        Ok(updated)
    }

    /// Deletes a node. Its descendants and link rows go with it.
    pub fn delete(&self, id: Id) -> Result<()> {
        if id.is_sentinel() {
            return Err(CodingError::UnknownId { kind: ResourceKind::Node, id });
        }
        let connection = self.database.lock()?;
        let deleted = connection.execute(
            &format!("delete from {} where id = ?1", self.database.table("nodes")),
            [&id],
        )?;
        if deleted == 0 {
            return Err(CodingError::UnknownId { kind: ResourceKind::Node, id });
        }
        debug!(%id, "deleted node");
        Ok(())
    }

    /// The select for a filter.
    ///
    /// * labels only: those labels anywhere in the tree
    /// * parents only: children of those parents
    /// * both: children of those parents carrying those labels
    /// * neither: the roots
    ///
    /// Parent id 0 stands for "no parent" and matches the roots.
    pub fn query_statement(&self, filter: &NodeFilter) -> Result<Statement> {
        let mut select = self.select();
        if !filter.labels.is_empty() {
            select.push("where n.label in");
            select.push_in_list("label", &filter.labels)?;
            if !filter.parents.is_empty() {
                select.push("and");
                push_parents(&mut select, &filter.parents)?;
            }
        } else if !filter.parents.is_empty() {
            select.push("where");
            push_parents(&mut select, &filter.parents)?;
        } else {
            select.push("where n.parent is null");
        }
        select.push("order by n.id");
        Ok(select)
    }

    /// Runs a filtered query on the calling thread, sending every node to
    /// `results` until done or aborted.
    pub fn stream_query(&self, filter: &NodeFilter, results: &Sender<Node>, abort: &Receiver<AbortReply>) -> Result<()> {
        let statement = self.query_statement(filter)?;
        debug!(sql = statement.sql(), "node query");
        stream_rows(&self.database, &statement, self.database.settings().backoff(), results, abort)
    }

    /// Runs a filtered query on a worker thread.
    pub fn reader(&self, filter: NodeFilter) -> StreamReader<Node> {
        let store = self.clone();
        StreamReader::spawn(self.database.settings().query_timeout(), move |results, abort| {
            store.stream_query(&filter, &results, &abort)
        })
    }
}

fn push_parents(select: &mut Statement, parents: &[Id]) -> Result<()> {
    let roots = parents.iter().any(Id::is_sentinel);
    let parents: Vec<Id> = parents.iter().copied().filter(|id| !id.is_sentinel()).collect();
    select.push("(");
    if !parents.is_empty() {
        select.push("n.parent in");
        select.push_in_list("parent", &parents)?;
        if roots {
            select.push("or");
        }
    }
    if roots {
        select.push("n.parent is null");
    }
    select.push(")");
    Ok(())
}

impl Controller for NodeStore {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Node
    }
    fn query(&self, params: &QueryParams) -> Box<dyn Reader> {
        match NodeFilter::from_params(params) {
            Ok(filter) => Box::new(self.reader(filter)),
            Err(error) => Box::new(StreamReader::<Node>::failed(error)),
        }
    }
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let node = resource.as_node_mut()?;
        *node = NodeStore::create(self, node)?;
        Ok(())
    }
    fn read(&self, id: Id) -> Result<Resource> {
        Ok(NodeStore::read(self, id)?.into())
    }
    fn update(&self, resource: &mut Resource) -> Result<()> {
        let node = resource.as_node_mut()?;
        *node = NodeStore::update(self, node)?;
        Ok(())
    }
    fn delete(&self, id: Id) -> Result<()> {
        NodeStore::delete(self, id)
    }
}
