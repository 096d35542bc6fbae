use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use coding::compose::Statement;
use coding::config::Settings;
use coding::construct::{Node, NodeFilter, Resource, ResourceKind, Scale};
use coding::datatype::{Id, OptionalId};
use coding::error::CodingError;
use coding::interface::{Reader, Record, stream_rows};
use coding::node::NodeStore;
use coding::persist::Database;
use coding::retry::{AbortReply, Backoff, request_abort};
use crossbeam_channel::bounded;
use rusqlite::Row;
use rusqlite::types::Type;

fn setup(settings: Settings) -> (Arc<Database>, NodeStore) {
    let database = Arc::new(Database::new(settings).expect("db"));
    (Arc::clone(&database), NodeStore::new(database))
}

fn roots(nodes: &NodeStore, labels: &[&str]) -> Vec<Node> {
    labels
        .iter()
        .map(|label| nodes.create(&Node::new(*label, OptionalId::none())).expect("create"))
        .collect()
}

#[test]
fn worker_delivers_rows_in_cursor_order_then_closes() {
    let (_db, nodes) = setup(Settings::in_memory("order"));
    let created = roots(&nodes, &["a", "b", "c"]);

    let (results_tx, results_rx) = bounded(0);
    let (_abort_tx, abort_rx) = bounded::<AbortReply>(1);
    let store = nodes.clone();
    let worker = std::thread::spawn(move || store.stream_query(&NodeFilter::default(), &results_tx, &abort_rx));

    let received: Vec<Node> = results_rx.iter().collect();
    assert_eq!(received, created);
    assert!(worker.join().unwrap().is_ok());
}

#[test]
fn abort_between_rows_is_acknowledged_with_none() {
    let (_db, nodes) = setup(Settings::in_memory("between"));
    let created = roots(&nodes, &["a", "b", "c"]);

    let (results_tx, results_rx) = bounded(0);
    let (abort_tx, abort_rx) = bounded::<AbortReply>(1);
    let store = nodes.clone();
    let worker = std::thread::spawn(move || store.stream_query(&NodeFilter::default(), &results_tx, &abort_rx));

    let first: Node = results_rx.recv().unwrap();
    assert_eq!(first.id, created[0].id);
    assert_eq!(request_abort(&abort_tx), None);
    assert!(worker.join().unwrap().is_ok());
    assert!(results_rx.recv().is_err(), "results channel closes after an abort");
}

#[test]
fn closing_early_releases_the_connection() {
    let (_db, nodes) = setup(Settings::in_memory("close"));
    roots(&nodes, &["a", "b", "c"]);

    let mut reader = nodes.reader(NodeFilter::default());
    let mut resource = Resource::from(Node::default());
    assert!(reader.read(&mut resource).unwrap());
    reader.close().unwrap();
    assert!(!reader.read(&mut resource).unwrap());

    // the worker is gone and the store carries on
    nodes.create(&Node::new("d", OptionalId::none())).unwrap();

    let mut dropped = nodes.reader(NodeFilter::default());
    assert!(dropped.read(&mut resource).unwrap());
    drop(dropped);
    nodes.create(&Node::new("e", OptionalId::none())).unwrap();
}

#[test]
fn end_of_stream_repeats() {
    let (_db, nodes) = setup(Settings::in_memory("end"));
    roots(&nodes, &["only"]);
    let mut reader = nodes.reader(NodeFilter::default());
    let mut resource = Resource::from(Node::default());
    assert!(reader.read(&mut resource).unwrap());
    assert_eq!(resource, Resource::Node(nodes.read(resource.id()).unwrap()));
    assert!(!reader.read(&mut resource).unwrap());
    assert!(!reader.read(&mut resource).unwrap());
}

#[test]
fn deadline_surfaces_the_last_error_and_sticks() {
    let mut settings = Settings::in_memory("deadline");
    settings.query_timeout_ms = 100;
    settings.backoff_ms = 5;
    let (db, nodes) = setup(settings);
    // every attempt to prepare the query now fails
    db.clean().unwrap();

    let started = Instant::now();
    let mut reader = nodes.reader(NodeFilter::default());
    let mut resource = Resource::from(Node::default());
    let error = reader.read(&mut resource).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    match &error {
        CodingError::Persistence(message) => assert!(message.contains("no such table"), "{message}"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(reader.read(&mut resource).unwrap_err(), error);
    reader.close().unwrap();
    assert_eq!(reader.read(&mut resource).unwrap_err(), error);
}

#[test]
fn reading_into_another_kind_is_unsupported() {
    let (_db, nodes) = setup(Settings::in_memory("kind"));
    roots(&nodes, &["a"]);
    let mut reader = nodes.reader(NodeFilter::default());
    let mut scale = Resource::from(Scale::default());
    assert!(matches!(reader.read(&mut scale), Err(CodingError::Unsupported { .. })));
    let mut node = Resource::from(Node::default());
    assert!(reader.read(&mut node).unwrap());
}

#[test]
fn store_calls_interleave_with_an_open_reader() {
    let (_db, nodes) = setup(Settings::in_memory("interleave"));
    let created = roots(&nodes, &["a", "b", "c"]);

    let mut reader = nodes.reader(NodeFilter::default());
    let mut resource = Resource::from(Node::default());
    assert!(reader.read(&mut resource).unwrap());
    assert_eq!(resource.id(), created[0].id);

    assert_eq!(nodes.read(created[1].id).unwrap(), created[1]);
    let leaf = nodes.create(&Node::new("leaf", OptionalId::some(created[0].id))).unwrap();
    assert_eq!(nodes.read(created[0].id).unwrap().children, vec![leaf.id]);

    assert!(reader.read(&mut resource).unwrap());
    assert_eq!(resource.id(), created[1].id);
    assert!(reader.read(&mut resource).unwrap());
    assert_eq!(resource.id(), created[2].id);
    assert!(!reader.read(&mut resource).unwrap());
}

/// A bare node id read from the first column.
struct NodeId(Id);

impl From<NodeId> for Resource {
    fn from(id: NodeId) -> Self {
        Resource::Node(Node { id: id.0, ..Node::default() })
    }
}

impl Record for NodeId {
    const KIND: ResourceKind = ResourceKind::Node;
    type Raw = Id;
    fn fetch(row: &Row<'_>) -> rusqlite::Result<Id> {
        row.get(0)
    }
    fn scan(raw: &Id) -> coding::error::Result<Self> {
        Ok(NodeId(*raw))
    }
}

static FETCH_FAILED: AtomicBool = AtomicBool::new(false);

/// Like [`NodeId`], but the first fetch of node 2 fails.
struct FlakyNodeId(Id);

impl From<FlakyNodeId> for Resource {
    fn from(id: FlakyNodeId) -> Self {
        Resource::Node(Node { id: id.0, ..Node::default() })
    }
}

impl Record for FlakyNodeId {
    const KIND: ResourceKind = ResourceKind::Node;
    type Raw = Id;
    fn fetch(row: &Row<'_>) -> rusqlite::Result<Id> {
        let id: Id = row.get(0)?;
        if id == Id(2) && !FETCH_FAILED.swap(true, Ordering::SeqCst) {
            return Err(rusqlite::Error::InvalidColumnType(0, "id".into(), Type::Integer));
        }
        Ok(id)
    }
    fn scan(raw: &Id) -> coding::error::Result<Self> {
        Ok(FlakyNodeId(*raw))
    }
}

#[test]
fn failed_fetch_is_retried_on_the_same_row() {
    let (db, nodes) = setup(Settings::in_memory("flakyfetch"));
    let created = roots(&nodes, &["a", "b", "c"]);
    let statement = Statement::new(&format!("select id from {} order by id", db.table("nodes")));

    let (results_tx, results_rx) = bounded(0);
    let (_abort_tx, abort_rx) = bounded::<AbortReply>(1);
    let backoff = Backoff::new(Duration::from_millis(5));
    let worker = std::thread::spawn(move || stream_rows::<FlakyNodeId>(&db, &statement, backoff, &results_tx, &abort_rx));

    let received: Vec<Id> = results_rx.iter().map(|FlakyNodeId(id)| id).collect();
    assert!(worker.join().unwrap().is_ok());
    assert!(FETCH_FAILED.load(Ordering::SeqCst));
    assert_eq!(received, created.iter().map(|node| node.id).collect::<Vec<_>>());
}

#[test]
fn failed_step_reruns_the_query_without_repeating_rows() {
    let (db, nodes) = setup(Settings::in_memory("flakystep"));
    let created = roots(&nodes, &["a", "b", "c"]);
    let faults = db.table("faults");
    db.lock()
        .unwrap()
        .execute_batch(&format!("create table {faults} (x integer); insert into {faults} values (1);"))
        .unwrap();
    // while a fault row exists, stepping onto node 2 fails: abs() of the
    // smallest integer overflows
    let statement = Statement::new(&format!(
        "select n.id, case when exists (select 1 from {faults}) then abs(n.id - 9223372036854775807 - 3) end \
         from {} n order by n.id",
        db.table("nodes")
    ));

    let (results_tx, results_rx) = bounded(0);
    let (_abort_tx, abort_rx) = bounded::<AbortReply>(1);
    let backoff = Backoff::new(Duration::from_millis(300));
    let worker_db = Arc::clone(&db);
    let started = Instant::now();
    let worker =
        std::thread::spawn(move || stream_rows::<NodeId>(&worker_db, &statement, backoff, &results_tx, &abort_rx));

    let NodeId(first) = results_rx.recv().unwrap();
    assert_eq!(first, created[0].id);
    std::thread::sleep(Duration::from_millis(100));
    db.lock().unwrap().execute(&format!("delete from {faults}"), []).unwrap();

    let rest: Vec<Id> = results_rx.iter().map(|NodeId(id)| id).collect();
    assert_eq!(rest, [created[1].id, created[2].id]);
    assert!(started.elapsed() >= Duration::from_millis(300), "the failed step was waited out");
    assert!(worker.join().unwrap().is_ok());
}
