use std::sync::Arc;

use coding::config::Settings;
use coding::construct::{LabelFilter, Metric, Node, Resource, ResourceKind, Scale, ScaleType};
use coding::datatype::{Id, OptionalId};
use coding::error::CodingError;
use coding::interface::read_all;
use coding::metric::MetricStore;
use coding::node::NodeStore;
use coding::persist::Database;
use coding::scale::ScaleStore;

struct Stores {
    nodes: NodeStore,
    scales: ScaleStore,
    metrics: MetricStore,
}

fn setup(prefix: &str) -> Stores {
    let database = Arc::new(Database::new(Settings::in_memory(prefix)).expect("db"));
    Stores {
        nodes: NodeStore::new(Arc::clone(&database)),
        scales: ScaleStore::new(Arc::clone(&database)),
        metrics: MetricStore::new(database),
    }
}

fn scale(stores: &Stores, label: &str) -> Id {
    stores
        .scales
        .create(&Scale::with_values(label, ScaleType::Nominal, &["yes", "no"]))
        .expect("scale")
        .id
}

#[test]
fn metric_scales_are_replaced_wholesale() {
    let stores = setup("replace");
    let s1 = scale(&stores, "s1");
    let s2 = scale(&stores, "s2");

    let created = stores.metrics.create(&Metric::new("quality", vec![s2, s1])).unwrap();
    assert!(!created.id.is_sentinel());
    assert_eq!(created.scales, vec![s1, s2]);
    assert_eq!(stores.metrics.read(created.id).unwrap(), created);

    let mut narrowed = created.clone();
    narrowed.label = "quality2".into();
    narrowed.scales = vec![s2];
    let narrowed = stores.metrics.update(&narrowed).unwrap();
    assert_eq!(narrowed.label, "quality2");
    assert_eq!(narrowed.scales, vec![s2]);
}

#[test]
fn deleting_a_scale_unlinks_it() {
    let stores = setup("unlink");
    let s1 = scale(&stores, "s1");
    let metric = stores.metrics.create(&Metric::new("m", vec![s1])).unwrap();
    stores.scales.delete(s1).unwrap();
    assert!(stores.metrics.read(metric.id).unwrap().scales.is_empty());
}

#[test]
fn metric_in_use_by_a_node_cannot_be_deleted() {
    let stores = setup("restrict");
    let metric = stores.metrics.create(&Metric::new("m", vec![])).unwrap();
    let mut node = Node::new("measured", OptionalId::none());
    node.metrics = vec![metric.id];
    let node = stores.nodes.create(&node).unwrap();
    assert_eq!(node.metrics, vec![metric.id]);

    assert!(matches!(stores.metrics.delete(metric.id), Err(CodingError::Persistence(_))));

    let mut unmeasured = node.clone();
    unmeasured.metrics.clear();
    stores.nodes.update(&unmeasured).unwrap();
    stores.metrics.delete(metric.id).unwrap();
    assert!(stores.metrics.read(metric.id).unwrap_err().is_not_found());
}

#[test]
fn unknown_scale_fails_the_whole_write() {
    let stores = setup("atomic");
    let result = stores.metrics.create(&Metric::new("broken", vec![Id(999)]));
    assert!(matches!(result, Err(CodingError::Persistence(_))));
    let mut reader = stores.metrics.reader(LabelFilter::default());
    assert!(read_all(&mut reader, ResourceKind::Metric).unwrap().is_empty());
}

#[test]
fn sentinel_ids() {
    let stores = setup("sentinel");
    assert!(matches!(stores.metrics.read(Id(0)), Err(CodingError::NotFound { .. })));
    assert!(matches!(stores.metrics.update(&Metric::new("x", vec![])), Err(CodingError::UnknownId { .. })));
    assert!(matches!(stores.metrics.delete(Id(0)), Err(CodingError::UnknownId { .. })));
}

#[test]
fn query_by_label() {
    let stores = setup("labels");
    let a = stores.metrics.create(&Metric::new("a", vec![])).unwrap();
    let b = stores.metrics.create(&Metric::new("b", vec![])).unwrap();
    let mut reader = stores.metrics.reader(LabelFilter { labels: vec!["a".into(), "b".into()] });
    assert_eq!(
        read_all(&mut reader, ResourceKind::Metric).unwrap(),
        [Resource::Metric(a), Resource::Metric(b)]
    );
    let mut reader = stores.metrics.reader(LabelFilter { labels: vec!["c".into()] });
    assert!(read_all(&mut reader, ResourceKind::Metric).unwrap().is_empty());
}
