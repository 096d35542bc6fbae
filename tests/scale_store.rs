use std::sync::Arc;

use coding::config::Settings;
use coding::construct::{LabelFilter, Resource, Scale, ScaleType, ScaleValue, UnitDescriptor};
use coding::datatype::Id;
use coding::error::CodingError;
use coding::interface::{Reader, read_all};
use coding::persist::Database;
use coding::scale::ScaleStore;

fn setup(prefix: &str) -> (Arc<Database>, ScaleStore) {
    let database = Arc::new(Database::new(Settings::in_memory(prefix)).expect("db"));
    (Arc::clone(&database), ScaleStore::new(database))
}

fn labels(scale: &Scale) -> Vec<&str> {
    scale
        .values
        .as_ref()
        .expect("values")
        .iter()
        .map(|value| value.label.as_str())
        .collect()
}

fn assert_one_of_unit_and_values(scale: &Scale) {
    assert_ne!(scale.unit.is_some(), scale.values.is_some(), "{scale:?}");
    assert_eq!(scale.values.is_some(), scale.scale_type.has_values());
}

fn count_values(database: &Database) -> i64 {
    database
        .lock()
        .unwrap()
        .query_row(&format!("select count(*) from {}", database.table("values")), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn ordinal_values_keep_their_order() {
    let (_db, scales) = setup("ordinal");
    let created = scales
        .create(&Scale::with_values("rank", ScaleType::Ordinal, &["No1", "No2", "No3"]))
        .unwrap();
    assert!(!created.id.is_sentinel());
    assert_eq!(labels(&created), ["No1", "No2", "No3"]);
    let values = created.values.as_ref().unwrap();
    assert!(values.iter().all(|value| !value.id.is_sentinel()));
    assert!(values[0].id != values[1].id && values[1].id != values[2].id);
    assert_one_of_unit_and_values(&created);
    assert_eq!(scales.read(created.id).unwrap(), created);
}

#[test]
fn value_update_keeps_ids_and_prunes() {
    let (db, scales) = setup("upsert");
    let created = scales
        .create(&Scale::with_values("rank", ScaleType::Ordinal, &["No1", "No2", "No3"]))
        .unwrap();
    let old = created.values.clone().unwrap();

    let mut changed = created.clone();
    changed.values = Some(vec![
        ScaleValue { id: old[2].id, label: "Three".into() },
        ScaleValue::new("No4"),
        old[0].clone(),
    ]);
    let updated = scales.update(&changed).unwrap();
    assert_eq!(labels(&updated), ["Three", "No4", "No1"]);
    let new = updated.values.as_ref().unwrap();
    assert_eq!(new[0].id, old[2].id);
    assert_eq!(new[2].id, old[0].id);
    assert!(!new[1].id.is_sentinel());
    assert!(old.iter().all(|value| value.id != new[1].id));
    assert_eq!(count_values(&db), 3);

    let mut emptied = updated.clone();
    emptied.values = Some(vec![]);
    let emptied = scales.update(&emptied).unwrap();
    assert_eq!(emptied.values, Some(vec![]));
    assert_eq!(count_values(&db), 0);
}

#[test]
fn interval_bounds_are_optional() {
    let (_db, scales) = setup("interval");
    let unit = UnitDescriptor { unit: "kg".into(), min: None, max: Some(250.0) };
    let created = scales.create(&Scale::interval("weight", unit.clone())).unwrap();
    assert_eq!(created.unit, Some(unit));
    assert_eq!(created.values, None);
    assert_eq!(scales.read(created.id).unwrap(), created);

    let mut rescaled = created.clone();
    rescaled.unit = Some(UnitDescriptor { unit: "g".into(), min: Some(0.0), max: None });
    let rescaled = scales.update(&rescaled).unwrap();
    assert_eq!(rescaled.unit.as_ref().map(|u| (u.unit.as_str(), u.min, u.max)), Some(("g", Some(0.0), None)));

    let bare = Scale {
        label: "length".into(),
        scale_type: ScaleType::Interval,
        ..Scale::default()
    };
    let bare = scales.create(&bare).unwrap();
    assert_eq!(bare.unit, Some(UnitDescriptor::default()));
}

#[test]
fn changing_type_swaps_values_for_unit() {
    let (db, scales) = setup("swap");
    let created = scales
        .create(&Scale::with_values("colour", ScaleType::Nominal, &["red", "green"]))
        .unwrap();
    assert_one_of_unit_and_values(&created);

    let mut interval = created.clone();
    interval.scale_type = ScaleType::Interval;
    interval.unit = Some(UnitDescriptor { unit: "nm".into(), min: Some(380.0), max: Some(750.0) });
    let interval = scales.update(&interval).unwrap();
    assert_one_of_unit_and_values(&interval);
    assert_eq!(interval.scale_type, ScaleType::Interval);
    assert_eq!(count_values(&db), 0);

    let mut nominal = interval.clone();
    nominal.scale_type = ScaleType::Nominal;
    nominal.values = Some(vec![ScaleValue::new("blue")]);
    let nominal = scales.update(&nominal).unwrap();
    assert_one_of_unit_and_values(&nominal);
    assert_eq!(labels(&nominal), ["blue"]);
}

#[test]
fn delete_takes_values_along() {
    let (db, scales) = setup("delete");
    let created = scales
        .create(&Scale::with_values("rank", ScaleType::Ordinal, &["a", "b"]))
        .unwrap();
    scales.delete(created.id).unwrap();
    assert!(matches!(scales.read(created.id), Err(CodingError::NotFound { .. })));
    assert_eq!(count_values(&db), 0);
    assert!(matches!(scales.delete(created.id), Err(CodingError::UnknownId { .. })));
}

#[test]
fn sentinel_and_unknown_ids() {
    let (_db, scales) = setup("ids");
    assert!(matches!(scales.read(Id(0)), Err(CodingError::NotFound { .. })));
    assert!(matches!(scales.delete(Id(0)), Err(CodingError::UnknownId { .. })));
    let mut missing = Scale::with_values("x", ScaleType::Nominal, &[]);
    assert!(matches!(scales.update(&missing), Err(CodingError::UnknownId { .. })));
    missing.id = Id(77);
    assert!(matches!(scales.update(&missing), Err(CodingError::UnknownId { id: Id(77), .. })));
}

#[test]
fn query_filters_by_label() {
    let (_db, scales) = setup("query");
    let a = scales.create(&Scale::with_values("a", ScaleType::Nominal, &["x"])).unwrap();
    let b = scales
        .create(&Scale::interval("b", UnitDescriptor { unit: "m".into(), ..UnitDescriptor::default() }))
        .unwrap();

    let mut everything = scales.reader(LabelFilter::default());
    let all = read_all(&mut everything, coding::construct::ResourceKind::Scale).unwrap();
    assert_eq!(all, [Resource::Scale(a.clone()), Resource::Scale(b.clone())]);

    let mut only_b = scales.reader(LabelFilter { labels: vec!["b".into()] });
    let mut resource = Resource::from(Scale::default());
    assert!(only_b.read(&mut resource).unwrap());
    assert_eq!(resource, Resource::Scale(b));
    assert!(!only_b.read(&mut resource).unwrap());
}
