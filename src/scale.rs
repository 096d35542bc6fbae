//! Storage of measurement scales.
//!
//! Ordinal and nominal scales own an ordered list of values, interval scales
//! own a single unit row. Value ids are stable across updates: a value sent
//! back with its id is updated in place, so anything referring to it keeps
//! pointing at the same value.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row};
use tracing::debug;

use crate::compose::{Cast, Statement, WriteChain, WriteMode, to_value};
use crate::construct::{LabelFilter, QueryParams, Resource, ResourceKind, Scale, ScaleValue, UnitDescriptor};
use crate::datatype::Id;
use crate::error::{CodingError, Result};
use crate::interface::{Controller, Reader, Record, StreamReader, stream_rows};
use crate::persist::Database;

pub struct ScaleRow {
    id: Id,
    label: String,
    scale_type: String,
    unit: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    values: Option<String>,
}

impl Record for Scale {
    const KIND: ResourceKind = ResourceKind::Scale;
    type Raw = ScaleRow;
    fn fetch(row: &Row<'_>) -> rusqlite::Result<ScaleRow> {
        Ok(ScaleRow {
            id: row.get(0)?,
            label: row.get(1)?,
            scale_type: row.get(2)?,
            unit: row.get(3)?,
            min: row.get(4)?,
            max: row.get(5)?,
            values: row.get(6)?,
        })
    }
    fn scan(raw: &ScaleRow) -> Result<Scale> {
        let values: Vec<ScaleValue> = match &raw.values {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        let mut scale = Scale {
            id: raw.id,
            label: raw.label.clone(),
            scale_type: raw.scale_type.parse()?,
            unit: raw.unit.clone().map(|unit| UnitDescriptor { unit, min: raw.min, max: raw.max }),
            values: Some(values),
        };
        scale.normalize();
        Ok(scale)
    }
}

fn value_row<'a>(index: usize, value: &ScaleValue) -> Result<Vec<(&'a str, Value, Option<Cast>)>> {
    Ok(vec![
        ("position", to_value(&(index as i64))?, Some(Cast::Integer)),
        ("value", Value::Text(value.label.clone()), None),
    ])
}

#[derive(Clone)]
pub struct ScaleStore {
    database: Arc<Database>,
}

impl ScaleStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
    fn select(&self) -> Statement {
        let scales = self.database.table("scales");
        let units = self.database.table("units");
        let values = self.database.table("values");
        Statement::new(&format!(
            r#"
            select s.id, s.label, s.type, u.unit, u."min", u."max",
                (select json_group_array(json_object('id', v.id, 'label', v.label) order by v."index")
                    from {values} v where v.scale = s.id) as "values"
            from {scales} s
            left join {units} u on u.scale = s.id
            "#
        ))
    }
    fn select_owner(&self) -> Statement {
        let mut select = self.select();
        select.push("where s.id =");
        let owner = select.owner();
        select.push(owner);
        select
    }

    /// Inserts the given `(position, value)` pairs as new values of the owner.
    fn insert_values(&self, values: &[(usize, &ScaleValue)]) -> Result<Statement> {
        let mut insert = Statement::new(&format!(
            r#"insert into {} (scale, "index", label) select"#,
            self.database.table("values")
        ));
        let owner = insert.owner();
        insert.push(&format!("{owner}, v.column1, v.column2 from ("));
        let rows = values
            .iter()
            .map(|(index, value)| value_row(*index, value))
            .collect::<Result<Vec<_>>>()?;
        insert.push_values_rows(&rows)?;
        insert.push(") as v");
        Ok(insert)
    }

    fn insert_unit(&self, unit: &UnitDescriptor) -> Result<Statement> {
        let mut insert = Statement::new(&format!(
            r#"insert into {} (scale, unit, "min", "max") values ("#,
            self.database.table("units")
        ));
        let owner = insert.owner();
        insert.push(owner);
        insert.push(",");
        insert.push_value("unit", &unit.unit)?;
        insert.push(",");
        let min = insert.bind_cast("min", &unit.min, Cast::Real)?;
        insert.push(&min);
        insert.push(",");
        let max = insert.bind_cast("max", &unit.max, Cast::Real)?;
        insert.push(&max);
        insert.push(")");
        Ok(insert)
    }

    /// Steps that bring the owner's values in line with `values`: existing
    /// values are moved out of the way, values no longer listed are deleted,
    /// listed values with an id are updated, the rest are inserted.
    fn replace_values(&self, chain: &mut WriteChain, values: &[ScaleValue]) -> Result<()> {
        let table = self.database.table("values");

        let mut shift = Statement::new(&format!(r#"update {table} set "index" = -1 - "index" where scale ="#));
        let owner = shift.owner();
        shift.push(owner);
        chain.step(shift);

        let kept: Vec<(usize, &ScaleValue)> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.id.is_sentinel())
            .collect();
        let added: Vec<(usize, &ScaleValue)> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.id.is_sentinel())
            .collect();

        let mut prune = Statement::new(&format!("delete from {table} where scale ="));
        let owner = prune.owner();
        prune.push(owner);
        if !kept.is_empty() {
            let ids: Vec<Id> = kept.iter().map(|(_, value)| value.id).collect();
            prune.push("and id not in");
            prune.push_in_list("keep", &ids)?;
        }
        chain.step(prune);

        if !kept.is_empty() {
            let mut update = Statement::new("with v(id, position, label) as (");
            let rows = kept
                .iter()
                .map(|(index, value)| -> Result<Vec<(&str, Value, Option<Cast>)>> {
                    let mut row = vec![("kept", to_value(&value.id)?, Some(Cast::Integer))];
                    row.extend(value_row(*index, value)?);
                    Ok(row)
                })
                .collect::<Result<Vec<_>>>()?;
            update.push_values_rows(&rows)?;
            update.push(&format!(
                r#") update {table} set label = v.label, "index" = v.position from v where {table}.id = v.id and {table}.scale ="#
            ));
            let owner = update.owner();
            update.push(owner);
            chain.step(update);
        }

        if !added.is_empty() {
            chain.step(self.insert_values(&added)?);
        }
        Ok(())
    }

    /// Stores a new scale. Value ids are ignored and assigned afresh.
    pub fn create(&self, scale: &Scale) -> Result<Scale> {
        let mut primary = Statement::new(&format!("insert into {} (label, type) values (", self.database.table("scales")));
        primary.push_value("label", &scale.label)?;
        primary.push(",");
        primary.push_value("type", scale.scale_type.as_str())?;
        primary.push(") returning id");
        let mut chain = WriteChain::new(WriteMode::Insert, primary, self.select_owner());
        if scale.scale_type.has_values() {
            let values = scale.values.as_deref().unwrap_or_default();
            if !values.is_empty() {
                let positioned: Vec<(usize, &ScaleValue)> = values.iter().enumerate().collect();
                chain.step(self.insert_values(&positioned)?);
            }
        } else if let Some(unit) = &scale.unit {
            chain.step(self.insert_unit(unit)?);
        }
        let created: Scale = self.database.write(&chain)?;
        debug!(id = %created.id, scale_type = %created.scale_type, "created scale");
        Ok(created)
    }

    pub fn read(&self, id: Id) -> Result<Scale> {
        if id.is_sentinel() {
            return Err(CodingError::NotFound { kind: ResourceKind::Scale, id });
        }
        let mut select = self.select();
        select.push("where s.id =");
        select.push_value("id", &id)?;
        let connection = self.database.lock()?;
        let raw = connection
            .query_row(select.sql(), select.named_params(None).as_slice(), Scale::fetch)
            .optional()?;
        match raw {
            Some(raw) => Scale::scan(&raw),
            None => Err(CodingError::NotFound { kind: ResourceKind::Scale, id }),
        }
    }

    /// Replaces label and type of an existing scale together with its values
    /// or unit. Whatever belongs to the other kind of scale is removed.
    pub fn update(&self, scale: &Scale) -> Result<Scale> {
        if scale.id.is_sentinel() {
            return Err(CodingError::UnknownId { kind: ResourceKind::Scale, id: scale.id });
        }
        let mut primary = Statement::new(&format!("update {} set label =", self.database.table("scales")));
        primary.push_value("label", &scale.label)?;
        primary.push(", type =");
        primary.push_value("type", scale.scale_type.as_str())?;
        primary.push("where id =");
        primary.push_value("id", &scale.id)?;
        primary.push("returning id");
        let mut chain = WriteChain::new(WriteMode::Update(scale.id), primary, self.select_owner());

        let mut drop_unit = Statement::new(&format!("delete from {} where scale =", self.database.table("units")));
        let owner = drop_unit.owner();
        drop_unit.push(owner);
        chain.step(drop_unit);

        if scale.scale_type.has_values() {
            self.replace_values(&mut chain, scale.values.as_deref().unwrap_or_default())?;
        } else {
            let mut drop_values = Statement::new(&format!("delete from {} where scale =", self.database.table("values")));
            let owner = drop_values.owner();
            drop_values.push(owner);
            chain.step(drop_values);
            if let Some(unit) = &scale.unit {
                chain.step(self.insert_unit(unit)?);
            }
        }
        let updated: Scale = self.database.write(&chain)?;
        debug!(id = %updated.id, scale_type = %updated.scale_type, "updated scale");
        Ok(updated)
    }

    /// Deletes a scale with its values and unit.
    pub fn delete(&self, id: Id) -> Result<()> {
        if id.is_sentinel() {
            return Err(CodingError::UnknownId { kind: ResourceKind::Scale, id });
        }
        let connection = self.database.lock()?;
        let deleted = connection.execute(
            &format!("delete from {} where id = ?1", self.database.table("scales")),
            [&id],
        )?;
        if deleted == 0 {
            return Err(CodingError::UnknownId { kind: ResourceKind::Scale, id });
        }
        debug!(%id, "deleted scale");
        Ok(())
    }

    /// Scales carrying one of the labels, or all scales when none are given.
    pub fn query_statement(&self, filter: &LabelFilter) -> Result<Statement> {
        let mut select = self.select();
        if !filter.labels.is_empty() {
            select.push("where s.label in");
            select.push_in_list("label", &filter.labels)?;
        }
        select.push("order by s.id");
        Ok(select)
    }

    pub fn reader(&self, filter: LabelFilter) -> StreamReader<Scale> {
        let database = Arc::clone(&self.database);
        let statement = self.query_statement(&filter);
        StreamReader::spawn(self.database.settings().query_timeout(), move |results, abort| {
            let statement = statement?;
            stream_rows(&database, &statement, database.settings().backoff(), &results, &abort)
        })
    }
}

impl Controller for ScaleStore {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Scale
    }
    fn query(&self, params: &QueryParams) -> Box<dyn Reader> {
        Box::new(self.reader(LabelFilter::from_params(params)))
    }
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let scale = resource.as_scale_mut()?;
        *scale = ScaleStore::create(self, scale)?;
        Ok(())
    }
    fn read(&self, id: Id) -> Result<Resource> {
        Ok(ScaleStore::read(self, id)?.into())
    }
    fn update(&self, resource: &mut Resource) -> Result<()> {
        let scale = resource.as_scale_mut()?;
        *scale = ScaleStore::update(self, scale)?;
        Ok(())
    }
    fn delete(&self, id: Id) -> Result<()> {
        ScaleStore::delete(self, id)
    }
}
