//! Storage of metrics.
//!
//! A metric only owns its label; the scales it bundles are link rows that are
//! replaced in full on every write. Nodes refer to metrics, and a metric in
//! use by a node cannot be deleted.

use std::sync::Arc;

use rusqlite::{OptionalExtension, Row};
use tracing::debug;

use crate::compose::{Link, Statement, WriteChain, WriteMode};
use crate::construct::{LabelFilter, Metric, QueryParams, Resource, ResourceKind};
use crate::datatype::{Id, id_array};
use crate::error::{CodingError, Result};
use crate::interface::{Controller, Reader, Record, StreamReader, stream_rows};
use crate::persist::Database;

pub struct MetricRow {
    id: Id,
    label: String,
    scales: Option<String>,
}

impl Record for Metric {
    const KIND: ResourceKind = ResourceKind::Metric;
    type Raw = MetricRow;
    fn fetch(row: &Row<'_>) -> rusqlite::Result<MetricRow> {
        Ok(MetricRow {
            id: row.get(0)?,
            label: row.get(1)?,
            scales: row.get(2)?,
        })
    }
    fn scan(raw: &MetricRow) -> Result<Metric> {
        Ok(Metric {
            id: raw.id,
            label: raw.label.clone(),
            scales: id_array(raw.scales.as_deref())?,
        })
    }
}

/// Metrics and the scales they bundle.
#[derive(Clone)]
pub struct MetricStore {
    database: Arc<Database>,
}

impl MetricStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
    fn select(&self) -> Statement {
        let metrics = self.database.table("metrics");
        let metric_scale = self.database.table("metric_scale");
        Statement::new(&format!(
            r#"
            select m.id, m.label,
                (select json_group_array(ms.scale order by ms.scale) from {metric_scale} ms where ms.metric = m.id) as scales
            from {metrics} m
            "#
        ))
    }
    fn chain(&self, mode: WriteMode, primary: Statement, metric: &Metric) -> Result<WriteChain> {
        let mut select = self.select();
        select.push("where m.id =");
        let owner = select.owner();
        select.push(owner);
        let metric_scale = self.database.table("metric_scale");
        let mut chain = WriteChain::new(mode, primary, select);
        chain.relation(
            Link { table: &metric_scale, owner_column: "metric", target_column: "scale" },
            "scale",
            &metric.scales,
        )?;
        Ok(chain)
    }

    pub fn create(&self, metric: &Metric) -> Result<Metric> {
        let mut primary = Statement::new(&format!("insert into {} (label) values (", self.database.table("metrics")));
        primary.push_value("label", &metric.label)?;
        primary.push(") returning id");
        let created: Metric = self.database.write(&self.chain(WriteMode::Insert, primary, metric)?)?;
        debug!(id = %created.id, scales = created.scales.len(), "created metric");
        Ok(created)
    }

    pub fn read(&self, id: Id) -> Result<Metric> {
        if id.is_sentinel() {
            return Err(CodingError::NotFound { kind: ResourceKind::Metric, id });
        }
        let mut select = self.select();
        select.push("where m.id =");
        select.push_value("id", &id)?;
        let connection = self.database.lock()?;
        let raw = connection
            .query_row(select.sql(), select.named_params(None).as_slice(), Metric::fetch)
            .optional()?;
        match raw {
            Some(raw) => Metric::scan(&raw),
            None => Err(CodingError::NotFound { kind: ResourceKind::Metric, id }),
        }
    }

    pub fn update(&self, metric: &Metric) -> Result<Metric> {
        if metric.id.is_sentinel() {
            return Err(CodingError::UnknownId { kind: ResourceKind::Metric, id: metric.id });
        }
        let mut primary = Statement::new(&format!("update {} set label =", self.database.table("metrics")));
        primary.push_value("label", &metric.label)?;
        primary.push("where id =");
        primary.push_value("id", &metric.id)?;
        primary.push("returning id");
        let updated: Metric = self.database.write(&self.chain(WriteMode::Update(metric.id), primary, metric)?)?;
        debug!(id = %updated.id, "updated metric");
        Ok(updated)
    }

    /// Deletes a metric and its scale links. Fails while a node still uses it.
    pub fn delete(&self, id: Id) -> Result<()> {
        if id.is_sentinel() {
            return Err(CodingError::UnknownId { kind: ResourceKind::Metric, id });
        }
        let connection = self.database.lock()?;
        let deleted = connection.execute(
            &format!("delete from {} where id = ?1", self.database.table("metrics")),
            [&id],
        )?;
        if deleted == 0 {
            return Err(CodingError::UnknownId { kind: ResourceKind::Metric, id });
        }
        debug!(%id, "deleted metric");
        Ok(())
    }

    pub fn query_statement(&self, filter: &LabelFilter) -> Result<Statement> {
        let mut select = self.select();
        if !filter.labels.is_empty() {
            select.push("where m.label in");
            select.push_in_list("label", &filter.labels)?;
        }
        select.push("order by m.id");
        Ok(select)
    }

    pub fn reader(&self, filter: LabelFilter) -> StreamReader<Metric> {
        let database = Arc::clone(&self.database);
        let statement = self.query_statement(&filter);
        StreamReader::spawn(self.database.settings().query_timeout(), move |results, abort| {
            let statement = statement?;
            stream_rows(&database, &statement, database.settings().backoff(), &results, &abort)
        })
    }
}

impl Controller for MetricStore {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Metric
    }
    fn query(&self, params: &QueryParams) -> Box<dyn Reader> {
        Box::new(self.reader(LabelFilter::from_params(params)))
    }
    fn create(&self, resource: &mut Resource) -> Result<()> {
        let metric = resource.as_metric_mut()?;
        *metric = MetricStore::create(self, metric)?;
        Ok(())
    }
    fn read(&self, id: Id) -> Result<Resource> {
        Ok(MetricStore::read(self, id)?.into())
    }
    fn update(&self, resource: &mut Resource) -> Result<()> {
        let metric = resource.as_metric_mut()?;
        *metric = MetricStore::update(self, metric)?;
        Ok(())
    }
    fn delete(&self, id: Id) -> Result<()> {
        MetricStore::delete(self, id)
    }
}
