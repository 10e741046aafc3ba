//! Record operations bound to one table of one database.
//!
//! Statements are generated on the calling side from the table schema and
//! the dialect's templates; the work itself is queued on the database
//! worker. Table and column names come from schema metadata and are quoted
//! into the statement. Data values are always bound as parameters.

use super::database::Database;
use super::dialect::{Dialect, StatementKind, render};
use super::query::{CompiledWhere, Query};
use super::request::{Request, RequestHandle};
use super::table::Table;
use crate::models::{PrimaryFieldMap, Record, RecordField, Section};
use crate::types::DataType;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params_from_iter};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Outcome of [`TableSelection::insert_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row had the record's key; a row was inserted.
    Inserted,
    /// A row with the record's key existed; its non-key columns were
    /// updated.
    Updated,
}

/// Operation surface for one table within one database.
///
/// Holds nothing beyond the database and table references, so any number
/// of selections of the same table can coexist.
pub struct TableSelection<R> {
    database: Database,
    table: Arc<Table<R>>,
}

impl<R> Clone for TableSelection<R> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            table: Arc::clone(&self.table),
        }
    }
}

impl<R> fmt::Debug for TableSelection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSelection")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<R: Record> TableSelection<R> {
    pub(crate) const fn new(database: Database, table: Arc<Table<R>>) -> Self {
        Self { database, table }
    }

    /// The table schema.
    #[must_use]
    pub fn table(&self) -> &Table<R> {
        &self.table
    }

    /// Table name as stored.
    #[must_use]
    pub fn name(&self) -> &str {
        self.table.name()
    }

    /// The owning database.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// Lists the table's column names as stored.
    ///
    /// Resolves to `None` if the table does not exist in storage and to an
    /// error if introspection itself fails.
    #[instrument(skip(self), fields(operation = "get_column_names", table = %self.name()))]
    pub fn get_column_names(&self) -> RequestHandle<Option<Vec<String>>> {
        const OP: &str = "get_column_names";
        let dialect = self.dialect();
        let sql = render(
            dialect.template(StatementKind::ColumnNames),
            &[("table", dialect.quote_identifier(self.name()).as_str())],
        );
        let name_index = dialect.column_name_index();
        self.database.add_request(Request::new(OP, move |conn| {
            let mut statement = conn
                .prepare(&sql)
                .map_err(|e| statement_error(OP, &sql, &e))?;
            let rows = statement
                .query_map([], |row| row.get::<_, String>(name_index))
                .map_err(|e| statement_error(OP, &sql, &e))?;
            let names = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| statement_error(OP, &sql, &e))?;
            Ok((!names.is_empty()).then_some(names))
        }))
    }

    /// Adds a column to the stored table.
    ///
    /// The registered schema is not changed. Key columns cannot be added.
    #[instrument(skip(self, field), fields(operation = "add_column", table = %self.name(), field = %field.name()))]
    pub fn add_column(&self, field: &RecordField) -> RequestHandle<()> {
        const OP: &str = "add_column";
        if field.is_primary() {
            return RequestHandle::failed(
                OP,
                Error::SchemaMismatch {
                    table: self.name().to_string(),
                    detail: format!("cannot add key field '{}'", field.name()),
                },
            );
        }
        let dialect = self.dialect();
        let sql = render(
            dialect.template(StatementKind::AddColumn),
            &[
                ("table", dialect.quote_identifier(self.name()).as_str()),
                ("field", dialect.quote_identifier(field.name()).as_str()),
                ("type", dialect.column_type(field.data_type(), field.max_size()).as_str()),
            ],
        );
        self.database.add_request(Request::new(OP, move |conn| {
            conn.execute(&sql, [])
                .map(|_| ())
                .map_err(|e| statement_error(OP, &sql, &e))
        }))
    }

    /// Fetches at most one matching record.
    ///
    /// Without a query (or with an empty one) this is the first record in
    /// storage order, which the backend does not keep stable.
    #[instrument(skip_all, fields(operation = "get_first_record", table = %self.name()))]
    pub fn get_first_record(&self, query: Option<&Query>) -> RequestHandle<Option<R>> {
        const OP: &str = "get_first_record";
        let prepared = self.select(StatementKind::SelectFirst, query).map(|(sql, compiled)| {
            let table = Arc::clone(&self.table);
            Request::new(OP, move |conn: &mut Connection| {
                Ok(query_records(conn, OP, &sql, &compiled, &table)?
                    .into_iter()
                    .next())
            })
        });
        self.submit(OP, prepared)
    }

    /// Fetches every matching record, in the order the backend returns them.
    #[instrument(skip_all, fields(operation = "get_record_list", table = %self.name()))]
    pub fn get_record_list(&self, query: Option<&Query>) -> RequestHandle<Vec<R>> {
        const OP: &str = "get_record_list";
        let prepared = self.select(StatementKind::SelectAll, query).map(|(sql, compiled)| {
            let table = Arc::clone(&self.table);
            Request::new(OP, move |conn: &mut Connection| {
                query_records(conn, OP, &sql, &compiled, &table)
            })
        });
        self.submit(OP, prepared)
    }

    /// Counts matching records. Resolves to `0` when nothing matches.
    #[instrument(skip_all, fields(operation = "get_amount_of_records", table = %self.name()))]
    pub fn get_amount_of_records(&self, query: Option<&Query>) -> RequestHandle<u64> {
        const OP: &str = "get_amount_of_records";
        let prepared = self.compile(query, 1).map(|compiled| {
            let sql = self.render_with_where(StatementKind::Count, &compiled, &[]);
            let table = Arc::clone(&self.table);
            Request::new(OP, move |conn: &mut Connection| {
                query_count(conn, OP, &sql, &compiled, &table)
            })
        });
        self.submit(OP, prepared)
    }

    /// Fetches the record identified by `keys`.
    #[instrument(skip_all, fields(operation = "get_record", table = %self.name()))]
    pub fn get_record(&self, keys: &PrimaryFieldMap) -> RequestHandle<Option<R>> {
        if let Err(e) = self.table.check_primary(keys) {
            return RequestHandle::failed("get_first_record", e);
        }
        self.get_first_record(Some(&Query::from(keys)))
    }

    /// Stores a record: inserts it if no row has its key, otherwise updates
    /// every non-key column of that row.
    ///
    /// The key lookup and the write run as one queued unit inside a
    /// transaction, so no other request can interleave between them.
    #[instrument(skip_all, fields(operation = "insert_record", table = %self.name()))]
    pub fn insert_record(&self, record: &R) -> RequestHandle<UpsertOutcome> {
        const OP: &str = "insert_record";
        let prepared = self.prepare_upsert(record).map(|upsert| {
            let table = Arc::clone(&self.table);
            Request::new(OP, move |conn: &mut Connection| upsert.run(conn, &table))
        });
        self.submit(OP, prepared)
    }

    /// Deletes every record matching `query`, resolving to the number of
    /// deleted rows.
    ///
    /// An empty query matches, and deletes, every record.
    #[instrument(skip_all, fields(operation = "remove_all_records", table = %self.name()))]
    pub fn remove_all_records(&self, query: &Query) -> RequestHandle<usize> {
        const OP: &str = "remove_all_records";
        let prepared = self.compile(Some(query), 1).map(|compiled| {
            let sql = self.render_with_where(StatementKind::Delete, &compiled, &[]);
            let table = Arc::clone(&self.table);
            Request::new(OP, move |conn: &mut Connection| {
                execute_where(conn, OP, &sql, &compiled, &table)
            })
        });
        self.submit(OP, prepared)
    }

    /// Deletes the stored row of `record`, located by its key fields.
    pub fn remove_record(&self, record: &R) -> RequestHandle<usize> {
        match Query::new().with_record(&self.table, record) {
            Ok(query) => self.remove_all_records(&query),
            Err(e) => RequestHandle::failed("remove_all_records", e),
        }
    }

    fn dialect(&self) -> &dyn Dialect {
        self.database.dialect()
    }

    fn submit<T: Send + 'static>(
        &self,
        operation: &'static str,
        prepared: Result<Request<T>>,
    ) -> RequestHandle<T> {
        match prepared {
            Ok(request) => self.database.add_request(request),
            Err(e) => {
                tracing::debug!(operation, error = %e, "request rejected before queueing");
                RequestHandle::failed(operation, e)
            },
        }
    }

    /// Compiles `query`, rejecting fields the table does not declare.
    fn compile(&self, query: Option<&Query>, first_index: usize) -> Result<CompiledWhere> {
        let empty = Query::new();
        let query = query.unwrap_or(&empty);
        if let Some((field, _)) = query
            .constraints()
            .iter()
            .find(|(field, _)| self.table.field(field).is_none())
        {
            return Err(Error::SchemaMismatch {
                table: self.name().to_string(),
                detail: format!("query references unknown field '{field}'"),
            });
        }
        Ok(query.compile_where(self.dialect(), first_index))
    }

    fn select(&self, kind: StatementKind, query: Option<&Query>) -> Result<(String, CompiledWhere)> {
        let compiled = self.compile(query, 1)?;
        let fields = self.quoted_fields(self.table.fields().iter());
        let sql = self.render_with_where(kind, &compiled, &[("fields", fields.as_str())]);
        Ok((sql, compiled))
    }

    fn render_with_where(
        &self,
        kind: StatementKind,
        compiled: &CompiledWhere,
        extra: &[(&str, &str)],
    ) -> String {
        let dialect = self.dialect();
        let table = dialect.quote_identifier(self.name());
        let mut substitutions = vec![("table", table.as_str()), ("where", compiled.clause())];
        substitutions.extend_from_slice(extra);
        render(dialect.template(kind), &substitutions)
    }

    fn quoted_fields<'a>(&self, fields: impl Iterator<Item = &'a RecordField>) -> String {
        let dialect = self.dialect();
        fields
            .map(|field| dialect.quote_identifier(field.name()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn prepare_upsert(&self, record: &R) -> Result<Upsert> {
        let dialect = self.dialect();
        let values = self.table.record_values(record)?;
        let keys = self.table.primary_map(record)?;
        let key_where = Query::from(&keys).compile_where(dialect, 1);

        let count_sql = self.render_with_where(StatementKind::Count, &key_where, &[]);

        let placeholders: Vec<String> = (1..=self.table.fields().len())
            .map(|idx| dialect.placeholder(idx))
            .collect();
        let insert_sql = render(
            dialect.template(StatementKind::Insert),
            &[
                ("table", dialect.quote_identifier(self.name()).as_str()),
                ("fields", self.quoted_fields(self.table.fields().iter()).as_str()),
                ("values", placeholders.join(", ").as_str()),
            ],
        );
        let insert_values = backend_values(self.table.fields().iter(), &values)?;

        let value_fields: Vec<&RecordField> = self.table.value_fields().collect();
        let update = if value_fields.is_empty() {
            None
        } else {
            let assignments: Vec<String> = value_fields
                .iter()
                .enumerate()
                .map(|(offset, field)| {
                    format!(
                        "{} = {}",
                        dialect.quote_identifier(field.name()),
                        dialect.placeholder(offset + 1)
                    )
                })
                .collect();
            let update_where = Query::from(&keys).compile_where(dialect, value_fields.len() + 1);
            let sql = self.render_with_where(
                StatementKind::Update,
                &update_where,
                &[("assignments", assignments.join(", ").as_str())],
            );
            let values = backend_values(value_fields.iter().copied(), &values)?;
            Some(UpsertUpdate {
                sql,
                values,
                key_where: update_where,
            })
        };

        Ok(Upsert {
            count_sql,
            key_where,
            insert_sql,
            insert_values,
            update,
        })
    }
}

/// Prepared statements of one upsert.
struct Upsert {
    count_sql: String,
    key_where: CompiledWhere,
    insert_sql: String,
    insert_values: Vec<SqlValue>,
    update: Option<UpsertUpdate>,
}

struct UpsertUpdate {
    sql: String,
    values: Vec<SqlValue>,
    key_where: CompiledWhere,
}

impl Upsert {
    const OP: &'static str = "insert_record";

    fn run<R: Record>(&self, conn: &mut Connection, table: &Table<R>) -> Result<UpsertOutcome> {
        let tx = conn
            .transaction()
            .map_err(|e| statement_error(Self::OP, "BEGIN", &e))?;

        let existing = query_count(&tx, Self::OP, &self.count_sql, &self.key_where, table)?;
        let outcome = if existing == 0 {
            tx.execute(&self.insert_sql, params_from_iter(self.insert_values.iter()))
                .map_err(|e| statement_error(Self::OP, &self.insert_sql, &e))?;
            UpsertOutcome::Inserted
        } else {
            if let Some(update) = &self.update {
                let mut statement = tx
                    .prepare(&update.sql)
                    .map_err(|e| statement_error(Self::OP, &update.sql, &e))?;
                for (offset, value) in update.values.iter().enumerate() {
                    statement
                        .raw_bind_parameter(offset + 1, value)
                        .map_err(|e| statement_error(Self::OP, &update.sql, &e))?;
                }
                update
                    .key_where
                    .bind_placeholders(&mut statement, Self::OP, &update.sql, column_type(table))?;
                statement
                    .raw_execute()
                    .map_err(|e| statement_error(Self::OP, &update.sql, &e))?;
            }
            UpsertOutcome::Updated
        };

        tx.commit()
            .map_err(|e| statement_error(Self::OP, "COMMIT", &e))?;
        Ok(outcome)
    }
}

fn statement_error(operation: &'static str, sql: &str, e: &rusqlite::Error) -> Error {
    Error::Statement {
        operation: operation.to_string(),
        statement: sql.to_string(),
        cause: e.to_string(),
    }
}

fn column_type<R>(table: &Table<R>) -> impl Fn(&str) -> Option<DataType> + '_
where
    R: Record,
{
    |name| table.field(name).map(RecordField::data_type)
}

fn backend_values<'a>(
    fields: impl Iterator<Item = &'a RecordField>,
    values: &Section,
) -> Result<Vec<SqlValue>> {
    fields
        .map(|field| {
            let value = values.get(field.name()).cloned().unwrap_or_default();
            field.data_type().to_backend(&value)
        })
        .collect()
}

fn query_records<R: Record>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    compiled: &CompiledWhere,
    table: &Table<R>,
) -> Result<Vec<R>> {
    let mut statement = conn
        .prepare(sql)
        .map_err(|e| statement_error(operation, sql, &e))?;
    compiled.bind_placeholders(&mut statement, operation, sql, column_type(table))?;
    let mut rows = statement.raw_query();
    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(|e| statement_error(operation, sql, &e))? {
        records.push(hydrate(table, row, operation, sql)?);
    }
    Ok(records)
}

fn query_count<R: Record>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    compiled: &CompiledWhere,
    table: &Table<R>,
) -> Result<u64> {
    let mut statement = conn
        .prepare(sql)
        .map_err(|e| statement_error(operation, sql, &e))?;
    compiled.bind_placeholders(&mut statement, operation, sql, column_type(table))?;
    let mut rows = statement.raw_query();
    let count = match rows.next().map_err(|e| statement_error(operation, sql, &e))? {
        Some(row) => row
            .get::<_, i64>(0)
            .map_err(|e| statement_error(operation, sql, &e))?,
        None => 0,
    };
    Ok(u64::try_from(count).unwrap_or(0))
}

fn execute_where<R: Record>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    compiled: &CompiledWhere,
    table: &Table<R>,
) -> Result<usize> {
    let mut statement = conn
        .prepare(sql)
        .map_err(|e| statement_error(operation, sql, &e))?;
    compiled.bind_placeholders(&mut statement, operation, sql, column_type(table))?;
    statement
        .raw_execute()
        .map_err(|e| statement_error(operation, sql, &e))
}

/// Builds a record from a row selected with the table's field list.
fn hydrate<R: Record>(
    table: &Table<R>,
    row: &Row<'_>,
    operation: &'static str,
    sql: &str,
) -> Result<R> {
    let mut keys = PrimaryFieldMap::new();
    let mut section = Section::new();
    for (idx, field) in table.fields().iter().enumerate() {
        let raw = row
            .get_ref(idx)
            .map_err(|e| statement_error(operation, sql, &e))?;
        let value = field.data_type().from_backend(raw)?;
        if field.is_primary() {
            keys.insert(field.name(), value);
        } else {
            section.set(field.name(), value);
        }
    }
    R::from_section(&keys, &section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::models::Value;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        identifier: String,
        value: String,
        hits: i64,
    }

    impl Entry {
        fn new(identifier: &str, value: &str, hits: i64) -> Self {
            Self {
                identifier: identifier.to_string(),
                value: value.to_string(),
                hits,
            }
        }
    }

    impl Record for Entry {
        fn from_primary(keys: &PrimaryFieldMap) -> Result<Self> {
            let identifier = keys
                .get("identifier")
                .and_then(Value::as_string)
                .ok_or_else(|| Error::InvalidInput("missing identifier".to_string()))?;
            Ok(Self::new(&identifier, "", 0))
        }

        fn identifier(&self) -> Value {
            Value::from(self.identifier.as_str())
        }

        fn field_values(&self) -> Section {
            Section::new()
                .with("identifier", self.identifier.as_str())
                .with("value", self.value.as_str())
                .with("hits", self.hits)
        }

        fn to_section(&self) -> Section {
            Section::new()
                .with("value", self.value.as_str())
                .with("hits", self.hits)
        }

        fn apply_section(&mut self, section: &Section) -> Result<()> {
            self.value = section.get_string("value").unwrap_or_default();
            self.hits = section.get_long("hits").unwrap_or_default();
            Ok(())
        }
    }

    async fn entries() -> TableSelection<Entry> {
        let db = Database::new(DatabaseConfig::in_memory());
        db.connect().await.unwrap();
        let table = Table::new(
            "entries",
            vec![
                RecordField::primary("identifier", DataType::String).with_max_size(64),
                RecordField::new("value", DataType::String),
                RecordField::new("hits", DataType::Long),
            ],
        )
        .unwrap();
        db.create_table(table).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let entries = entries().await;
        let outcome = entries.insert_record(&Entry::new("a", "v1", 1)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        let outcome = entries.insert_record(&Entry::new("a", "v2", 2)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        assert_eq!(entries.get_amount_of_records(None).await.unwrap(), 1);
        let stored = entries.get_first_record(None).await.unwrap().unwrap();
        assert_eq!(stored, Entry::new("a", "v2", 2));
    }

    #[tokio::test]
    async fn test_get_record_by_primary_map() {
        let entries = entries().await;
        entries.insert_record(&Entry::new("a", "x", 3)).await.unwrap();
        entries.insert_record(&Entry::new("b", "y", 4)).await.unwrap();

        let keys = PrimaryFieldMap::new().with("identifier", "b");
        let found = entries.get_record(&keys).await.unwrap();
        assert_eq!(found, Some(Entry::new("b", "y", 4)));

        let missing = PrimaryFieldMap::new().with("identifier", "zz");
        assert_eq!(entries.get_record(&missing).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_filters_and_counts() {
        let entries = entries().await;
        for (id, value) in [("a", "red"), ("b", "blue"), ("c", "red")] {
            entries.insert_record(&Entry::new(id, value, 0)).await.unwrap();
        }

        let red = Query::new().with_match("value", "red");
        let mut listed = entries.get_record_list(Some(&red)).await.unwrap();
        listed.sort_by(|l, r| l.identifier.cmp(&r.identifier));
        assert_eq!(
            listed.iter().map(|e| e.identifier.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(entries.get_amount_of_records(Some(&red)).await.unwrap(), 2);

        let none = Query::new().with_match("value", "green");
        assert_eq!(entries.get_amount_of_records(Some(&none)).await.unwrap(), 0);
        assert!(entries.get_first_record(Some(&none)).await.unwrap().is_none());
        assert!(entries.get_record_list(Some(&none)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_record_and_remove_all() {
        let entries = entries().await;
        for id in ["a", "b", "c"] {
            entries.insert_record(&Entry::new(id, "v", 0)).await.unwrap();
        }

        assert_eq!(entries.remove_record(&Entry::new("b", "ignored", 9)).await.unwrap(), 1);
        assert_eq!(entries.get_amount_of_records(None).await.unwrap(), 2);

        assert_eq!(entries.remove_all_records(&Query::new()).await.unwrap(), 2);
        assert_eq!(entries.get_amount_of_records(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_query_field_is_schema_mismatch() {
        let entries = entries().await;
        let query = Query::new().with_match("colour", "red");
        let err = entries.get_record_list(Some(&query)).await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert_eq!(entries.database().pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_column_names_and_add_column() {
        let entries = entries().await;
        assert_eq!(
            entries.get_column_names().await.unwrap(),
            Some(vec![
                "identifier".to_string(),
                "value".to_string(),
                "hits".to_string()
            ])
        );

        entries
            .add_column(&RecordField::new("note", DataType::String))
            .await
            .unwrap();
        let columns = entries.get_column_names().await.unwrap().unwrap();
        assert_eq!(columns.last().map(String::as_str), Some("note"));
        assert_eq!(entries.table().fields().len(), 3);

        let err = entries
            .add_column(&RecordField::primary("other", DataType::String))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_column_names_of_missing_table() {
        let entries = entries().await;
        entries
            .database()
            .execute("drop_table", "DROP TABLE \"entries\"")
            .await
            .unwrap();
        assert_eq!(entries.get_column_names().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_with_quotes_are_bound() {
        let entries = entries().await;
        let tricky = Entry::new("o'brien\"; DROP TABLE entries; --", "it's", 1);
        entries.insert_record(&tricky).await.unwrap();
        let query = Query::new().with_match("identifier", tricky.identifier.as_str());
        assert_eq!(entries.get_first_record(Some(&query)).await.unwrap(), Some(tricky));
    }
}
