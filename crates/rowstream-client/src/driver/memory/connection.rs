//! Memory driver connections.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use rowstream_common::error::RowStreamResult;
use rowstream_common::types::Value;

use super::sql::{self, Condition, Operand, Select, SelectItem, Statement};
use super::{table_key, Catalog, MemoryBlob, MemoryError, MemoryServer, MemoryTable, StoredRow, PATH_PREFIX};
use crate::driver::{BlobHandle, Connection, ConnectionState, ResultSet};
use crate::predicate::Parameter;
use crate::statement::Command;
use crate::stream::Access;

/// A transaction's private copy of the catalog.
#[derive(Debug)]
pub(super) struct Working {
    pub catalog: Catalog,
    pub touched: HashSet<String>,
    pub finished: bool,
}

#[derive(Debug)]
struct ActiveTxn {
    token: Vec<u8>,
    working: Arc<Mutex<Working>>,
}

impl ActiveTxn {
    fn finish(&self) -> Working {
        let mut working = self.working.lock();
        working.finished = true;
        Working {
            catalog: std::mem::take(&mut working.catalog),
            touched: std::mem::take(&mut working.touched),
            finished: true,
        }
    }
}

/// A connection to a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConnection {
    server: MemoryServer,
    id: u64,
    state: ConnectionState,
    txn: Option<ActiveTxn>,
}

enum Outcome {
    Affected(u64),
    Rows(ResultSet),
}

#[derive(Default)]
struct Counts {
    inserts: u64,
    updates: u64,
}

impl MemoryConnection {
    pub(super) fn new(server: MemoryServer, id: u64) -> Self {
        Self {
            server,
            id,
            state: ConnectionState::Open,
            txn: None,
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.state == ConnectionState::Closed {
            return Err(MemoryError::ConnectionClosed);
        }
        Ok(())
    }

    fn run(&mut self, command: &Command) -> Result<Outcome, MemoryError> {
        self.ensure_open()?;
        let statement = sql::parse(&command.sql)?;
        let mut counts = Counts::default();

        let outcome = match &self.txn {
            Some(txn) => {
                let mut working = txn.working.lock();
                let Working {
                    catalog, touched, ..
                } = &mut *working;
                Executor {
                    catalog,
                    touched,
                    parameters: &command.parameters,
                    token: Some(&txn.token),
                    counts: &mut counts,
                }
                .run(&statement)
            }
            None => {
                // Autocommit
                let mut catalog = self.server.snapshot();
                let mut touched = HashSet::new();
                let outcome = Executor {
                    catalog: &mut catalog,
                    touched: &mut touched,
                    parameters: &command.parameters,
                    token: None,
                    counts: &mut counts,
                }
                .run(&statement);
                if outcome.is_ok() {
                    self.server.publish(
                        catalog
                            .into_iter()
                            .filter(|(key, _)| touched.contains(key)),
                    );
                }
                outcome
            }
        };

        self.server.record(|s| {
            s.statements += 1;
            s.inserts += counts.inserts;
            s.updates += counts.updates;
        });
        outcome
    }

    fn end_transaction(&mut self) -> Result<ActiveTxn, MemoryError> {
        self.ensure_open()?;
        let txn = self.txn.take().ok_or(MemoryError::NoTransaction)?;
        self.state = ConnectionState::Open;
        Ok(txn)
    }

    fn rollback_inner(&mut self) -> Result<(), MemoryError> {
        let txn = self.end_transaction()?;
        txn.finish();
        self.server.record(|s| s.rollbacks += 1);
        debug!("Memory connection {} rolled back", self.id);
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn begin_transaction(&mut self) -> RowStreamResult<()> {
        self.ensure_open()?;
        if self.txn.is_some() {
            return Err(MemoryError::TransactionActive.into());
        }
        if self.server.take_fault(|f| std::mem::take(&mut f.fail_next_begin)) {
            return Err(MemoryError::Injected("begin transaction").into());
        }
        self.txn = Some(ActiveTxn {
            token: Uuid::new_v4().as_bytes().to_vec(),
            working: Arc::new(Mutex::new(Working {
                catalog: self.server.snapshot(),
                touched: HashSet::new(),
                finished: false,
            })),
        });
        self.state = ConnectionState::InTransaction;
        self.server.record(|s| s.begins += 1);
        Ok(())
    }

    fn commit(&mut self) -> RowStreamResult<()> {
        let txn = self.end_transaction()?;
        let working = txn.finish();
        if self.server.take_fault(|f| std::mem::take(&mut f.fail_next_commit)) {
            self.server.record(|s| s.rollbacks += 1);
            return Err(MemoryError::Injected("commit").into());
        }

        let Working {
            catalog, touched, ..
        } = working;
        self.server
            .publish(catalog.into_iter().filter(|(key, _)| touched.contains(key)));
        self.server.record(|s| s.commits += 1);
        debug!("Memory connection {} committed", self.id);
        Ok(())
    }

    fn rollback(&mut self) -> RowStreamResult<()> {
        self.rollback_inner().map_err(Into::into)
    }

    fn close(&mut self) -> RowStreamResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if self.txn.is_some() {
            self.rollback_inner()?;
        }
        self.state = ConnectionState::Closed;
        self.server.record(|s| s.connections_closed += 1);
        debug!("Memory connection {} closed", self.id);
        Ok(())
    }

    fn execute(&mut self, command: &Command) -> RowStreamResult<u64> {
        match self.run(command)? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(_) => Err(MemoryError::WrongStatementKind(
                "SELECT must be run as a query",
            )
            .into()),
        }
    }

    fn query(&mut self, command: &Command) -> RowStreamResult<ResultSet> {
        self.server.record(|s| s.queries += 1);
        match self.run(command)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => {
                Err(MemoryError::WrongStatementKind("only SELECT can be run as a query").into())
            }
        }
    }

    fn open_blob(
        &mut self,
        path: &str,
        transaction_token: &[u8],
        access: Access,
    ) -> RowStreamResult<Box<dyn BlobHandle>> {
        self.ensure_open()?;
        let txn = self.txn.as_ref().ok_or(MemoryError::NoTransaction)?;
        if txn.token != transaction_token {
            return Err(MemoryError::TokenMismatch.into());
        }

        let invalid = || MemoryError::InvalidPath(path.to_string());
        let (table_name, row_id) = path
            .strip_prefix(PATH_PREFIX)
            .and_then(|rest| rest.rsplit_once('\\'))
            .ok_or_else(invalid)?;
        let row_id: u64 = row_id.parse().map_err(|_| invalid())?;
        let key = table_key(table_name);

        let (column, content) = {
            let working = txn.working.lock();
            let table = working.catalog.get(&key).ok_or_else(invalid)?;
            let column = table.columns.iter().position(|c| c.blob).ok_or_else(invalid)?;
            let row = table.rows.iter().find(|r| r.id == row_id).ok_or_else(invalid)?;
            let content = match &row.values[column] {
                Value::Bytes(bytes) => bytes.clone(),
                _ => return Err(invalid().into()),
            };
            (column, content)
        };

        self.server.record(|s| s.blobs_opened += 1);
        debug!("Memory connection {} opened {} for {}", self.id, path, access);
        Ok(Box::new(MemoryBlob::new(
            txn.working.clone(),
            key,
            row_id,
            column,
            content,
            access,
        )))
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            warn!("Memory connection {} dropped inside a transaction", self.id);
            txn.finish();
        }
    }
}

/// Runs one parsed statement against a catalog.
struct Executor<'a> {
    catalog: &'a mut Catalog,
    touched: &'a mut HashSet<String>,
    parameters: &'a [Parameter],
    token: Option<&'a [u8]>,
    counts: &'a mut Counts,
}

impl<'a> Executor<'a> {
    fn run(&mut self, statement: &Statement) -> Result<Outcome, MemoryError> {
        match statement {
            Statement::Insert {
                table,
                columns,
                values,
            } => self.insert(table, columns, values).map(Outcome::Affected),
            Statement::Update {
                table,
                assignments,
                filter,
            } => self.update(table, assignments, filter.as_ref()).map(Outcome::Affected),
            Statement::Select(select) => self.select(select).map(Outcome::Rows),
            Statement::Conditional {
                negated,
                probe,
                then,
                otherwise,
            } => {
                let exists = self.select(probe)?.has_rows();
                if exists != *negated {
                    self.run(then)
                } else if let Some(otherwise) = otherwise {
                    self.run(otherwise)
                } else {
                    Ok(Outcome::Affected(0))
                }
            }
        }
    }

    fn insert(&mut self, table: &str, columns: &[String], values: &[Operand]) -> Result<u64, MemoryError> {
        let key = table_key(table);
        let parameters = self.parameters;
        let target = self
            .catalog
            .get_mut(&key)
            .ok_or_else(|| MemoryError::UnknownTable(table.to_string()))?;
        if columns.len() != values.len() {
            return Err(MemoryError::ColumnCount(table.to_string()));
        }

        let mut row = vec![Value::Null; target.columns.len()];
        for (column, operand) in columns.iter().zip(values) {
            let index = target.column_index(column)?;
            row[index] = constant(operand, parameters)?;
        }
        target.insert(row)?;

        self.touched.insert(key);
        self.counts.inserts += 1;
        Ok(1)
    }

    fn update(
        &mut self,
        table: &str,
        assignments: &[(String, Operand)],
        filter: Option<&Condition>,
    ) -> Result<u64, MemoryError> {
        let key = table_key(table);
        let parameters = self.parameters;
        let target = self
            .catalog
            .get_mut(&key)
            .ok_or_else(|| MemoryError::UnknownTable(table.to_string()))?;

        let mut resolved = Vec::with_capacity(assignments.len());
        for (column, operand) in assignments {
            resolved.push((target.column_index(column)?, constant(operand, parameters)?));
        }

        let mut matched = Vec::new();
        for (i, row) in target.rows.iter().enumerate() {
            if matches(target, row, filter, parameters)? {
                matched.push(i);
            }
        }
        for &i in &matched {
            for (index, value) in &resolved {
                target.rows[i].values[*index] = value.clone();
            }
        }

        let affected = matched.len() as u64;
        if affected > 0 {
            self.touched.insert(key);
        }
        self.counts.updates += affected;
        Ok(affected)
    }

    fn select(&self, select: &Select) -> Result<ResultSet, MemoryError> {
        let table = self
            .catalog
            .get(&table_key(&select.table))
            .ok_or_else(|| MemoryError::UnknownTable(select.table.clone()))?;

        let mut columns = Vec::with_capacity(select.items.len());
        for item in &select.items {
            columns.push(match item {
                SelectItem::Column(column) => table.columns[table.column_index(column)?].name.clone(),
                _ => String::new(),
            });
        }

        let mut rows = Vec::new();
        for row in &table.rows {
            if !matches(table, row, select.filter.as_ref(), self.parameters)? {
                continue;
            }
            let mut values = Vec::with_capacity(select.items.len());
            for item in &select.items {
                values.push(self.project(table, row, item)?);
            }
            rows.push(values);
        }

        Ok(ResultSet::new(columns, rows))
    }

    fn project(&self, table: &MemoryTable, row: &StoredRow, item: &SelectItem) -> Result<Value, MemoryError> {
        Ok(match item {
            SelectItem::One => Value::Int(1),
            SelectItem::TransactionContext => self
                .token
                .map_or(Value::Null, |token| Value::Bytes(token.to_vec())),
            SelectItem::Column(column) => row.values[table.column_index(column)?].clone(),
            SelectItem::PathName(column) => {
                let index = table.column_index(column)?;
                if !table.columns[index].blob {
                    return Err(MemoryError::Syntax {
                        message: format!("PathName() is only valid on FILESTREAM columns, not {}", column),
                    });
                }
                if row.values[index].is_null() {
                    Value::Null
                } else {
                    Value::Text(table.path(row))
                }
            }
        })
    }
}

/// Evaluates an operand that does not depend on a row.
fn constant(operand: &Operand, parameters: &[Parameter]) -> Result<Value, MemoryError> {
    match operand {
        Operand::Column(column) => Err(MemoryError::Syntax {
            message: format!("column {} is not allowed here", column),
        }),
        other => evaluate(other, None, parameters),
    }
}

fn evaluate(
    operand: &Operand,
    row: Option<(&MemoryTable, &StoredRow)>,
    parameters: &[Parameter],
) -> Result<Value, MemoryError> {
    Ok(match operand {
        Operand::Param(ordinal) => parameters
            .get(*ordinal)
            .map(|p| p.value.clone())
            .ok_or(MemoryError::UnboundParameter(*ordinal))?,
        Operand::Binary(bytes) => Value::Bytes(bytes.clone()),
        Operand::Integer(n) => Value::BigInt(*n),
        Operand::Text(text) => Value::Text(text.clone()),
        Operand::Null => Value::Null,
        Operand::Column(column) => match row {
            Some((table, row)) => row.values[table.column_index(column)?].clone(),
            None => {
                return Err(MemoryError::Syntax {
                    message: format!("column {} is not allowed here", column),
                })
            }
        },
    })
}

fn matches(
    table: &MemoryTable,
    row: &StoredRow,
    filter: Option<&Condition>,
    parameters: &[Parameter],
) -> Result<bool, MemoryError> {
    let Some(filter) = filter else {
        return Ok(true);
    };
    Ok(match filter {
        Condition::Eq(left, right) => {
            let left = evaluate(left, Some((table, row)), parameters)?;
            let right = evaluate(right, Some((table, row)), parameters)?;
            super::loose_eq(&left, &right)
        }
        Condition::And(left, right) => {
            matches(table, row, Some(left.as_ref()), parameters)?
                && matches(table, row, Some(right.as_ref()), parameters)?
        }
        Condition::Or(left, right) => {
            matches(table, row, Some(left.as_ref()), parameters)?
                || matches(table, row, Some(right.as_ref()), parameters)?
        }
    })
}
