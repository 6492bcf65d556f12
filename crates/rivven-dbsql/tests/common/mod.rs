//! In-memory warehouse table for integration tests
//!
//! Statements are parsed with `sqlparser` (MySQL dialect: backtick
//! identifiers, backslash-escaped strings) and applied to a row vector.
//! Unknown tables and columns are rejected with Databricks error classes.

#![allow(dead_code)]

use async_trait::async_trait;
use rivven_dbsql::prelude::*;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, FunctionArg, FunctionArgExpr,
    FunctionArguments, ObjectNamePart, SetExpr, TableFactor, TableObject, UnaryOperator,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type StoredRow = BTreeMap<String, Value>;

type PResult<T> = std::result::Result<T, String>;

enum Predicate {
    Eq(String, Value),
    IsNull(String),
}

enum Parsed {
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Update {
        table: String,
        set: Vec<(String, Value)>,
        predicate: Vec<Predicate>,
    },
    Delete {
        table: String,
        predicate: Vec<Predicate>,
    },
    Describe {
        table: String,
    },
    SelectOne,
}

fn object_name(name: &ast::ObjectName) -> PResult<String> {
    let parts = name
        .0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => Ok(ident.value.clone()),
            #[allow(unreachable_patterns)]
            other => Err(format!("unsupported name part {other}")),
        })
        .collect::<PResult<Vec<_>>>()?;
    Ok(parts.join("."))
}

fn relation(table: &ast::TableWithJoins) -> PResult<String> {
    match &table.relation {
        TableFactor::Table { name, .. } => object_name(name),
        other => Err(format!("unsupported relation {other}")),
    }
}

fn column(expr: &Expr) -> PResult<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        other => Err(format!("expected a column, got {other}")),
    }
}

fn scalar(value: &ast::Value, negative: bool) -> PResult<Value> {
    match value {
        ast::Value::Number(n, _) => {
            let text = if negative { format!("-{n}") } else { n.clone() };
            text.parse::<serde_json::Number>()
                .map(Value::Number)
                .map_err(|e| format!("invalid number {text}: {e}"))
        }
        ast::Value::SingleQuotedString(s) if !negative => Ok(Value::Text(s.clone())),
        ast::Value::Boolean(b) if !negative => Ok(Value::Bool(*b)),
        ast::Value::Null if !negative => Ok(Value::Null),
        other => Err(format!("unsupported literal {other}")),
    }
}

fn from_json(function: &ast::Function) -> PResult<Value> {
    if !object_name(&function.name)?.eq_ignore_ascii_case("from_json") {
        return Err(format!("unsupported function {}", function.name));
    }
    let FunctionArguments::List(list) = &function.args else {
        return Err("from_json without arguments".into());
    };
    match list.args.first() {
        Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Value(v)))) => match &v.value {
            ast::Value::SingleQuotedString(json) => Ok(Value::Composite(json.clone())),
            other => Err(format!("from_json expects a JSON string, got {other}")),
        },
        _ => Err("from_json expects a JSON string".into()),
    }
}

/// A literal, optionally wrapped in `CAST(.. AS ..)` or `from_json(..)`.
/// Parenthesized literals are rejected.
fn literal(expr: &Expr) -> PResult<Value> {
    match expr {
        Expr::Value(v) => scalar(&v.value, false),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            Expr::Value(v) => scalar(&v.value, true),
            other => Err(format!("unsupported negation of {other}")),
        },
        Expr::Cast { expr, .. } => literal(expr),
        Expr::Function(function) => from_json(function),
        other => Err(format!("expected a literal, got {other}")),
    }
}

fn collect_terms(expr: &Expr, terms: &mut Vec<Predicate>) -> PResult<()> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, terms)?;
            collect_terms(right, terms)
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            terms.push(Predicate::Eq(column(left)?, literal(right)?));
            Ok(())
        }
        Expr::IsNull(inner) => {
            terms.push(Predicate::IsNull(column(inner)?));
            Ok(())
        }
        other => Err(format!("unsupported predicate {other}")),
    }
}

fn predicate(selection: Option<&Expr>) -> PResult<Vec<Predicate>> {
    let mut terms = Vec::new();
    collect_terms(selection.ok_or("mutation without WHERE")?, &mut terms)?;
    Ok(terms)
}

fn parse_statement(sql: &str) -> PResult<Parsed> {
    let dialect = MySqlDialect {};

    if let Some(rest) = sql.strip_prefix("DESCRIBE TABLE ") {
        let table = Parser::new(&dialect)
            .try_with_sql(rest)
            .and_then(|mut parser| parser.parse_object_name(false))
            .map_err(|e| e.to_string())?;
        return Ok(Parsed::Describe {
            table: object_name(&table)?,
        });
    }

    let mut statements = Parser::parse_sql(&dialect, sql).map_err(|e| e.to_string())?;
    if statements.len() != 1 {
        return Err(format!("expected one statement, got {}", statements.len()));
    }

    match statements.remove(0) {
        ast::Statement::Query(_) => Ok(Parsed::SelectOne),
        ast::Statement::Insert(insert) => {
            let table = match &insert.table {
                TableObject::TableName(name) => object_name(name)?,
                _ => return Err("unsupported insert target".into()),
            };
            let source = insert.source.as_ref().ok_or("INSERT without VALUES")?;
            let rows = match source.body.as_ref() {
                SetExpr::Values(values) => &values.rows,
                other => return Err(format!("unsupported insert source {other}")),
            };
            let [row] = rows.as_slice() else {
                return Err(format!("expected one row, got {}", rows.len()));
            };
            Ok(Parsed::Insert {
                table,
                columns: insert.columns.iter().map(|c| c.value.clone()).collect(),
                values: row.iter().map(literal).collect::<PResult<_>>()?,
            })
        }
        ast::Statement::Update(update) => {
            let set: Vec<(String, Value)> = update
                .assignments
                .iter()
                .map(|assignment| -> PResult<(String, Value)> {
                    match &assignment.target {
                        AssignmentTarget::ColumnName(name) => {
                            Ok((object_name(name)?, literal(&assignment.value)?))
                        }
                        AssignmentTarget::Tuple(_) => Err("tuple assignment".to_string()),
                    }
                })
                .collect::<PResult<_>>()?;
            Ok(Parsed::Update {
                table: relation(&update.table)?,
                set,
                predicate: predicate(update.selection.as_ref())?,
            })
        }
        ast::Statement::Delete(delete) => {
            let tables = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            let [table] = tables.as_slice() else {
                return Err("expected one table".into());
            };
            Ok(Parsed::Delete {
                table: relation(table)?,
                predicate: predicate(delete.selection.as_ref())?,
            })
        }
        other => Err(format!("unsupported statement {other}")),
    }
}

fn parse(sql: &str) -> Result<Parsed> {
    parse_statement(sql).map_err(|e| Error::execution(format!("[PARSE_SYNTAX_ERROR] {e}")))
}

/// A single warehouse table behind a [`Connection`]
pub struct MemoryTable {
    name: String,
    columns: Vec<(String, String)>,
    rows: Mutex<Vec<StoredRow>>,
    statements: Mutex<Vec<String>>,
    latency: Option<Duration>,
    closed: AtomicBool,
}

impl MemoryTable {
    pub fn new(name: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            rows: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            latency: None,
            closed: AtomicBool::new(false),
        }
    }

    /// `products (id int, name varchar(100), price decimal(10,2), tags array<string>)`
    pub fn products() -> Self {
        Self::new(
            "products",
            &[
                ("id", "int"),
                ("name", "varchar(100)"),
                ("price", "decimal(10,2)"),
                ("tags", "array<string>"),
            ],
        )
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn seed(&self, entries: &[(&str, Value)]) {
        let mut row: StoredRow = self
            .columns
            .iter()
            .map(|(n, _)| (n.clone(), Value::Null))
            .collect();
        for (k, v) in entries {
            row.insert(k.to_string(), v.clone());
        }
        self.rows.lock().unwrap().push(row);
    }

    pub fn rows(&self) -> Vec<StoredRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_table(&self, table: &str) -> Result<()> {
        if table.eq_ignore_ascii_case(&self.name) {
            Ok(())
        } else {
            Err(Error::execution(format!(
                "[TABLE_OR_VIEW_NOT_FOUND] The table or view `{table}` cannot be found."
            )))
        }
    }

    fn resolve(&self, column: &str) -> Result<String> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(column))
            .map(|(n, _)| n.clone())
            .ok_or_else(|| {
                Error::execution(format!(
                    "[UNRESOLVED_COLUMN.WITH_SUGGESTION] A column, variable, or function \
                     parameter with name `{column}` cannot be resolved."
                ))
            })
    }

    fn check_predicate(&self, predicate: &[Predicate]) -> Result<()> {
        for condition in predicate {
            match condition {
                Predicate::Eq(column, _) | Predicate::IsNull(column) => {
                    self.resolve(column)?;
                }
            }
        }
        Ok(())
    }

    fn matches(&self, row: &StoredRow, predicate: &[Predicate]) -> Result<bool> {
        for condition in predicate {
            let hit = match condition {
                Predicate::Eq(column, value) => {
                    let column = self.resolve(column)?;
                    !value.is_null() && row.get(&column) == Some(value)
                }
                Predicate::IsNull(column) => {
                    let column = self.resolve(column)?;
                    row.get(&column).map_or(true, Value::is_null)
                }
            };
            if !hit {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Connection for MemoryTable {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        match parse(sql)? {
            Parsed::SelectOne => Ok(vec![Row::new(vec!["1".into()], vec![Value::from("1")])]),
            Parsed::Describe { table } => {
                self.check_table(&table)?;
                let row = |n: &str, t: &str| {
                    Row::new(
                        vec!["col_name".into(), "data_type".into(), "comment".into()],
                        vec![Value::from(n), Value::from(t), Value::Null],
                    )
                };
                let mut rows: Vec<Row> = self.columns.iter().map(|(n, t)| row(n, t)).collect();
                rows.push(row("", ""));
                rows.push(row("# Partition Information", ""));
                rows.push(row("# col_name", "data_type"));
                if let Some((n, t)) = self.columns.first() {
                    rows.push(row(n, t));
                }
                Ok(rows)
            }
            _ => Err(Error::execution("query expects SELECT or DESCRIBE")),
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.statements.lock().unwrap().push(sql.to_string());

        match parse(sql)? {
            Parsed::Insert {
                table,
                columns,
                values,
            } => {
                self.check_table(&table)?;
                let mut row: StoredRow = self
                    .columns
                    .iter()
                    .map(|(n, _)| (n.clone(), Value::Null))
                    .collect();
                for (column, value) in columns.iter().zip(values) {
                    row.insert(self.resolve(column)?, value);
                }
                self.rows.lock().unwrap().push(row);
                Ok(1)
            }
            Parsed::Update {
                table,
                set,
                predicate,
            } => {
                self.check_table(&table)?;
                self.check_predicate(&predicate)?;
                let set = set
                    .into_iter()
                    .map(|(c, v)| Ok((self.resolve(&c)?, v)))
                    .collect::<Result<Vec<_>>>()?;
                let mut rows = self.rows.lock().unwrap();
                let mut affected = 0;
                for row in rows.iter_mut() {
                    if self.matches(row, &predicate)? {
                        for (column, value) in &set {
                            row.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            Parsed::Delete { table, predicate } => {
                self.check_table(&table)?;
                self.check_predicate(&predicate)?;
                let mut rows = self.rows.lock().unwrap();
                let before = rows.len();
                rows.retain(|row| !self.matches(row, &predicate).unwrap_or(false));
                Ok((before - rows.len()) as u64)
            }
            _ => Err(Error::execution("execute expects a mutation")),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out the same [`MemoryTable`] for every connect
pub struct MemoryFactory {
    pub table: Arc<MemoryTable>,
    pub connects: AtomicUsize,
}

impl MemoryFactory {
    pub fn new(table: MemoryTable) -> Self {
        Self {
            table: Arc::new(table),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    async fn connect(&self, _config: &DatabricksConfig) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.table.clone())
    }
}

/// Open a client on `table`
pub async fn open_client(table: Arc<MemoryTable>, options: SqlClientOptions) -> SqlClient {
    let name = table.name.clone();
    let mut client = SqlClient::with_options(QueryBuilder::default(), options);
    client.open(table, &name).await.unwrap();
    client
}

pub fn product(id: i64, name: &str) -> ChangeRecord {
    ChangeRecord::create(
        serde_json::json!({"id": id}),
        serde_json::json!({"id": id, "name": name}),
    )
}
