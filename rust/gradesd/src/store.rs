//! Narrow row store over the workspace tables.
//!
//! Every call names a table, a list of fields and a set of equality
//! filters (ANDed). Names are checked against [`SCHEMA`]; values are always
//! bound as parameters.

use crate::error::{GradeError, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use uuid::Uuid;

pub const PUPILS: &str = "PUPILS";
pub const SUBJECTS: &str = "SUBJECTS";
pub const COURSES: &str = "COURSES";
pub const GRADES_INFO: &str = "GRADES_INFO";
pub const GRADES: &str = "GRADES";

const SCHEMA: &[(&str, &[&str])] = &[
    (
        PUPILS,
        &[
            "PID",
            "CLASS",
            "LASTNAME",
            "FIRSTNAME",
            "SORT_NAME",
            "LEVEL",
            "GROUPS",
            "EXIT_D",
        ],
    ),
    (SUBJECTS, &["SID", "NAME", "SORTING", "GROUP"]),
    (COURSES, &["id", "CLASS", "GRP", "SID", "TID"]),
    (
        GRADES_INFO,
        &[
            "id",
            "OCCASION",
            "CLASS_GROUP",
            "INSTANCE",
            "DATE_ISSUE",
            "DATE_GRADES",
            "MODIFIED",
        ],
    ),
    (
        GRADES,
        &[
            "id",
            "OCCASION",
            "CLASS_GROUP",
            "INSTANCE",
            "PID",
            "LEVEL",
            "GRADE_MAP",
        ],
    ),
];

pub type Filter<'a> = (&'a str, &'a str);

/// Result of [`Store::read_table`]: the requested fields and the matching rows.
#[derive(Debug, Clone, Default)]
pub struct TableRows {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableRows {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |values| Record {
            fields: &self.fields,
            values,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    fields: &'a [String],
    values: &'a [String],
}

impl<'a> Record<'a> {
    /// Value of `field`, empty if the field was not read.
    pub fn get(&self, field: &str) -> &'a str {
        self.fields
            .iter()
            .position(|f| f == field)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// A single row returned by [`Store::read_unique`].
#[derive(Debug, Clone)]
pub struct UniqueRow {
    pub fields: Vec<String>,
    pub values: Vec<String>,
}

impl UniqueRow {
    pub fn get(&self, field: &str) -> &str {
        Record {
            fields: &self.fields,
            values: &self.values,
        }
        .get(field)
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn read_table(
        &self,
        table: &str,
        fields: &[&str],
        filters: &[Filter<'_>],
    ) -> Result<TableRows> {
        let known = table_fields(table)?;
        let fields: Vec<&str> = if fields.is_empty() {
            known.to_vec()
        } else {
            fields.to_vec()
        };
        for f in &fields {
            check_field(table, known, f)?;
        }
        let (where_sql, binds) = where_clause(table, known, filters)?;
        let select = fields
            .iter()
            .map(|f| quote(f))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY rowid",
            select,
            quote(table),
            where_sql
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let n = fields.len();
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                (0..n)
                    .map(|i| r.get::<_, Option<String>>(i).map(Option::unwrap_or_default))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TableRows {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            rows,
        })
    }

    /// Exactly one matching row: zero is `NotFound`, more than one is a `Bug`.
    pub fn read_unique(&self, table: &str, filters: &[Filter<'_>]) -> Result<UniqueRow> {
        let mut found = self.read_table(table, &[], filters)?;
        match found.rows.len() {
            0 => Err(GradeError::NotFound(format!(
                "{} {}",
                table,
                describe_filters(filters)
            ))),
            1 => Ok(UniqueRow {
                fields: found.fields,
                values: found.rows.remove(0),
            }),
            n => Err(GradeError::bug(format!(
                "{} rows in {} for unique key {}",
                n,
                table,
                describe_filters(filters)
            ))),
        }
    }

    /// Update one field of exactly one row. Returns `false` when nothing
    /// matched, so the caller can insert instead.
    pub fn update_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
        filters: &[Filter<'_>],
    ) -> Result<bool> {
        let known = table_fields(table)?;
        check_field(table, known, field)?;
        let (where_sql, binds) = where_clause(table, known, filters)?;

        let tx = self.conn.unchecked_transaction()?;
        let count: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {}{}", quote(table), where_sql),
            params_from_iter(binds.iter()),
            |r| r.get(0),
        )?;
        match count {
            0 => return Ok(false),
            1 => {}
            n => {
                return Err(GradeError::bug(format!(
                    "update of {}.{} matched {} rows ({})",
                    table,
                    field,
                    n,
                    describe_filters(filters)
                )))
            }
        }
        let mut update_binds = Vec::with_capacity(binds.len() + 1);
        update_binds.push(Value::Text(value.to_string()));
        update_binds.extend(binds);
        tx.execute(
            &format!(
                "UPDATE {} SET {} = ?{}",
                quote(table),
                quote(field),
                where_sql
            ),
            params_from_iter(update_binds),
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Insert one row. Tables keyed by a generated `id` get a fresh uuid
    /// unless the caller supplies one.
    pub fn insert_row(&self, table: &str, fields: &[(&str, &str)]) -> Result<()> {
        let known = table_fields(table)?;
        let mut names: Vec<&str> = Vec::with_capacity(fields.len() + 1);
        let mut binds: Vec<Value> = Vec::with_capacity(fields.len() + 1);
        for (f, v) in fields {
            check_field(table, known, f)?;
            names.push(f);
            binds.push(Value::Text(v.to_string()));
        }
        if known.contains(&"id") && !names.contains(&"id") {
            names.push("id");
            binds.push(Value::Text(Uuid::new_v4().to_string()));
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            quote(table),
            names.iter().map(|f| quote(f)).collect::<Vec<_>>().join(", "),
            placeholders
        );
        self.conn.execute(&sql, params_from_iter(binds))?;
        Ok(())
    }

    /// Delete all rows matching the filters; returns the number removed.
    pub fn delete_rows(&self, table: &str, filters: &[Filter<'_>]) -> Result<usize> {
        let known = table_fields(table)?;
        let (where_sql, binds) = where_clause(table, known, filters)?;
        let n = self.conn.execute(
            &format!("DELETE FROM {}{}", quote(table), where_sql),
            params_from_iter(binds),
        )?;
        Ok(n)
    }
}

/// Known fields of `table`.
pub fn table_fields(table: &str) -> Result<&'static [&'static str]> {
    SCHEMA
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, f)| *f)
        .ok_or_else(|| GradeError::bug(format!("unknown table {}", table)))
}

fn check_field(table: &str, known: &[&str], field: &str) -> Result<()> {
    if known.contains(&field) {
        Ok(())
    } else {
        Err(GradeError::bug(format!("unknown field {}.{}", table, field)))
    }
}

fn where_clause(
    table: &str,
    known: &[&str],
    filters: &[Filter<'_>],
) -> Result<(String, Vec<Value>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut parts = Vec::with_capacity(filters.len());
    let mut binds = Vec::with_capacity(filters.len());
    for (f, v) in filters {
        check_field(table, known, f)?;
        parts.push(format!("{} = ?", quote(f)));
        binds.push(Value::Text(v.to_string()));
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn describe_filters(filters: &[Filter<'_>]) -> String {
    filters
        .iter()
        .map(|(f, v)| format!("{}={:?}", f, v))
        .collect::<Vec<_>>()
        .join(", ")
}
