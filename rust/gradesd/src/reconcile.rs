//! Targeted writes against an assembled grade table.

use crate::env::{Environment, DATE_FORMAT};
use crate::error::{GradeError, Result};
use crate::evaluate::{evaluate_row, ChangeList};
use crate::grades::GradeMap;
use crate::ingest::Collated;
use crate::store::{GRADES, GRADES_INFO};
use crate::table::{full_grade_table, touch_modified, GradeTable, TableKey};
use chrono::NaiveDate;
use serde::Serialize;

/// Grade-info fields a caller may edit.
pub const INFO_FIELDS: &[&str] = &["DATE_ISSUE", "DATE_GRADES"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    pub changes: ChangeList,
    pub modified: String,
    /// Whether the stored row was written.
    pub written: bool,
}

/// Apply `edits` to one pupil's row, re-evaluate it and persist the row
/// if it differs from what is stored. Locked subject cells and computed
/// cells ignore edits. An unknown field rejects the whole batch before
/// any cell is touched. `MODIFIED` is only refreshed when something was
/// written.
pub fn update_pupil_grades(
    env: &mut Environment,
    table: &mut GradeTable,
    pid: &str,
    edits: &[(String, String)],
) -> Result<SaveResult> {
    let GradeTable {
        key,
        config,
        rows,
        info,
        ..
    } = table;
    let row = rows
        .iter_mut()
        .find(|r| r.pupil.pid == pid)
        .ok_or_else(|| GradeError::NotFound(format!("pupil {} in {}", pid, key.class_group)))?;

    let cells = edits
        .iter()
        .map(|(sid, value)| {
            config
                .cell(sid)
                .map(|cell| (cell, sid, value))
                .ok_or_else(|| GradeError::UnknownField { field: sid.clone() })
        })
        .collect::<Result<Vec<_>>>()?;

    for (cell, sid, value) in cells {
        if cell.is_computed() {
            tracing::debug!(pid, sid = %sid, "edit of computed cell ignored");
            continue;
        }
        if cell.is_subject() && row.locked.contains(sid) {
            env.messages.warning(
                "cell_locked",
                format!("{}: {} does not apply, edit ignored", pid, sid),
            );
            continue;
        }
        if cell.is_subject() && !config.grades.is_valid(value) {
            env.messages.error(
                "invalid_grade",
                format!("{}: {:?} is not a valid grade for {}", pid, value, sid),
            );
            continue;
        }
        row.grades.set(sid, value.as_str());
    }

    let changes = evaluate_row(config, &mut row.grades);

    let filters = key.pupil_filters(pid);
    let stored = env.store.read_table(GRADES, &["GRADE_MAP"], &filters)?;
    let unchanged = stored
        .records()
        .next()
        .map(|r| GradeMap::decode(r.get("GRADE_MAP")) == row.grades)
        .unwrap_or(false);
    if unchanged {
        tracing::debug!(pid, "save without changes");
        return Ok(SaveResult {
            changes,
            modified: info.modified.clone(),
            written: false,
        });
    }

    let encoded = row.grades.encode();
    if !env
        .store
        .update_field(GRADES, "GRADE_MAP", &encoded, &filters)?
    {
        let [o, c, i] = key.filters();
        env.store.insert_row(
            GRADES,
            &[
                o,
                c,
                i,
                ("PID", pid),
                ("LEVEL", row.pupil.level.as_str()),
                ("GRADE_MAP", encoded.as_str()),
            ],
        )?;
        tracing::info!(pid, class_group = %key.class_group, "grades row created");
    }
    info.modified = touch_modified(env, key)?;
    Ok(SaveResult {
        changes,
        modified: info.modified.clone(),
        written: true,
    })
}

/// Set `DATE_ISSUE` or `DATE_GRADES` of a table. Returns the table's
/// `MODIFIED` after the call.
pub fn update_table_info(
    env: &mut Environment,
    key: &TableKey,
    field: &str,
    value: &str,
) -> Result<String> {
    if !INFO_FIELDS.contains(&field) {
        return Err(GradeError::UnknownField {
            field: field.to_string(),
        });
    }
    if NaiveDate::parse_from_str(value, DATE_FORMAT).is_err() {
        return Err(GradeError::InvalidDate {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    let current = env
        .store
        .read_unique(GRADES_INFO, &key.filters())?;
    if current.get(field) == value {
        return Ok(current.get("MODIFIED").to_string());
    }
    env.store
        .update_field(GRADES_INFO, field, value, &key.filters())?;
    tracing::info!(field, value, class_group = %key.class_group, "table info updated");
    touch_modified(env, key)
}

/// Remove one pupil's stored grades. Returns the new `MODIFIED` if a row
/// was deleted.
pub fn delete_pupil_grades(
    env: &mut Environment,
    key: &TableKey,
    pid: &str,
) -> Result<Option<String>> {
    let n = env.store.delete_rows(GRADES, &key.pupil_filters(pid))?;
    if n == 0 {
        return Ok(None);
    }
    tracing::info!(pid, class_group = %key.class_group, "grades row deleted");
    touch_modified(env, key).map(Some)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    /// `(pid, changes)` for every pupil whose row was written.
    pub saved: Vec<(String, ChangeList)>,
    pub modified: String,
}

/// Merge collated grades into the table of `key` and save every pupil the
/// merge touched. Pupils and fields the table does not have are reported
/// and skipped.
pub fn apply_collated_grades(
    env: &mut Environment,
    key: &TableKey,
    collated: &Collated,
) -> Result<ApplyResult> {
    let mut table = full_grade_table(env, key)?;
    let mut saved = Vec::new();

    for (pid, grades) in collated {
        let Some(row) = table.row(pid) else {
            env.messages.warning(
                "unknown_pupil",
                format!("{} is not in {}, grades ignored", pid, key.class_group),
            );
            continue;
        };
        let mut edits = Vec::new();
        for (sid, grade) in grades {
            if table.cell(sid).is_none() {
                env.messages.warning(
                    "unknown_field",
                    format!("{} is not a field of {}, ignored", sid, key.class_group),
                );
                continue;
            }
            if row.grades.get(sid) != Some(grade.as_str()) {
                edits.push((sid.clone(), grade.clone()));
            }
        }
        if edits.is_empty() {
            continue;
        }
        let result = update_pupil_grades(env, &mut table, pid, &edits)?;
        if result.written {
            saved.push((pid.clone(), result.changes));
        }
    }
    Ok(ApplyResult {
        saved,
        modified: table.info.modified,
    })
}
