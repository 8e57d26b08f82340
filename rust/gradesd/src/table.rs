//! Grade table assembly.
//!
//! A table is keyed by `(occasion, class_group, instance)`. Before the
//! grading date the roster comes from the live enrolment; once the date
//! has passed the stored rows are the roster.

use crate::cells::Cell;
use crate::config::ResolvedConfig;
use crate::enrolment::{
    enrolled_subjects, enrolment_matrix, group_pupils, is_enrolled, load_catalogue, load_pupil,
    Pupil,
};
use crate::env::Environment;
use crate::error::{GradeError, Result};
use crate::evaluate::evaluate_row;
use crate::grades::{GradeMap, NO_GRADE};
use crate::store::{Filter, GRADES, GRADES_INFO};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// `MODIFIED` of a table that has never been saved.
pub const MODIFIED_PLACEHOLDER: &str = "1970-01-01T00:00:00";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableKey {
    pub occasion: String,
    pub class_group: String,
    #[serde(default)]
    pub instance: String,
}

impl TableKey {
    pub fn new(occasion: &str, class_group: &str, instance: &str) -> Self {
        Self {
            occasion: occasion.to_string(),
            class_group: class_group.to_string(),
            instance: instance.to_string(),
        }
    }

    pub fn filters(&self) -> [Filter<'_>; 3] {
        [
            ("OCCASION", self.occasion.as_str()),
            ("CLASS_GROUP", self.class_group.as_str()),
            ("INSTANCE", self.instance.as_str()),
        ]
    }

    pub fn pupil_filters<'a>(&'a self, pid: &'a str) -> [Filter<'a>; 4] {
        let [o, c, i] = self.filters();
        [o, c, i, ("PID", pid)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub date_issue: String,
    pub date_grades: String,
    pub modified: String,
}

/// One stored `GRADES` row.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub pid: String,
    pub level: String,
    pub grades: GradeMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PupilRow {
    pub pupil: Pupil,
    /// Subject cells fixed at `NO_GRADE`.
    pub locked: BTreeSet<String>,
    pub grades: GradeMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeTable {
    #[serde(flatten)]
    pub key: TableKey,
    pub schoolyear: String,
    pub config: ResolvedConfig,
    pub all_sids: Vec<String>,
    pub rows: Vec<PupilRow>,
    #[serde(flatten)]
    pub info: TableInfo,
    /// Whether the roster was taken from the stored rows.
    pub frozen: bool,
}

impl GradeTable {
    pub fn row(&self, pid: &str) -> Option<&PupilRow> {
        self.rows.iter().find(|r| r.pupil.pid == pid)
    }

    pub fn cell(&self, sid: &str) -> Option<&Cell> {
        self.config.cell(sid)
    }

    /// Grade cells of a row as they appear on a report: print forms, with
    /// `MISSING_GRADE` for grades not yet entered.
    pub fn printed(&self, row: &PupilRow) -> Vec<(String, String)> {
        self.config
            .subjects
            .iter()
            .chain(self.config.components.iter())
            .chain(self.config.composites.iter())
            .map(|c| {
                let grade = row.grades.value(&c.sid);
                (c.sid.clone(), self.config.grades.print_form(grade))
            })
            .collect()
    }
}

pub fn read_stored_rows(env: &Environment, key: &TableKey) -> Result<Vec<StoredRow>> {
    let rows = env
        .store
        .read_table(GRADES, &["PID", "LEVEL", "GRADE_MAP"], &key.filters())?;
    Ok(rows
        .records()
        .map(|r| StoredRow {
            pid: r.get("PID").to_string(),
            level: r.get("LEVEL").to_string(),
            grades: GradeMap::decode(r.get("GRADE_MAP")),
        })
        .collect())
}

/// Read the info row of a table, creating it on first use.
pub fn ensure_table_info(env: &Environment, key: &TableKey, has_grades: bool) -> Result<TableInfo> {
    let rows = env.store.read_table(
        GRADES_INFO,
        &["DATE_ISSUE", "DATE_GRADES", "MODIFIED"],
        &key.filters(),
    )?;
    match rows.rows.len() {
        1 => {
            let r = rows.records().next().ok_or_else(|| GradeError::bug("vanished row"))?;
            Ok(TableInfo {
                date_issue: r.get("DATE_ISSUE").to_string(),
                date_grades: r.get("DATE_GRADES").to_string(),
                modified: r.get("MODIFIED").to_string(),
            })
        }
        0 if has_grades => Err(GradeError::bug(format!(
            "grades stored for {}/{}/{} without an info row",
            key.occasion, key.class_group, key.instance
        ))),
        0 => {
            let today = env.clock.today();
            let [o, c, i] = key.filters();
            env.store.insert_row(
                GRADES_INFO,
                &[
                    o,
                    c,
                    i,
                    ("DATE_ISSUE", today.as_str()),
                    ("DATE_GRADES", today.as_str()),
                    ("MODIFIED", MODIFIED_PLACEHOLDER),
                ],
            )?;
            tracing::info!(
                occasion = %key.occasion,
                class_group = %key.class_group,
                instance = %key.instance,
                "created grade table info"
            );
            Ok(TableInfo {
                date_issue: today.clone(),
                date_grades: today,
                modified: MODIFIED_PLACEHOLDER.to_string(),
            })
        }
        n => Err(GradeError::bug(format!(
            "{} info rows for {}/{}/{}",
            n, key.occasion, key.class_group, key.instance
        ))),
    }
}

/// Set `MODIFIED` to the clock's timestamp and return it.
pub fn touch_modified(env: &Environment, key: &TableKey) -> Result<String> {
    let ts = env.clock.timestamp();
    if !env
        .store
        .update_field(GRADES_INFO, "MODIFIED", &ts, &key.filters())?
    {
        return Err(GradeError::NotFound(format!(
            "grade table {}/{}/{}",
            key.occasion, key.class_group, key.instance
        )));
    }
    Ok(ts)
}

/// A pupil of the chosen roster with the subjects they are locked out of.
struct RosterEntry {
    pupil: Pupil,
    locked: BTreeSet<String>,
    stored: Option<StoredRow>,
}

/// Assemble, evaluate and reconcile the grade table of `key`.
pub fn full_grade_table(env: &mut Environment, key: &TableKey) -> Result<GradeTable> {
    env.config.occasion_group(&key.occasion, &key.class_group)?;

    let stored = read_stored_rows(env, key)?;
    let mut info = ensure_table_info(env, key, !stored.is_empty())?;
    let today = env.clock.today();
    let frozen = info.date_grades < today;
    let catalogue = load_catalogue(&env.store)?;
    let catalogue_sids: HashSet<&str> = catalogue.iter().map(|s| s.sid.as_str()).collect();

    let mut writes = false;
    let (roster, present) = if frozen {
        frozen_roster(env, key, stored, &catalogue_sids, &info.date_grades)?
    } else {
        let (roster, present, wrote) = live_roster(env, key, stored, &info.date_grades)?;
        writes |= wrote;
        (roster, present)
    };

    let config = crate::config::resolve(
        &env.config,
        &catalogue,
        &present,
        &key.occasion,
        &key.class_group,
        &mut env.messages,
    )?;
    let all_sids = config.all_sids();

    let mut rows = Vec::with_capacity(roster.len());
    for entry in roster {
        let mut grades = build_row(env, &config, &entry);
        evaluate_row(&config, &mut grades);
        if let Some(old) = &entry.stored {
            if old.grades != grades {
                env.store.update_field(
                    GRADES,
                    "GRADE_MAP",
                    &grades.encode(),
                    &key.pupil_filters(&entry.pupil.pid),
                )?;
                tracing::debug!(pid = %entry.pupil.pid, "stored grade map refreshed");
                writes = true;
            }
        }
        rows.push(PupilRow {
            pupil: entry.pupil,
            locked: entry.locked,
            grades,
        });
    }

    if writes {
        info.modified = touch_modified(env, key)?;
    }

    Ok(GradeTable {
        key: key.clone(),
        schoolyear: env.config.schoolyear.clone(),
        config,
        all_sids,
        rows,
        info,
        frozen,
    })
}

/// Stored roster in stored order. Pupil data comes from `PUPILS` when the
/// pupil still exists; locks are the stored `NO_GRADE` subject cells.
fn frozen_roster(
    env: &mut Environment,
    key: &TableKey,
    stored: Vec<StoredRow>,
    catalogue_sids: &HashSet<&str>,
    date_grades: &str,
) -> Result<(Vec<RosterEntry>, BTreeSet<String>)> {
    if stored.is_empty() {
        return Err(GradeError::NoPupilGrades {
            occasion: key.occasion.clone(),
            class_group: key.class_group.clone(),
        });
    }

    let live: BTreeSet<String> = group_pupils(&env.store, &key.class_group, Some(date_grades))?
        .into_iter()
        .map(|p| p.pid)
        .collect();
    let stored_pids: BTreeSet<String> = stored.iter().map(|r| r.pid.clone()).collect();
    for pid in live.difference(&stored_pids) {
        env.messages.warning(
            "roster_changed",
            format!("{} joined {} after the grading date", pid, key.class_group),
        );
    }
    for pid in stored_pids.difference(&live) {
        env.messages.warning(
            "roster_changed",
            format!("{} left {} after the grading date", pid, key.class_group),
        );
    }

    let mut present = BTreeSet::new();
    let mut roster = Vec::with_capacity(stored.len());
    for row in stored {
        let mut pupil = match load_pupil(&env.store, &row.pid)? {
            Some(p) => p,
            None => Pupil::unknown(&row.pid, &row.level),
        };
        pupil.level = row.level.clone();
        let mut locked = BTreeSet::new();
        for (sid, value) in row.grades.iter() {
            if !catalogue_sids.contains(sid) {
                continue;
            }
            present.insert(sid.to_string());
            if value == NO_GRADE {
                locked.insert(sid.to_string());
            }
        }
        roster.push(RosterEntry {
            pupil,
            locked,
            stored: Some(row),
        });
    }
    Ok((roster, present))
}

/// Live roster from the enrolment matrix. Level changes and removals are
/// written here, before any grade map is evaluated.
fn live_roster(
    env: &mut Environment,
    key: &TableKey,
    stored: Vec<StoredRow>,
    date_grades: &str,
) -> Result<(Vec<RosterEntry>, BTreeSet<String>, bool)> {
    let matrix = enrolment_matrix(&env.store, &key.class_group, Some(date_grades))?;
    let present = enrolled_subjects(matrix.iter().map(|(_, t)| t));
    let mut old: BTreeMap<String, StoredRow> =
        stored.into_iter().map(|r| (r.pid.clone(), r)).collect();
    let mut writes = false;

    let mut roster = Vec::with_capacity(matrix.len());
    for (pupil, tids) in matrix {
        let stored = old.remove(&pupil.pid);
        if let Some(row) = &stored {
            if row.level != pupil.level {
                env.store.update_field(
                    GRADES,
                    "LEVEL",
                    &pupil.level,
                    &key.pupil_filters(&pupil.pid),
                )?;
                tracing::info!(pid = %pupil.pid, from = %row.level, to = %pupil.level, "level changed");
                writes = true;
            }
        }
        let locked = present
            .iter()
            .filter(|sid| !is_enrolled(&tids, sid))
            .cloned()
            .collect();
        roster.push(RosterEntry {
            pupil,
            locked,
            stored,
        });
    }

    for pid in old.keys() {
        let n = env.store.delete_rows(GRADES, &key.pupil_filters(pid))?;
        if n > 0 {
            env.messages.warning(
                "pupil_removed",
                format!("{} is no longer in {}, stored grades deleted", pid, key.class_group),
            );
            writes = true;
        }
    }
    Ok((roster, present, writes))
}

/// Row in column order: locked subjects, then stored values, then choice
/// defaults.
fn build_row(env: &mut Environment, config: &ResolvedConfig, entry: &RosterEntry) -> GradeMap {
    let stored = entry.stored.as_ref().map(|r| &r.grades);
    let mut grades = GradeMap::new();
    for cell in config.columns() {
        let old = stored.and_then(|m| m.get(&cell.sid));
        let value = if cell.is_subject() && entry.locked.contains(&cell.sid) {
            if let Some(v) = old.filter(|v| !v.is_empty() && *v != NO_GRADE) {
                env.messages.warning(
                    "grade_relocked",
                    format!(
                        "{}: grade {} in {} dropped, pupil no longer enrolled",
                        entry.pupil.pid, v, cell.sid
                    ),
                );
            }
            NO_GRADE
        } else if let Some(v) = old {
            v
        } else {
            cell.default_value()
        };
        grades.set(&cell.sid, value);
    }
    grades
}
