//! Pupils, subject catalogue and the per-group enrolment matrix.

use crate::error::Result;
use crate::store::{Record, Store, COURSES, PUPILS, SUBJECTS};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// `sid -> teacher tag`; an empty tag means "not enrolled".
pub type TidMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Pupil {
    pub pid: String,
    pub lastname: String,
    pub firstname: String,
    pub sort_name: String,
    pub class: String,
    pub level: String,
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub exit_d: String,
}

impl Pupil {
    fn from_record(r: Record<'_>) -> Self {
        Self {
            pid: r.get("PID").to_string(),
            lastname: r.get("LASTNAME").to_string(),
            firstname: r.get("FIRSTNAME").to_string(),
            sort_name: r.get("SORT_NAME").to_string(),
            class: r.get("CLASS").to_string(),
            level: r.get("LEVEL").to_string(),
            groups: r.get("GROUPS").split_whitespace().map(str::to_string).collect(),
            exit_d: r.get("EXIT_D").to_string(),
        }
    }

    /// Stand-in for a pupil that only exists in stored grades.
    pub fn unknown(pid: &str, level: &str) -> Self {
        Self {
            pid: pid.to_string(),
            lastname: String::new(),
            firstname: String::new(),
            sort_name: pid.to_string(),
            class: String::new(),
            level: level.to_string(),
            groups: Vec::new(),
            exit_d: String::new(),
        }
    }

    pub fn display_name(&self) -> String {
        match (self.firstname.is_empty(), self.lastname.is_empty()) {
            (true, true) => self.pid.clone(),
            (true, false) => self.lastname.clone(),
            (false, true) => self.firstname.clone(),
            (false, false) => format!("{} {}", self.firstname, self.lastname),
        }
    }

    pub fn in_group(&self, tag: &str) -> bool {
        self.groups.iter().any(|g| g == tag)
    }

    /// ISO dates compare lexically.
    pub fn left_before(&self, date: &str) -> bool {
        !self.exit_d.is_empty() && self.exit_d.as_str() < date
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectInfo {
    pub sid: String,
    pub name: String,
    pub sorting: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub grp: String,
    pub sid: String,
    pub tid: String,
}

/// Split `"K.G"` at the first dot; `"K"` has no group tag.
pub fn split_class_group(class_group: &str) -> (&str, Option<&str>) {
    match class_group.split_once('.') {
        Some((class, tag)) => (class, Some(tag)),
        None => (class_group, None),
    }
}

pub fn load_catalogue(store: &Store) -> Result<Vec<SubjectInfo>> {
    let rows = store.read_table(SUBJECTS, &["SID", "NAME", "SORTING", "GROUP"], &[])?;
    Ok(rows
        .records()
        .map(|r| SubjectInfo {
            sid: r.get("SID").to_string(),
            name: r.get("NAME").to_string(),
            sorting: r.get("SORTING").to_string(),
            group: r.get("GROUP").to_string(),
        })
        .collect())
}

pub fn load_courses(store: &Store, class: &str) -> Result<Vec<Course>> {
    let rows = store.read_table(COURSES, &["GRP", "SID", "TID"], &[("CLASS", class)])?;
    Ok(rows
        .records()
        .map(|r| Course {
            grp: r.get("GRP").to_string(),
            sid: r.get("SID").to_string(),
            tid: r.get("TID").to_string(),
        })
        .collect())
}

pub fn load_pupil(store: &Store, pid: &str) -> Result<Option<Pupil>> {
    let rows = store.read_table(PUPILS, &[], &[("PID", pid)])?;
    let pupil = rows.records().next().map(Pupil::from_record);
    Ok(pupil)
}

/// Pupils of a class-group in `SORT_NAME` order. With a date, pupils who
/// left before it are dropped.
pub fn group_pupils(store: &Store, class_group: &str, date: Option<&str>) -> Result<Vec<Pupil>> {
    let (class, tag) = split_class_group(class_group);
    let rows = store.read_table(PUPILS, &[], &[("CLASS", class)])?;
    let mut pupils: Vec<Pupil> = rows
        .records()
        .map(Pupil::from_record)
        .filter(|p| tag.map(|t| p.in_group(t)).unwrap_or(true))
        .filter(|p| date.map(|d| !p.left_before(d)).unwrap_or(true))
        .collect();
    pupils.sort_by(|a, b| a.sort_name.cmp(&b.sort_name));
    Ok(pupils)
}

/// Teacher tags of every course of the pupil's class. A course counts when
/// it has a teacher and is for the whole class (`"*"`) or one of the
/// pupil's groups.
pub fn pupil_enrolment(courses: &[Course], pupil: &Pupil) -> TidMap {
    let mut map = TidMap::new();
    for c in courses {
        let slot = map.entry(c.sid.clone()).or_default();
        if !slot.is_empty() || c.tid.is_empty() {
            continue;
        }
        if c.grp == "*" || pupil.in_group(&c.grp) {
            *slot = c.tid.clone();
        }
    }
    map
}

pub fn is_enrolled(tids: &TidMap, sid: &str) -> bool {
    tids.get(sid).map(|t| !t.is_empty()).unwrap_or(false)
}

/// `(pupil, sid -> tid)` for the group, in `SORT_NAME` order.
pub fn enrolment_matrix(
    store: &Store,
    class_group: &str,
    date: Option<&str>,
) -> Result<Vec<(Pupil, TidMap)>> {
    let (class, _) = split_class_group(class_group);
    let courses = load_courses(store, class)?;
    let pupils = group_pupils(store, class_group, date)?;
    Ok(pupils
        .into_iter()
        .map(|p| {
            let tids = pupil_enrolment(&courses, &p);
            (p, tids)
        })
        .collect())
}

/// Subjects with at least one enrolled pupil.
pub fn enrolled_subjects<'a, I>(tid_maps: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a TidMap>,
{
    let mut sids = BTreeSet::new();
    for tids in tid_maps {
        for (sid, tid) in tids {
            if !tid.is_empty() {
                sids.insert(sid.clone());
            }
        }
    }
    sids
}
