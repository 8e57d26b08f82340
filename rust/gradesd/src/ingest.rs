//! Grade-entry sheets: reading one, collating several, writing one.
//!
//! Layout of a sheet:
//!
//! ```text
//! <label>      <value>         info section, one field per row
//! ...
//!
//! <PID label>  <NAME label>  <LEVEL label>  sid1   sid2  ...
//! $                                          name1  name2 ...
//! pid          display name  level          g11    g12   ...
//! ```
//!
//! Labels are mapped back to field names through `HEADERS` and
//! `INFO_FIELDS`. Rows whose first cell is `$` are not pupils.

use crate::cells::Cell;
use crate::codec::TableCodec;
use crate::config::{ExtraType, GradeConfig};
use crate::env::{Environment, Messages};
use crate::error::{GradeError, Result};
use crate::grades::{GradeSet, NO_GRADE};
use crate::table::GradeTable;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Marks a row that is not a pupil.
pub const NON_PUPIL: &str = "$";

/// Info fields of a sheet, in the order they are written.
pub const SHEET_INFO: &[&str] = &[
    "SCHOOLYEAR",
    "CLASS_GROUP",
    "OCCASION",
    "INSTANCE",
    "DATE_ISSUE",
    "DATE_GRADES",
];

/// Leading columns of every pupil row.
const PUPIL_COLUMNS: &[&str] = &["PID", "NAME", "LEVEL"];

/// `pid -> sid -> grade`.
pub type Collated = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFile {
    pub path: PathBuf,
    pub info: BTreeMap<String, String>,
    /// Subject columns in sheet order.
    pub sids: Vec<String>,
    pub pupils: Collated,
}

impl GradeFile {
    pub fn info(&self, field: &str) -> &str {
        self.info.get(field).map(String::as_str).unwrap_or("")
    }
}

fn bad_file(path: &Path, reason: impl Into<String>) -> GradeError {
    GradeError::BadFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// What a group's sheets may hold.
struct SheetRules {
    grades: GradeSet,
    /// Extra columns; their values are not checked against the scale.
    extras: HashSet<String>,
    /// Extra columns filled in by evaluation.
    computed: HashSet<String>,
}

impl SheetRules {
    fn for_group(config: &GradeConfig, occasion: &str, class_group: &str) -> Result<Self> {
        let og = config.occasion_group(occasion, class_group)?;
        let grades = config
            .grade_scales
            .get(&og.grades)
            .map(|rows| GradeSet::from_scale(rows))
            .unwrap_or_default();
        let mut extras = HashSet::new();
        let mut computed = HashSet::new();
        for f in config.extra_fields(class_group) {
            extras.insert(f.sid.clone());
            if matches!(f.kind, ExtraType::Composite | ExtraType::Calculate) && f.function.is_some()
            {
                computed.insert(f.sid.clone());
            }
        }
        Ok(Self {
            grades,
            extras,
            computed,
        })
    }

    /// Blank and report every subject grade outside the scale.
    fn check_grades(&self, messages: &mut Messages, file: &mut GradeFile) {
        for (pid, cells) in file.pupils.iter_mut() {
            for (sid, value) in cells.iter_mut() {
                if self.extras.contains(sid) || self.grades.is_valid(value) {
                    continue;
                }
                let err = GradeError::InvalidGrade {
                    pid: pid.clone(),
                    sid: sid.clone(),
                    grade: value.clone(),
                };
                messages.error(err.code(), format!("{}: {}", file.path.display(), err));
                value.clear();
            }
        }
    }
}

/// Split a sheet into its info section, subject columns and pupil rows,
/// mapping labels to field names. Grades are taken as they stand.
fn parse_grade_sheet(
    config: &GradeConfig,
    codec: &dyn TableCodec,
    path: &Path,
) -> Result<GradeFile> {
    let sheet = codec.read_table(path)?;
    let labels = config.label_map();
    let field = |cell: &str| -> String {
        labels.get(cell).cloned().unwrap_or_else(|| cell.to_string())
    };

    let mut rows = sheet.iter();
    let mut info = BTreeMap::new();
    let header: Vec<String> = loop {
        let Some(row) = rows.next() else {
            return Err(bad_file(path, "no header row"));
        };
        let Some(first) = row.first().filter(|c| !c.is_empty()) else {
            continue;
        };
        let name = field(first);
        if name == "PID" {
            break row.iter().map(|c| field(c)).collect();
        }
        info.insert(name, row.get(1).cloned().unwrap_or_default());
    };

    let sids: Vec<String> = header
        .iter()
        .filter(|h| !h.is_empty() && !PUPIL_COLUMNS.contains(&h.as_str()))
        .cloned()
        .collect();

    let mut pupils = Collated::new();
    for row in rows {
        let pid = row.first().map(String::as_str).unwrap_or("");
        if pid.is_empty() || pid == NON_PUPIL {
            continue;
        }
        let cells: BTreeMap<String, String> = header
            .iter()
            .zip(row.iter())
            .filter(|(name, _)| !name.is_empty() && !PUPIL_COLUMNS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        pupils.insert(pid.to_string(), cells);
    }
    tracing::debug!(path = %path.display(), pupils = pupils.len(), "grade sheet read");

    Ok(GradeFile {
        path: path.to_path_buf(),
        info,
        sids,
        pupils,
    })
}

/// Read one grade-entry sheet. Grades outside the scale of the sheet's own
/// group are reported and blanked.
pub fn read_grade_table_file(
    env: &mut Environment,
    codec: &dyn TableCodec,
    path: &Path,
) -> Result<GradeFile> {
    let mut file = parse_grade_sheet(&env.config, codec, path)?;
    let rules = SheetRules::for_group(
        &env.config,
        file.info("OCCASION"),
        file.info("CLASS_GROUP"),
    )?;
    rules.check_grades(&mut env.messages, &mut file);
    Ok(file)
}

fn check_header(
    file: &GradeFile,
    schoolyear: &str,
    occasion: &str,
    class_group: &str,
) -> Result<()> {
    let mismatch = |field: &str, expected: &str| -> Option<(String, String)> {
        let found = file.info(field);
        (found != expected).then(|| (expected.to_string(), found.to_string()))
    };
    let path = file.path.clone();
    if let Some((expected, found)) = mismatch("SCHOOLYEAR", schoolyear) {
        return Err(GradeError::TableYearMismatch {
            path,
            expected,
            found,
        });
    }
    if let Some((expected, found)) = mismatch("CLASS_GROUP", class_group) {
        return Err(GradeError::TableClassMismatch {
            path,
            expected,
            found,
        });
    }
    if let Some((expected, found)) = mismatch("OCCASION", occasion) {
        return Err(GradeError::TableTermMismatch {
            path,
            expected,
            found,
        });
    }
    Ok(())
}

/// Merge the sheets of several teachers into one grade map.
///
/// A sheet that cannot be read or whose header does not match is reported
/// and left out. Two sheets that give different grades for the same cell
/// abort the collation.
pub fn collate_grade_tables(
    env: &mut Environment,
    codec: &dyn TableCodec,
    files: &[PathBuf],
    occasion: &str,
    class_group: &str,
) -> Result<Collated> {
    let mut collated = Collated::new();
    let mut sources: HashMap<(String, String), PathBuf> = HashMap::new();
    let schoolyear = env.config.schoolyear.clone();
    let rules = SheetRules::for_group(&env.config, occasion, class_group)?;

    for path in files {
        let parsed = parse_grade_sheet(&env.config, codec, path)
            .and_then(|f| check_header(&f, &schoolyear, occasion, class_group).map(|_| f));
        let mut file = match parsed {
            Ok(f) => f,
            Err(e @ GradeError::Store(_)) => return Err(e),
            Err(e) => {
                env.messages
                    .error(e.code(), format!("{} skipped: {}", path.display(), e));
                continue;
            }
        };
        rules.check_grades(&mut env.messages, &mut file);

        for (pid, cells) in &file.pupils {
            for (sid, grade) in cells {
                if grade.is_empty() || grade == NO_GRADE || rules.computed.contains(sid) {
                    continue;
                }
                let slot = collated.entry(pid.clone()).or_default();
                match slot.get(sid) {
                    None => {
                        slot.insert(sid.clone(), grade.clone());
                        sources.insert((pid.clone(), sid.clone()), path.clone());
                    }
                    Some(first) if first == grade => {}
                    Some(first) => {
                        let first_file = sources
                            .get(&(pid.clone(), sid.clone()))
                            .cloned()
                            .unwrap_or_default();
                        return Err(GradeError::GradeConflict {
                            pid: pid.clone(),
                            sid: sid.clone(),
                            first_grade: first.clone(),
                            first_file,
                            second_grade: grade.clone(),
                            second_file: path.clone(),
                        });
                    }
                }
            }
        }
    }
    tracing::info!(files = files.len(), pupils = collated.len(), "grade sheets collated");
    Ok(collated)
}

/// Write the grade-entry sheet of `table`; [`read_grade_table_file`] reads
/// it back. Computed columns are left out.
pub fn write_grade_table_file(
    env: &Environment,
    codec: &dyn TableCodec,
    table: &GradeTable,
    path: &Path,
) -> Result<()> {
    let config = &env.config;
    let mut sheet: Vec<Vec<String>> = Vec::new();
    for field in SHEET_INFO {
        let value = match *field {
            "SCHOOLYEAR" => table.schoolyear.as_str(),
            "CLASS_GROUP" => table.key.class_group.as_str(),
            "OCCASION" => table.key.occasion.as_str(),
            "INSTANCE" => table.key.instance.as_str(),
            "DATE_ISSUE" => table.info.date_issue.as_str(),
            _ => table.info.date_grades.as_str(),
        };
        sheet.push(vec![config.info_label(field).to_string(), value.to_string()]);
    }
    sheet.push(Vec::new());

    let mut header: Vec<String> = PUPIL_COLUMNS
        .iter()
        .map(|f| config.header_label(f).to_string())
        .collect();
    let mut names = vec![NON_PUPIL.to_string(), String::new(), String::new()];
    let columns: Vec<&Cell> = table.config.columns().filter(|c| !c.is_computed()).collect();
    for cell in &columns {
        header.push(cell.sid.clone());
        names.push(cell.name.clone());
    }
    sheet.push(header);
    sheet.push(names);

    for row in &table.rows {
        let mut line = vec![
            row.pupil.pid.clone(),
            row.pupil.display_name(),
            row.pupil.level.clone(),
        ];
        line.extend(columns.iter().map(|c| row.grades.value(&c.sid).to_string()));
        sheet.push(line);
    }
    codec.write_table(path, &sheet)?;
    tracing::info!(path = %path.display(), pupils = table.rows.len(), "grade sheet written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TsvCodec;
    use crate::reconcile::update_pupil_grades;
    use crate::table::full_grade_table;
    use crate::table::tests::{environment, key};

    const INFO: &str = "Schuljahr\t2026\nKlasse/Gruppe\t12.G\nAnlass\t1. Halbjahr\n\n";

    fn sheet(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("{}{}", INFO, body)).expect("write sheet");
        path
    }

    #[test]
    fn reads_labels_skips_non_pupil_rows_and_blanks_invalid_grades() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sheet(
            dir.path(),
            "en.tsv",
            "ID\tName\tStufe\tEn\tMa\tREMARK\n\
             $\t\t\tEnglisch\tMathematik\tBemerkungen\n\
             A\tA Adler\tGym\t16\t08\tgut\n\
             B\tB Bauer\tGym\tnt\t/\t\n",
        );
        let file = read_grade_table_file(&mut env, &TsvCodec, &path).expect("read");
        assert_eq!(file.info("SCHOOLYEAR"), "2026");
        assert_eq!(file.info("CLASS_GROUP"), "12.G");
        assert_eq!(file.sids, vec!["En", "Ma", "REMARK"]);
        assert_eq!(file.pupils.len(), 2);
        let a = &file.pupils["A"];
        assert_eq!(a["En"], "");
        assert_eq!(a["Ma"], "08");
        assert_eq!(a["REMARK"], "gut");
        assert!(!a.contains_key("PID") && !a.contains_key("NAME"));
        assert_eq!(file.pupils["B"]["En"], "nt");
        assert!(env.messages.has_code("invalid_grade"));
        assert_eq!(env.messages.take().len(), 1);
    }

    #[test]
    fn sheet_without_header_row_is_bad() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sheet(dir.path(), "x.tsv", "A\t09\n");
        assert!(matches!(
            read_grade_table_file(&mut env, &TsvCodec, &path),
            Err(GradeError::BadFile { .. })
        ));
    }

    #[test]
    fn conflicting_sheets_abort_collation() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let f1 = sheet(dir.path(), "f1.tsv", "ID\tEn\nA\t09\n");
        let f2 = sheet(dir.path(), "f2.tsv", "ID\tEn\nA\t10\n");
        let err = collate_grade_tables(
            &mut env,
            &TsvCodec,
            &[f1.clone(), f2.clone()],
            "1. Halbjahr",
            "12.G",
        )
        .expect_err("conflict");
        match err {
            GradeError::GradeConflict {
                first_file,
                second_file,
                ..
            } => {
                assert_eq!(first_file, f1);
                assert_eq!(second_file, f2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn agreeing_sheets_collate() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let f1 = sheet(dir.path(), "f1.tsv", "ID\tEn\tMa\nA\t09\t\n");
        let f2 = sheet(dir.path(), "f2.tsv", "ID\tEn\tMa\nA\t09\t07\nB\t/\t\n");
        let collated =
            collate_grade_tables(&mut env, &TsvCodec, &[f1, f2], "1. Halbjahr", "12.G")
                .expect("collate");
        assert_eq!(collated["A"]["En"], "09");
        assert_eq!(collated["A"]["Ma"], "07");
        assert!(!collated.contains_key("B"));
    }

    #[test]
    fn mismatched_header_skips_only_that_file() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let good = sheet(dir.path(), "good.tsv", "ID\tEn\nA\t09\n");
        let other = dir.path().join("other.tsv");
        std::fs::write(
            &other,
            "Schuljahr\t2025\nKlasse/Gruppe\t12.G\nAnlass\t1. Halbjahr\n\nID\tEn\nA\t01\n",
        )
        .expect("write");
        let collated = collate_grade_tables(
            &mut env,
            &TsvCodec,
            &[good, other],
            "1. Halbjahr",
            "12.G",
        )
        .expect("collate");
        assert_eq!(collated["A"]["En"], "09");
        assert!(env.messages.has_code("table_year_mismatch"));
    }

    #[test]
    fn foreign_occasion_is_a_term_mismatch() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let good = sheet(dir.path(), "good.tsv", "ID\tEn\nA\t09\n");
        let easter = dir.path().join("easter.tsv");
        std::fs::write(
            &easter,
            "Schuljahr\t2026\nKlasse/Gruppe\t12.G\nAnlass\tOstern\n\nID\tEn\nB\t05\n",
        )
        .expect("write");
        let collated = collate_grade_tables(
            &mut env,
            &TsvCodec,
            &[good, easter],
            "1. Halbjahr",
            "12.G",
        )
        .expect("collate");
        assert!(!collated.contains_key("B"));
        let codes: Vec<String> = env.messages.take().into_iter().map(|m| m.code).collect();
        assert_eq!(codes, vec!["table_term_mismatch"]);
    }

    #[test]
    fn foreign_class_is_rejected_before_its_grades_are_checked() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        // 09 is no SekI grade, but the sheet is not for this group anyway.
        let other = dir.path().join("class10.tsv");
        std::fs::write(
            &other,
            "Schuljahr\t2026\nKlasse/Gruppe\t10\nAnlass\t1. Halbjahr\n\nID\tEn\nA\t09\n",
        )
        .expect("write");
        let collated =
            collate_grade_tables(&mut env, &TsvCodec, &[other], "1. Halbjahr", "12.G")
                .expect("collate");
        assert!(collated.is_empty());
        let codes: Vec<String> = env.messages.take().into_iter().map(|m| m.code).collect();
        assert_eq!(codes, vec!["table_class_mismatch"]);
    }

    #[test]
    fn collation_checks_grades_against_the_callers_scale() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let f = sheet(dir.path(), "f.tsv", "ID\tEn\tMa\nA\t2+\t07\n");
        let collated = collate_grade_tables(&mut env, &TsvCodec, &[f], "1. Halbjahr", "12.G")
            .expect("collate");
        assert!(!collated["A"].contains_key("En"));
        assert_eq!(collated["A"]["Ma"], "07");
        assert!(env.messages.has_code("invalid_grade"));
    }

    #[test]
    fn stale_computed_columns_do_not_conflict() {
        let mut env = environment();
        let dir = tempfile::tempdir().expect("tempdir");
        let f1 = sheet(dir.path(), "f1.tsv", "ID\tEn\tDe\tD_AVG\nA\t09\t11\t10,00\n");
        let f2 = sheet(dir.path(), "f2.tsv", "ID\tMa\tDe\tD_AVG\nA\t08\t12\t09,50\n");
        let collated =
            collate_grade_tables(&mut env, &TsvCodec, &[f1, f2], "1. Halbjahr", "12.G")
                .expect("collate");
        let a = &collated["A"];
        assert_eq!(a["En"], "09");
        assert_eq!(a["Ma"], "08");
        assert!(!a.contains_key("De") && !a.contains_key("D_AVG"));
    }

    #[test]
    fn written_sheet_reads_back() {
        let mut env = environment();
        let mut table = full_grade_table(&mut env, &key()).expect("table");
        update_pupil_grades(
            &mut env,
            &mut table,
            "A",
            &[("En".to_string(), "09".to_string()), ("Ma".to_string(), "11".to_string())],
        )
        .expect("save");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("12G.tsv");
        write_grade_table_file(&env, &TsvCodec, &table, &path).expect("write");
        let file = read_grade_table_file(&mut env, &TsvCodec, &path).expect("read");

        assert_eq!(file.info("OCCASION"), "1. Halbjahr");
        assert_eq!(file.info("DATE_GRADES"), table.info.date_grades);
        let entered: Vec<String> = table
            .config
            .columns()
            .filter(|c| !c.is_computed())
            .map(|c| c.sid.clone())
            .collect();
        assert_eq!(file.sids, entered);
        assert!(!file.sids.iter().any(|s| s == "De" || s == "D_AVG"));
        let a = &file.pupils["A"];
        assert_eq!(a["En"], "09");
        assert_eq!(a["Ma"], "11");
        assert_eq!(file.pupils["B"]["Ma"], NO_GRADE);
        assert!(!env.messages.has_code("invalid_grade"));
    }
}
