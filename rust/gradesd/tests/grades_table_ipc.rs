use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradesd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradesd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn write_config(workspace: &Path) {
    let config = json!({
        "SCHOOLYEAR": "2026",
        "OCCASIONS": [
            ["1. Halbjahr", { "12": { "GRADES": "SekII", "GRADE_ENTRY": "sekii" } }]
        ],
        "GRADE_SCALES": {
            "SekII": [
                [["15", "14", "13", "12", "11", "10", "09", "08", "07", "06", "05", "04", "03", "02", "01", "00"], ""],
                [["nt"], "nicht teilgenommen"],
                [["/"], "––––––"],
                [["*"], "––––––"]
            ]
        },
        "SYMBOLS": { "SCHOOL": "Freie Schule" },
        "COMPOSITES": { "De": ["Deutsch", "A", ["De1", "De2", "De3"]] },
        "CALCULATES": { "D_AVG": ["Durchschnitt", "*"] },
        "GRADE_FIELDS_EXTRA": {
            "12": { "*": [
                { "SID": "De", "TYPE": "COMPOSITE", "FUNCTION": "COMPOSITE_SEKII" },
                { "SID": "D_AVG", "TYPE": "CALCULATE", "FUNCTION": "AVERAGE_SEKII" },
                { "SID": "REMARK", "TYPE": "TEXT", "NAME": "Bemerkungen" }
            ] }
        }
    });
    std::fs::write(workspace.join("grades_config.json"), config.to_string()).expect("write config");
}

fn open_class_12(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &Path) {
    write_config(workspace);
    request_ok(
        stdin,
        reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "import",
        "masterdata.import",
        json!({
            "subjects": [
                { "SID": "En", "NAME": "Englisch", "SORTING": "A1" },
                { "SID": "De1", "NAME": "Deutsch schriftlich", "SORTING": "A0" },
                { "SID": "De2", "NAME": "Deutsch mündlich", "SORTING": "A0" },
                { "SID": "De3", "NAME": "Deutsch Projekt", "SORTING": "A0" },
                { "SID": "Ma", "NAME": "Mathematik", "SORTING": "B0" }
            ],
            "pupils": [
                { "PID": "A", "CLASS": "12", "LASTNAME": "Adler", "FIRSTNAME": "Anna", "SORT_NAME": "adler", "LEVEL": "Gym", "GROUPS": ["M"] },
                { "PID": "B", "CLASS": "12", "LASTNAME": "Bauer", "FIRSTNAME": "Ben", "SORT_NAME": "bauer", "LEVEL": "Gym" }
            ],
            "courses": [
                { "CLASS": "12", "SID": "En", "TID": "t1" },
                { "CLASS": "12", "SID": "De1", "TID": "t2" },
                { "CLASS": "12", "SID": "De2", "TID": "t2" },
                { "CLASS": "12", "SID": "De3", "TID": "t2" },
                { "CLASS": "12", "GRP": "M", "SID": "Ma", "TID": "t3" }
            ]
        }),
    );
}

fn table_params() -> serde_json::Value {
    json!({ "occasion": "1. Halbjahr", "classGroup": "12" })
}

fn with_table(extra: serde_json::Value) -> serde_json::Value {
    let mut params = table_params();
    if let (Some(p), Some(e)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in e {
            p.insert(k.clone(), v.clone());
        }
    }
    params
}

fn has_message(result: &serde_json::Value, code: &str) -> bool {
    result["messages"]
        .as_array()
        .map(|items| items.iter().any(|m| m["code"] == code))
        .unwrap_or(false)
}

fn row<'a>(table: &'a serde_json::Value, pid: &str) -> &'a serde_json::Value {
    table["rows"]
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["pupil"]["PID"] == pid))
        .unwrap_or_else(|| panic!("no row for {}: {}", pid, table))
}

#[test]
fn new_table_lists_columns_and_locks_unenrolled_subjects() {
    let workspace = temp_dir("gradesd-table-new");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_class_12(&mut stdin, &mut reader, &workspace);

    let table = request_ok(&mut stdin, &mut reader, "1", "grades.table", table_params());
    assert_eq!(
        table["allSids"],
        json!(["En", "Ma", "De1", "De2", "De3", "De", "D_AVG", "REMARK"])
    );
    assert_eq!(table["modified"], "1970-01-01T00:00:00");
    assert_eq!(table["frozen"], false);
    assert_eq!(table["schoolyear"], "2026");

    let b = row(&table, "B");
    assert_eq!(b["grades"]["Ma"], "/");
    assert_eq!(b["locked"], json!(["Ma"]));
    let a = row(&table, "A");
    assert_eq!(a["grades"]["Ma"], "");
    assert_eq!(a["grades"]["De"], "");

    let resolved = request_ok(&mut stdin, &mut reader, "2", "config.resolve", table_params());
    assert_eq!(resolved["allSids"], table["allSids"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn saving_grades_evaluates_composites_and_skips_locked_cells() {
    let workspace = temp_dir("gradesd-table-save");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_class_12(&mut stdin, &mut reader, &workspace);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.updatePupil",
        with_table(json!({ "pid": "A", "grades": { "De1": "13", "De2": "11", "De3": "10", "En": "09" } })),
    );
    assert_eq!(saved["written"], true);
    assert_eq!(saved["grades"]["De"], "11");
    assert_eq!(saved["grades"]["D_AVG"], "10,00");
    let first_modified = saved["modified"].as_str().unwrap_or("").to_string();
    assert_ne!(first_modified, "1970-01-01T00:00:00");
    let changed: Vec<&str> = saved["changes"]
        .as_array()
        .expect("changes")
        .iter()
        .filter_map(|c| c[0].as_str())
        .collect();
    assert!(changed.contains(&"De"), "{:?}", changed);

    // Saving the same values again writes nothing.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.updatePupil",
        with_table(json!({ "pid": "A", "grades": { "De1": "13", "De2": "11", "De3": "10", "En": "09" } })),
    );
    assert_eq!(again["written"], false);
    assert_eq!(again["changes"], json!([]));
    assert_eq!(again["modified"], first_modified.as_str());

    let locked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.updatePupil",
        with_table(json!({ "pid": "B", "grades": { "Ma": "08", "En": "12" } })),
    );
    assert!(has_message(&locked, "cell_locked"), "{}", locked);
    assert_eq!(locked["grades"]["Ma"], "/");
    assert_eq!(locked["grades"]["En"], "12");

    let invalid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.updatePupil",
        with_table(json!({ "pid": "B", "grades": { "En": "1+" } })),
    );
    assert!(has_message(&invalid, "invalid_grade"), "{}", invalid);
    assert_eq!(invalid["grades"]["En"], "12");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.updatePupil",
        with_table(json!({ "pid": "B", "grades": { "Latin": "12" } })),
    );
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"]["code"], "unknown_field");

    let stranger = request(
        &mut stdin,
        &mut reader,
        "6",
        "grades.updatePupil",
        with_table(json!({ "pid": "Z", "grades": { "En": "12" } })),
    );
    assert_eq!(stranger["error"]["code"], "not_found");

    let printed = request_ok(&mut stdin, &mut reader, "7", "grades.print", table_params());
    let pupils = printed["pupils"].as_array().expect("pupils");
    let a = pupils.iter().find(|p| p["pid"] == "A").expect("pupil A");
    assert_eq!(a["name"], "Anna Adler");
    assert_eq!(a["grades"]["De"], "11");
    let b = pupils.iter().find(|p| p["pid"] == "B").expect("pupil B");
    assert_eq!(b["grades"]["Ma"], "––––––");
    assert_eq!(printed["symbols"]["SCHOOL"], "Freie Schule");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn table_info_and_pupil_rows_can_be_edited() {
    let workspace = temp_dir("gradesd-table-info");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_class_12(&mut stdin, &mut reader, &workspace);

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.updateInfo",
        with_table(json!({ "field": "DATE_ISSUE", "value": "2027-01-29" })),
    );
    assert_ne!(set["modified"], "1970-01-01T00:00:00");
    let table = request_ok(&mut stdin, &mut reader, "2", "grades.table", table_params());
    assert_eq!(table["dateIssue"], "2027-01-29");

    let bad_field = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.updateInfo",
        with_table(json!({ "field": "MODIFIED", "value": "2027-01-29" })),
    );
    assert_eq!(bad_field["error"]["code"], "unknown_field");

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.updateInfo",
        with_table(json!({ "field": "DATE_GRADES", "value": "29.01.2027" })),
    );
    assert_eq!(bad_date["error"]["code"], "invalid_date");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.updatePupil",
        with_table(json!({ "pid": "B", "grades": { "En": "07" } })),
    );
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.deletePupil",
        with_table(json!({ "pid": "B" })),
    );
    assert_eq!(deleted["deleted"], true);
    let twice = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.deletePupil",
        with_table(json!({ "pid": "B" })),
    );
    assert_eq!(twice["deleted"], false);
    assert!(twice["modified"].is_null());

    let unknown = request(
        &mut stdin,
        &mut reader,
        "8",
        "grades.table",
        json!({ "occasion": "Abitur", "classGroup": "12" }),
    );
    assert_eq!(unknown["error"]["code"], "unknown_occasion");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn past_grading_date_freezes_the_roster() {
    let workspace = temp_dir("gradesd-table-frozen");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_class_12(&mut stdin, &mut reader, &workspace);

    for (i, pid) in ["A", "B"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("save{}", i),
            "grades.updatePupil",
            with_table(json!({ "pid": pid, "grades": { "En": "10" } })),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.updateInfo",
        with_table(json!({ "field": "DATE_GRADES", "value": "2000-01-31" })),
    );

    // B changes class and C joins after the grading date.
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "masterdata.import",
        json!({
            "pupils": [
                { "PID": "B", "CLASS": "11", "LASTNAME": "Bauer", "FIRSTNAME": "Ben", "SORT_NAME": "bauer", "LEVEL": "Gym" },
                { "PID": "C", "CLASS": "12", "LASTNAME": "Cramer", "FIRSTNAME": "Cem", "SORT_NAME": "cramer", "LEVEL": "Gym" }
            ]
        }),
    );

    let frozen = request_ok(&mut stdin, &mut reader, "3", "grades.table", table_params());
    assert_eq!(frozen["frozen"], true);
    let pids: Vec<&str> = frozen["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["pupil"]["PID"].as_str())
        .collect();
    assert_eq!(pids, vec!["A", "B"]);
    assert!(has_message(&frozen, "roster_changed"), "{}", frozen);
    assert_eq!(row(&frozen, "B")["grades"]["En"], "10");

    // Back to a live table: B's stored row goes, C appears.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.updateInfo",
        with_table(json!({ "field": "DATE_GRADES", "value": "2999-12-31" })),
    );
    let live = request_ok(&mut stdin, &mut reader, "5", "grades.table", table_params());
    assert_eq!(live["frozen"], false);
    let pids: Vec<&str> = live["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["pupil"]["PID"].as_str())
        .collect();
    assert_eq!(pids, vec!["A", "C"]);
    assert!(has_message(&live, "pupil_removed"), "{}", live);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
