use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Subject does not apply to this pupil; the cell is locked.
pub const NO_GRADE: &str = "/";
/// Pupil opted out of the subject.
pub const UNCHOSEN: &str = "*";
/// Absent value.
pub const NULL: &str = "";
/// Printed in place of a required grade that was never entered.
pub const MISSING_GRADE: &str = "?";

/// Ordered `sid -> grade` map of one pupil. The key order is the column
/// order of the table it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeMap {
    entries: Vec<(String, String)>,
}

impl GradeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, sid: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == sid)
            .map(|(_, v)| v.as_str())
    }

    pub fn value(&self, sid: &str) -> &str {
        self.get(sid).unwrap_or(NULL)
    }

    /// Set an existing key, or append a new one at the end.
    /// Returns the previous value.
    pub fn set(&mut self, sid: &str, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == sid) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.entries.push((sid.to_string(), value));
                None
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn encode(&self) -> String {
        crate::pairs::encode(self.iter())
    }

    pub fn decode(text: &str) -> Self {
        Self::from_pairs(crate::pairs::decode(text))
    }
}

/// Serialised as a JSON object in column order.
impl Serialize for GradeMap {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// One row of a grade scale table: the accepted literals and the form to
/// print them with (empty means "print the literal").
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GradeScaleRow(pub Vec<String>, pub String);

/// Valid grades of a group, literal -> print form, in scale order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GradeSet {
    entries: Vec<(String, String)>,
}

impl GradeSet {
    pub fn from_scale(rows: &[GradeScaleRow]) -> Self {
        let mut entries = Vec::new();
        for GradeScaleRow(aliases, print) in rows {
            for alias in aliases {
                let print = if print.is_empty() {
                    alias.clone()
                } else {
                    print.clone()
                };
                entries.push((alias.clone(), print));
            }
        }
        Self { entries }
    }

    pub fn is_valid(&self, grade: &str) -> bool {
        grade.is_empty() || grade == NO_GRADE || self.entries.iter().any(|(g, _)| g == grade)
    }

    pub fn print_form(&self, grade: &str) -> String {
        if grade.is_empty() {
            return MISSING_GRADE.to_string();
        }
        self.entries
            .iter()
            .find(|(g, _)| g == grade)
            .map(|(_, p)| p.clone())
            .unwrap_or_else(|| grade.to_string())
    }
}
