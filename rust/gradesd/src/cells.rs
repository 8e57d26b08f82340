use crate::functions::Computation;
use serde::{Deserialize, Serialize, Serializer};

/// A component reference, optionally weighted: `"De1"` or `["De1", 2]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ComponentSpec {
    Plain(String),
    Weighted(String, u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub sid: String,
    pub weight: u32,
}

impl From<&ComponentSpec> for Component {
    fn from(spec: &ComponentSpec) -> Self {
        match spec {
            ComponentSpec::Plain(sid) => Component {
                sid: sid.clone(),
                weight: 1,
            },
            ComponentSpec::Weighted(sid, weight) => Component {
                sid: sid.clone(),
                weight: *weight,
            },
        }
    }
}

/// Inputs of a calculated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Components {
    /// `"*"`: the final subject grades of the table, expanded when evaluating.
    All,
    List(Vec<Component>),
}

impl Serialize for Components {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Components::All => s.serialize_str("*"),
            Components::List(list) => list.serialize(s),
        }
    }
}

/// Entry of a `VALUES` list: a literal, or `[literal, display]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChoiceValue {
    Plain(String),
    Pair(String, String),
}

impl ChoiceValue {
    pub fn literal(&self) -> &str {
        match self {
            ChoiceValue::Plain(v) => v,
            ChoiceValue::Pair(v, _) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "TYPE", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellKind {
    Subject,
    Composite {
        #[serde(rename = "FUNCTION", serialize_with = "ser_function")]
        function: Option<Computation>,
        #[serde(rename = "COMPONENTS")]
        components: Vec<Component>,
    },
    #[serde(rename = "CALCULATE")]
    Calculated {
        #[serde(rename = "FUNCTION", serialize_with = "ser_function")]
        function: Option<Computation>,
        #[serde(rename = "COMPONENTS")]
        components: Components,
    },
    Choice {
        #[serde(rename = "VALUES")]
        values: Vec<ChoiceValue>,
    },
    ChoiceMap {
        #[serde(rename = "VALUES")]
        values: Vec<ChoiceValue>,
    },
    Text,
}

/// Column descriptor of a grade table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Cell {
    pub sid: String,
    pub name: String,
    /// Report bucket.
    pub group: String,
    #[serde(skip)]
    pub sorting: String,
    /// Set on subjects that feed a composite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<String>,
    #[serde(flatten)]
    pub kind: CellKind,
}

impl Cell {
    pub fn is_subject(&self) -> bool {
        matches!(self.kind, CellKind::Subject)
    }

    /// Value of a fresh cell: the first declared choice, otherwise empty.
    pub fn default_value(&self) -> &str {
        match &self.kind {
            CellKind::Choice { values } | CellKind::ChoiceMap { values } => {
                values.first().map(ChoiceValue::literal).unwrap_or("")
            }
            _ => "",
        }
    }

    /// Cells whose value comes from evaluation, never from input.
    pub fn is_computed(&self) -> bool {
        match &self.kind {
            CellKind::Composite { function, .. } | CellKind::Calculated { function, .. } => {
                function.is_some()
            }
            _ => false,
        }
    }
}

fn ser_function<S: Serializer>(f: &Option<Computation>, s: S) -> Result<S::Ok, S::Error> {
    match f {
        Some(c) => s.serialize_some(c.name),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn component_specs_accept_both_forms() {
        let specs: Vec<ComponentSpec> =
            serde_json::from_value(json!(["De1", ["De2", 2]])).expect("parse");
        let comps: Vec<Component> = specs.iter().map(Component::from).collect();
        assert_eq!(comps[0], Component { sid: "De1".into(), weight: 1 });
        assert_eq!(comps[1], Component { sid: "De2".into(), weight: 2 });
    }

    #[test]
    fn choice_default_is_first_literal() {
        let cell = Cell {
            sid: "Q".into(),
            name: "Qualifikation".into(),
            group: String::new(),
            sorting: String::new(),
            composite: None,
            kind: CellKind::ChoiceMap {
                values: vec![
                    ChoiceValue::Pair("Erw".into(), "Erweiterter Abschluss".into()),
                    ChoiceValue::Plain("RS".into()),
                ],
            },
        };
        assert_eq!(cell.default_value(), "Erw");
        let v = serde_json::to_value(&cell).expect("serialize");
        assert_eq!(v["TYPE"], "CHOICE_MAP");
        assert_eq!(v["SID"], "Q");
    }
}
