//! Declarative grading configuration and its per-(occasion, group)
//! resolution into the column catalogue of a grade table.

use crate::cells::{Cell, CellKind, ChoiceValue, Component, ComponentSpec, Components};
use crate::enrolment::{split_class_group, SubjectInfo};
use crate::env::Messages;
use crate::error::{GradeError, Result};
use crate::functions::{self, Computation};
use crate::grades::{GradeScaleRow, GradeSet};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

pub const CONFIG_FILE: &str = "grades_config.json";

fn default_decimal_separator() -> String {
    ",".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GradeConfig {
    #[serde(default)]
    pub schoolyear: String,
    #[serde(default = "default_decimal_separator")]
    pub decimal_separator: String,
    /// Ordered `[name, {class_group: settings}]`.
    #[serde(default)]
    pub occasions: Vec<(String, BTreeMap<String, OccasionGroup>)>,
    #[serde(default)]
    pub grade_scales: BTreeMap<String, Vec<GradeScaleRow>>,
    /// Defaults, overlaid by the occasion-group's own symbols.
    #[serde(default)]
    pub symbols: BTreeMap<String, String>,
    #[serde(default)]
    pub composites: BTreeMap<String, CompositeDef>,
    #[serde(default)]
    pub calculates: BTreeMap<String, CalculateDef>,
    /// `class -> {"*" | group tag -> fields}`.
    #[serde(default)]
    pub grade_fields_extra: BTreeMap<String, BTreeMap<String, Vec<ExtraField>>>,
    /// Field name -> column label of the entry sheet.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Info field name -> label of the entry sheet's header section.
    #[serde(default)]
    pub info_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OccasionGroup {
    pub grades: String,
    #[serde(default)]
    pub grade_entry: String,
    #[serde(default)]
    pub symbols: BTreeMap<String, String>,
}

/// `(name, sort_key, components)`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeDef(pub String, pub String, pub Vec<ComponentSpec>);

/// `(name, components)`; components are a list or `"*"`.
#[derive(Debug, Clone, Deserialize)]
pub struct CalculateDef(pub String, pub CalculateComponents);

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CalculateComponents {
    Star(String),
    List(Vec<ComponentSpec>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtraType {
    Composite,
    Calculate,
    Choice,
    ChoiceMap,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExtraField {
    pub sid: String,
    #[serde(rename = "TYPE")]
    pub kind: ExtraType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub values: Vec<ChoiceValue>,
    #[serde(default)]
    pub group: String,
}

/// Load `grades_config.json` from the workspace. A missing file is an
/// empty configuration.
pub fn load_config(workspace: &Path) -> anyhow::Result<GradeConfig> {
    let path = workspace.join(CONFIG_FILE);
    if !path.is_file() {
        tracing::info!(path = %path.display(), "no grade configuration, using empty one");
        return Ok(GradeConfig {
            decimal_separator: default_decimal_separator(),
            ..GradeConfig::default()
        });
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let config: GradeConfig = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid grade configuration", path.to_string_lossy()))?;
    config.validate()?;
    Ok(config)
}

impl GradeConfig {
    /// Load-time checks: every grade scale exists, every function name is
    /// registered, calculated components are well formed and no subject
    /// feeds two composites.
    pub fn validate(&self) -> Result<()> {
        for (occasion, groups) in &self.occasions {
            for (group, og) in groups {
                if !self.grade_scales.contains_key(&og.grades) {
                    return Err(GradeError::NotFound(format!(
                        "grade scale {} ({} / {})",
                        og.grades, occasion, group
                    )));
                }
            }
        }

        for groups in self.grade_fields_extra.values() {
            for fields in groups.values() {
                for f in fields {
                    if let Some(name) = &f.function {
                        resolve_function(&f.sid, name)?;
                    }
                }
            }
        }

        for (sid, CalculateDef(_, comps)) in &self.calculates {
            if let CalculateComponents::Star(s) = comps {
                if s != "*" {
                    return Err(GradeError::BadCalculateSid { sid: sid.clone() });
                }
            }
        }

        let all: Vec<(&String, &CompositeDef)> = self.composites.iter().collect();
        check_component_uniqueness(&all)?;
        Ok(())
    }

    pub fn occasion_group(&self, occasion: &str, class_group: &str) -> Result<&OccasionGroup> {
        let (_, groups) = self
            .occasions
            .iter()
            .find(|(name, _)| name == occasion)
            .ok_or_else(|| GradeError::UnknownOccasion {
                occasion: occasion.to_string(),
            })?;
        groups
            .get(class_group)
            .ok_or_else(|| GradeError::InvalidOccasionGroup {
                occasion: occasion.to_string(),
                class_group: class_group.to_string(),
            })
    }

    /// Extra fields of a class-group: the group's own list if it has one,
    /// else the class-wide `"*"` list.
    pub fn extra_fields(&self, class_group: &str) -> &[ExtraField] {
        let (class, tag) = split_class_group(class_group);
        let Some(groups) = self.grade_fields_extra.get(class) else {
            return &[];
        };
        tag.and_then(|t| groups.get(t))
            .or_else(|| groups.get("*"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Label -> field name, the inverse of `HEADERS` and `INFO_FIELDS`.
    pub fn label_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (field, label) in self.headers.iter().chain(self.info_fields.iter()) {
            map.insert(label.clone(), field.clone());
        }
        map
    }

    pub fn header_label<'a>(&'a self, field: &'a str) -> &'a str {
        self.headers.get(field).map(String::as_str).unwrap_or(field)
    }

    pub fn info_label<'a>(&'a self, field: &'a str) -> &'a str {
        self.info_fields.get(field).map(String::as_str).unwrap_or(field)
    }
}

fn resolve_function(sid: &str, name: &str) -> Result<Computation> {
    functions::lookup(name).ok_or_else(|| GradeError::UnknownFunction {
        sid: sid.to_string(),
        name: name.to_string(),
    })
}

fn check_component_uniqueness(composites: &[(&String, &CompositeDef)]) -> Result<()> {
    let mut owner: HashMap<&str, &str> = HashMap::new();
    for (sid, CompositeDef(_, _, comps)) in composites {
        for spec in comps {
            let csid = spec_sid(spec);
            if let Some(first) = owner.insert(csid, sid.as_str()) {
                if first != sid.as_str() {
                    return Err(GradeError::ComponentNotUnique {
                        sid: csid.to_string(),
                        first: first.to_string(),
                        second: sid.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Column catalogue and settings of one (occasion, class-group).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ResolvedConfig {
    pub occasion: String,
    pub class_group: String,
    pub subjects: Vec<Cell>,
    pub components: Vec<Cell>,
    pub composites: Vec<Cell>,
    pub extras: Vec<Cell>,
    pub symbols: BTreeMap<String, String>,
    pub grades: GradeSet,
    pub grade_entry: String,
    pub decimal_separator: String,
}

impl ResolvedConfig {
    /// `SUBJECTS ++ COMPONENTS ++ COMPOSITES ++ EXTRAS`.
    pub fn columns(&self) -> impl Iterator<Item = &Cell> {
        self.subjects
            .iter()
            .chain(self.components.iter())
            .chain(self.composites.iter())
            .chain(self.extras.iter())
    }

    pub fn all_sids(&self) -> Vec<String> {
        self.columns().map(|c| c.sid.clone()).collect()
    }

    pub fn cell(&self, sid: &str) -> Option<&Cell> {
        self.columns().find(|c| c.sid == sid)
    }
}

/// Resolve the configuration for `(occasion, class_group)`.
///
/// `present` are the subjects taught to the group; `catalogue` supplies
/// their names and sort keys.
pub fn resolve(
    config: &GradeConfig,
    catalogue: &[SubjectInfo],
    present: &BTreeSet<String>,
    occasion: &str,
    class_group: &str,
    messages: &mut Messages,
) -> Result<ResolvedConfig> {
    let og = config.occasion_group(occasion, class_group)?;
    let (class, _) = split_class_group(class_group);
    let subject_sids: HashSet<&str> = catalogue.iter().map(|s| s.sid.as_str()).collect();
    let extras = config.extra_fields(class_group);

    // Composites named for this group.
    let mut composite_defs: Vec<(&String, &CompositeDef, Option<Computation>, &ExtraField)> =
        Vec::new();
    for f in extras.iter().filter(|f| f.kind == ExtraType::Composite) {
        let Some((sid, def)) = config.composites.get_key_value(&f.sid) else {
            return Err(GradeError::UnknownComposite {
                class: class.to_string(),
                sid: f.sid.clone(),
            });
        };
        if subject_sids.contains(sid.as_str()) {
            return Err(GradeError::BadCompositeSid { sid: sid.clone() });
        }
        let function = f
            .function
            .as_deref()
            .map(|name| resolve_function(sid, name))
            .transpose()?;
        composite_defs.push((sid, def, function, f));
    }
    let pairs: Vec<(&String, &CompositeDef)> =
        composite_defs.iter().map(|(s, d, _, _)| (*s, *d)).collect();
    check_component_uniqueness(&pairs)?;

    let mut component_of: HashMap<&str, &str> = HashMap::new();
    for (sid, CompositeDef(_, _, comps), _, _) in &composite_defs {
        for spec in comps {
            let csid = spec_sid(spec);
            if present.contains(csid) {
                component_of.insert(csid, sid.as_str());
            }
        }
    }

    // Subjects in catalogue order, stable-sorted by sort key.
    let mut taught: Vec<&SubjectInfo> = catalogue
        .iter()
        .filter(|s| present.contains(&s.sid))
        .collect();
    taught.sort_by(|a, b| a.sorting.cmp(&b.sorting));
    for sid in present {
        if !subject_sids.contains(sid.as_str()) {
            messages.warning(
                "unknown_subject",
                format!("subject {} is taught in {} but not in the catalogue", sid, class_group),
            );
        }
    }

    let mut subjects = Vec::new();
    let mut components = Vec::new();
    for s in taught {
        let composite = component_of.get(s.sid.as_str()).map(|c| c.to_string());
        let cell = Cell {
            sid: s.sid.clone(),
            name: s.name.clone(),
            group: s.group.clone(),
            sorting: s.sorting.clone(),
            composite: composite.clone(),
            kind: CellKind::Subject,
        };
        if composite.is_some() {
            components.push(cell);
        } else {
            subjects.push(cell);
        }
    }

    let mut composites = Vec::new();
    for (sid, CompositeDef(name, sort_key, comps), function, f) in &composite_defs {
        let resolved: Vec<Component> = comps
            .iter()
            .map(Component::from)
            .filter(|c| present.contains(&c.sid))
            .collect();
        if resolved.is_empty() {
            messages.warning(
                "composite_without_components",
                format!("composite {} has no components in {}", sid, class_group),
            );
        }
        composites.push(Cell {
            sid: sid.to_string(),
            name: f.name.clone().unwrap_or_else(|| name.clone()),
            group: if f.group.is_empty() {
                sort_key.clone()
            } else {
                f.group.clone()
            },
            sorting: sort_key.clone(),
            composite: None,
            kind: CellKind::Composite {
                function: *function,
                components: resolved,
            },
        });
    }
    composites.sort_by(|a, b| a.sorting.cmp(&b.sorting));

    let composite_sids: HashSet<&str> = composite_defs.iter().map(|(s, ..)| s.as_str()).collect();
    let mut extra_cells = Vec::new();
    for f in extras {
        let kind = match f.kind {
            ExtraType::Composite => continue,
            ExtraType::Calculate => {
                let Some(CalculateDef(name, comps)) = config.calculates.get(&f.sid) else {
                    return Err(GradeError::UnknownCalculate {
                        class: class.to_string(),
                        sid: f.sid.clone(),
                    });
                };
                if subject_sids.contains(f.sid.as_str()) || composite_sids.contains(f.sid.as_str())
                {
                    return Err(GradeError::BadCalculateSid { sid: f.sid.clone() });
                }
                let function = f
                    .function
                    .as_deref()
                    .map(|n| resolve_function(&f.sid, n))
                    .transpose()?;
                let components = match comps {
                    CalculateComponents::Star(_) => Components::All,
                    CalculateComponents::List(list) => {
                        Components::List(list.iter().map(Component::from).collect())
                    }
                };
                extra_cells.push(Cell {
                    sid: f.sid.clone(),
                    name: f.name.clone().unwrap_or_else(|| name.clone()),
                    group: f.group.clone(),
                    sorting: String::new(),
                    composite: None,
                    kind: CellKind::Calculated {
                        function,
                        components,
                    },
                });
                continue;
            }
            ExtraType::Choice => CellKind::Choice {
                values: f.values.clone(),
            },
            ExtraType::ChoiceMap => CellKind::ChoiceMap {
                values: f.values.clone(),
            },
            ExtraType::Text => CellKind::Text,
        };
        extra_cells.push(Cell {
            sid: f.sid.clone(),
            name: f.name.clone().unwrap_or_else(|| f.sid.clone()),
            group: f.group.clone(),
            sorting: String::new(),
            composite: None,
            kind,
        });
    }

    let mut symbols = config.symbols.clone();
    symbols.extend(og.symbols.iter().map(|(k, v)| (k.clone(), v.clone())));

    let grades = config
        .grade_scales
        .get(&og.grades)
        .map(|rows| GradeSet::from_scale(rows))
        .ok_or_else(|| GradeError::bug(format!("grade scale {} vanished", og.grades)))?;

    let resolved = ResolvedConfig {
        occasion: occasion.to_string(),
        class_group: class_group.to_string(),
        subjects,
        components,
        composites,
        extras: extra_cells,
        symbols,
        grades,
        grade_entry: og.grade_entry.clone(),
        decimal_separator: config.decimal_separator.clone(),
    };

    let mut seen = HashSet::new();
    for c in resolved.columns() {
        if !seen.insert(c.sid.as_str()) {
            return Err(GradeError::bug(format!(
                "column {} declared twice for {}",
                c.sid, class_group
            )));
        }
    }
    tracing::debug!(
        occasion,
        class_group,
        columns = seen.len(),
        "resolved grade configuration"
    );
    Ok(resolved)
}

fn spec_sid(spec: &ComponentSpec) -> &str {
    match spec {
        ComponentSpec::Plain(s) | ComponentSpec::Weighted(s, _) => s,
    }
}
