//! Row evaluation: composites first, then calculated fields, left to right.

use crate::cells::{CellKind, Component, Components};
use crate::config::ResolvedConfig;
use crate::functions::{Computation, Input};
use crate::grades::GradeMap;

/// `(sid, previous value)` for every cell the evaluation changed.
pub type ChangeList = Vec<(String, String)>;

/// Recompute the composite and calculated cells of one pupil's row in
/// place.
pub fn evaluate_row(config: &ResolvedConfig, row: &mut GradeMap) -> ChangeList {
    let mut changes = ChangeList::new();
    let sep = config.decimal_separator.as_str();

    for cell in &config.composites {
        let CellKind::Composite {
            function: Some(function),
            components,
        } = &cell.kind
        else {
            continue;
        };
        store_result(row, &cell.sid, compute(*function, row, components, sep), &mut changes);
    }

    for cell in &config.extras {
        let CellKind::Calculated {
            function: Some(function),
            components,
        } = &cell.kind
        else {
            continue;
        };
        let value = match components {
            Components::List(list) => compute(*function, row, list, sep),
            Components::All => {
                let finals: Vec<Component> = config
                    .subjects
                    .iter()
                    .chain(config.composites.iter())
                    .map(|c| Component {
                        sid: c.sid.clone(),
                        weight: 1,
                    })
                    .collect();
                compute(*function, row, &finals, sep)
            }
        };
        store_result(row, &cell.sid, value, &mut changes);
    }
    changes
}

fn compute(function: Computation, row: &GradeMap, components: &[Component], sep: &str) -> String {
    let inputs: Vec<Input<'_>> = components
        .iter()
        .map(|c| Input::new(row.value(&c.sid), c.weight))
        .collect();
    function.apply(&inputs, sep)
}

fn store_result(row: &mut GradeMap, sid: &str, value: String, changes: &mut ChangeList) {
    if row.get(sid) == Some(value.as_str()) {
        return;
    }
    let previous = row.set(sid, value).unwrap_or_default();
    changes.push((sid.to_string(), previous));
}
