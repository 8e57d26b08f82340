//! Sheet reader/writer used for grade-entry files.

use crate::error::{GradeError, Result};
use std::path::Path;

/// One sheet as rows of cells.
pub type Sheet = Vec<Vec<String>>;

pub trait TableCodec {
    fn read_table(&self, path: &Path) -> Result<Sheet>;
    fn write_table(&self, path: &Path, rows: &[Vec<String>]) -> Result<()>;
}

/// Tab-separated text, one sheet per file. Tabs and line breaks inside a
/// cell are written as spaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct TsvCodec;

impl TableCodec for TsvCodec {
    fn read_table(&self, path: &Path) -> Result<Sheet> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|_| GradeError::BadFile {
            path: path.to_path_buf(),
            reason: "not UTF-8 text".to_string(),
        })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        Ok(text
            .lines()
            .map(|line| line.split('\t').map(|c| c.trim().to_string()).collect())
            .collect())
    }

    fn write_table(&self, path: &Path, rows: &[Vec<String>]) -> Result<()> {
        let mut out = String::new();
        for row in rows {
            let cells: Vec<String> = row
                .iter()
                .map(|c| c.replace(['\t', '\r', '\n'], " "))
                .collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_what_it_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sheet.tsv");
        let rows = vec![
            vec!["PID".to_string(), "En".to_string()],
            vec!["p1".to_string(), "line\tbreak\n".to_string()],
        ];
        TsvCodec.write_table(&path, &rows).expect("write");
        let back = TsvCodec.read_table(&path).expect("read");
        assert_eq!(back[0], rows[0]);
        assert_eq!(back[1], vec!["p1".to_string(), "line break".to_string()]);
    }

    #[test]
    fn crlf_and_bom_are_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sheet.tsv");
        std::fs::write(&path, "\u{feff}A\tB\r\n1\t2\r\n").expect("write");
        let rows = TsvCodec.read_table(&path).expect("read");
        assert_eq!(rows, vec![vec!["A", "B"], vec!["1", "2"]]);
    }

    #[test]
    fn binary_input_is_a_bad_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sheet.tsv");
        std::fs::write(&path, [0xff_u8, 0xfe, 0x00]).expect("write");
        assert!(matches!(
            TsvCodec.read_table(&path),
            Err(GradeError::BadFile { .. })
        ));
    }
}
