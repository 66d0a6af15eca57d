//! Class label table.

use std::path::Path;

use crate::error::PipelineError;

/// Dense mapping from model class index to a human-readable label.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Load labels from a text file, one label per line.
    ///
    /// The label's index is its zero-based line number. Lines are trimmed;
    /// duplicates and empty lines are kept as-is.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| PipelineError::resource(path, e))?;
        let table = Self::parse(&contents);
        log::info!("loaded {} labels from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn parse(contents: &str) -> Self {
        Self {
            labels: contents
                .lines()
                .map(|line| line.trim().to_string())
                .collect(),
        }
    }

    pub fn get(&self, class_id: i64) -> Option<&str> {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.labels.get(idx))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_maps_line_numbers_to_trimmed_labels() {
        let mut file = tempfile::NamedTempFile::new().expect("temp labels");
        file.write_all(b"person\n  car \r\ndog\n").expect("write labels");

        let table = LabelTable::load(file.path()).expect("load labels");
        assert_eq!(table.len(), 3);
        let entries: Vec<_> = (0..3).filter_map(|id| table.get(id)).collect();
        assert_eq!(entries, vec!["person", "car", "dog"]);
    }

    #[test]
    fn empty_and_duplicate_lines_are_kept() {
        let table = LabelTable::parse("a\n\na\n");
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some(""));
        assert_eq!(table.get(2), Some("a"));
    }

    #[test]
    fn out_of_range_ids_have_no_label() {
        let table = LabelTable::parse("person\ncar");
        assert_eq!(table.get(-1), None);
        assert_eq!(table.get(2), None);
    }

    #[test]
    fn missing_file_is_a_resource_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = LabelTable::load(dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::Resource { .. }));
    }
}
