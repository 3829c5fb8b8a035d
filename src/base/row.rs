/// One row of tabular data: an immutable, fixed-length sequence of cells and
/// its zero-based position in the sequence it came from.
///
/// `None` marks a SQL NULL (or any other missing value) and is kept apart
/// from an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    index: usize,
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(index: usize, values: Vec<Option<String>>) -> Self {
        Self { index, values }
    }

    /// A row whose cells are the given column names.
    pub fn header(index: usize, names: &[String]) -> Self {
        Self::new(index, names.iter().cloned().map(Some).collect())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// Cell at `column`. Out of range yields `Some("")`, a null cell yields `None`.
    pub fn value(&self, column: usize) -> Option<&str> {
        match self.values.get(column) {
            Some(cell) => cell.as_deref(),
            None => Some(""),
        }
    }

    pub fn value_or_empty(&self, column: usize) -> &str {
        self.value(column).unwrap_or("")
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }
}
