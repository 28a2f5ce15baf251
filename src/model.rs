use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SqlType {
    Int,
    Float,
    Text,
    Date,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

/// Catalog entry for one table inside a sandbox namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub namespace: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Declared PRIMARY KEY column, if any. Rows are stored under an
    /// internal rowid, so this is descriptive only.
    #[serde(default)]
    pub primary_key: Option<String>,
}

impl TableDef {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    /// Days since the Unix epoch.
    Date(i64),
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a.to_bits() == b.to_bits(),
            (Cell::Text(a), Cell::Text(b)) => a == b,
            (Cell::Date(a), Cell::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Cell::Null => 0.hash(state),
            Cell::Int(i) => {
                1.hash(state);
                i.hash(state);
            }
            Cell::Float(f) => {
                2.hash(state);
                f.to_be_bytes().hash(state);
            }
            Cell::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            Cell::Date(d) => {
                4.hash(state);
                d.hash(state);
            }
        }
    }
}

impl Cell {
    pub fn add(&self, other: &Cell) -> Option<Cell> {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => Some(Cell::Int(a + b)),
            (Cell::Float(a), Cell::Float(b)) => Some(Cell::Float(a + b)),
            (Cell::Int(a), Cell::Float(b)) => Some(Cell::Float(*a as f64 + b)),
            (Cell::Float(a), Cell::Int(b)) => Some(Cell::Float(a + *b as f64)),
            _ => None,
        }
    }

    pub fn div_count(&self, count: usize) -> Option<Cell> {
        match self {
            Cell::Int(i) => Some(Cell::Float(*i as f64 / count as f64)),
            Cell::Float(f) => Some(Cell::Float(*f / count as f64)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(f) => Some(*f),
            Cell::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// JSON rendering used for previews and grading. Dates format the way
    /// MySQL prints them so both sides of a comparison agree.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Int(i) => serde_json::Value::from(*i),
            Cell::Float(f) => serde_json::Value::from(*f),
            Cell::Text(s) => serde_json::Value::from(s.clone()),
            Cell::Date(_) => serde_json::Value::from(cell_display(self)),
        }
    }
}

pub fn cell_display(c: &Cell) -> String {
    match c {
        Cell::Int(i) => i.to_string(),
        Cell::Float(f) => f.to_string(),
        Cell::Text(s) => s.clone(),
        Cell::Date(days) => {
            use chrono::TimeZone;
            let secs = days.saturating_mul(86_400);
            match chrono::Utc.timestamp_opt(secs, 0).single() {
                Some(dt) => dt.format("%Y-%m-%d").to_string(),
                None => secs.to_string(),
            }
        }
        Cell::Null => "NULL".into(),
    }
}

pub fn compare_cells(a: &Cell, b: &Cell) -> std::cmp::Ordering {
    match (a, b) {
        (Cell::Int(x), Cell::Int(y)) => x.cmp(y),
        (Cell::Float(x), Cell::Float(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        (Cell::Int(_), Cell::Float(_)) | (Cell::Float(_), Cell::Int(_)) => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return std::cmp::Ordering::Equal;
            };
            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
        }
        (Cell::Text(x), Cell::Text(y)) => x.cmp(y),
        (Cell::Date(x), Cell::Date(y)) => x.cmp(y),
        (Cell::Null, Cell::Null) => std::cmp::Ordering::Equal,
        // NULLs sort first, as MySQL does for ascending order.
        (Cell::Null, _) => std::cmp::Ordering::Less,
        (_, Cell::Null) => std::cmp::Ordering::Greater,
        _ => cell_display(a).cmp(&cell_display(b)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Values aligned to TableDef.columns.
    pub values: Vec<Cell>,
}

/// Projected result of a row-returning statement. Column names are kept in
/// output order because key order is grading-significant.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RowSet {
    /// Canonical form: a JSON array of objects, one per row, keys in
    /// projected column order. Doubles as the user-facing result preview.
    pub fn to_json(&self) -> serde_json::Value {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (name, cell) in self.columns.iter().zip(row.iter()) {
                    obj.insert(name.clone(), cell.to_json());
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

/// The two shapes a SQL statement's result can take.
#[derive(Debug, Clone)]
pub enum Outcome {
    Rows(RowSet),
    Affected(u64),
}

impl Outcome {
    pub fn preview(&self) -> String {
        match self {
            Outcome::Rows(rs) => rs.to_json().to_string(),
            Outcome::Affected(n) => format!("{{\"affectedRows\":{n}}}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rowset_json_preserves_column_order() {
        let rs = RowSet {
            columns: vec!["Zeta".into(), "Alpha".into()],
            rows: vec![vec![Cell::Int(1), Cell::Text("x".into())]],
        };
        assert_eq!(rs.to_json().to_string(), r#"[{"Zeta":1,"Alpha":"x"}]"#);
    }

    #[test]
    fn date_cells_render_iso() {
        // 1970-01-02
        assert_eq!(cell_display(&Cell::Date(1)), "1970-01-02");
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(
            compare_cells(&Cell::Null, &Cell::Int(0)),
            std::cmp::Ordering::Less
        );
    }
}
