// Raw wide-column cells and per-key change records as produced by the store client.
use bytes::Bytes;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub enum CellKind {
    Put,
    Delete,
    DeleteColumn,
    DeleteFamily,
    DeleteFamilyVersion,
}

impl CellKind {
    pub fn is_delete(self) -> bool {
        !matches!(self, CellKind::Put)
    }

    pub fn is_family_delete(self) -> bool {
        matches!(self, CellKind::DeleteFamily | CellKind::DeleteFamilyVersion)
    }

    // Deletes sort after puts at the same timestamp so that they win ties.
    fn rank(self) -> u8 {
        match self {
            CellKind::Put => 0,
            CellKind::Delete => 1,
            CellKind::DeleteColumn => 2,
            CellKind::DeleteFamilyVersion => 3,
            CellKind::DeleteFamily => 4,
        }
    }
}

/// (family, qualifier) address of one column within a row.
pub type ColumnKey = (String, Vec<u8>);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cell {
    family: String,
    qualifier: Bytes,
    value: Option<Bytes>,
    timestamp: u64,
    kind: CellKind,
}

impl Cell {
    pub fn put(
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
        timestamp: u64,
    ) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
            value: Some(value.into()),
            timestamp,
            kind: CellKind::Put,
        }
    }

    /// Builds a delete marker. Family-scoped kinds always carry an empty qualifier.
    pub fn tombstone(
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp: u64,
        kind: CellKind,
    ) -> Self {
        let qualifier = if kind.is_family_delete() {
            Bytes::new()
        } else {
            qualifier.into()
        };
        Self {
            family: family.into(),
            qualifier,
            value: None,
            timestamp,
            kind,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn qualifier(&self) -> &[u8] {
        &self.qualifier
    }

    pub fn column_key(&self) -> ColumnKey {
        (self.family.clone(), self.qualifier.to_vec())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn is_put(&self) -> bool {
        self.kind == CellKind::Put
    }

    /// Total order used whenever two versions of one column compete.
    pub fn precedence(&self) -> (u64, u8, Option<&[u8]>) {
        (self.timestamp, self.kind.rank(), self.value.as_deref())
    }

    pub fn supersedes(&self, other: &Cell) -> bool {
        self.precedence() > other.precedence()
    }
}

/// All cells read for one row key: raw versions and tombstones on the incremental
/// path, latest values only on the simple path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeRow {
    pub row_key: Bytes,
    pub cells: Vec<Cell>,
}

impl ChangeRow {
    pub fn new(row_key: impl Into<Bytes>, cells: Vec<Cell>) -> Self {
        Self {
            row_key: row_key.into(),
            cells,
        }
    }

    /// Latest cell with an empty qualifier in `family`, the slot family tombstones live in.
    pub fn latest_family_marker(&self, family: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .filter(|cell| cell.family() == family && cell.qualifier().is_empty())
            .fold(None, |best: Option<&Cell>, cell| match best {
                Some(current) if !cell.supersedes(current) => Some(current),
                _ => Some(cell),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{Cell, CellKind, ChangeRow};

    #[test]
    fn family_tombstone_drops_qualifier() {
        let cell = Cell::tombstone("D", "SR1", 10, CellKind::DeleteFamily);
        assert!(cell.qualifier().is_empty());
        assert!(cell.kind().is_family_delete());
        assert_eq!(cell.value(), None);
    }

    #[test]
    fn delete_wins_tie_against_put() {
        let put = Cell::put("D", "SR1", "Y", 10);
        let delete = Cell::tombstone("D", "SR1", 10, CellKind::DeleteColumn);
        assert!(delete.supersedes(&put));
        assert!(!put.supersedes(&delete));
    }

    #[test]
    fn latest_family_marker_ignores_other_families_and_qualified_cells() {
        let row = ChangeRow::new(
            "k",
            vec![
                Cell::tombstone("D", "", 100, CellKind::DeleteFamily),
                Cell::tombstone("D", "", 300, CellKind::DeleteFamilyVersion),
                Cell::tombstone("E", "", 900, CellKind::DeleteFamily),
                Cell::put("D", "SR1", "Y", 500),
            ],
        );
        let marker = row.latest_family_marker("D").expect("marker");
        assert_eq!(marker.timestamp(), 300);
        assert_eq!(marker.kind(), CellKind::DeleteFamilyVersion);
        assert!(row.latest_family_marker("F").is_none());
    }
}
