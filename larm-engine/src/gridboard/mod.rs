//! ## larm-engine::gridboard
//! **Multi-dimensional live status boards**
//!
//! A [`Gridboard`] files every matching alert snapshot into a tree keyed by
//! one capture value per dimension. Leaves hold the derived [`CellStatus`]
//! and the time of the last update. Boards with one or two dimensions render
//! to a table; `ok` cells older than the warning delay render as stale.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use larm_config::GridboardConfig;
use larm_core::pattern::{PatternCaptures, PatternError, PatternMatcher};
use larm_core::time::millis;

use crate::alert::{Alert, AlertStatus};

pub mod aggregator;

pub use aggregator::{GridboardAggregator, GridboardControl};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridboardError {
    #[error("Gridboard '{id}' has {count} dimensions, at most 2 can be rendered")]
    TooManyDimensions { id: String, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Ok,
    Error,
    Unknown,
}

impl CellStatus {
    pub fn from_alert(status: AlertStatus) -> Self {
        match status {
            AlertStatus::Raised | AlertStatus::Rising => CellStatus::Error,
            AlertStatus::Canceled | AlertStatus::MayRise | AlertStatus::Dropping => CellStatus::Ok,
            AlertStatus::Nonexistent => CellStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CellStatus::Ok => "ok",
            CellStatus::Error => "error",
            CellStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridCell {
    pub status: CellStatus,
    pub timestamp: DateTime<Utc>,
}

impl GridCell {
    /// Rendered status, `ok (long)` once an `ok` cell outlived `warning_delay`.
    pub fn label(&self, now: DateTime<Utc>, warning_delay: Duration) -> String {
        if self.status == CellStatus::Ok && now - self.timestamp > warning_delay {
            "ok (long)".to_owned()
        } else {
            self.status.as_str().to_owned()
        }
    }
}

/// One level of a gridboard. Leaves carry a cell, inner nodes children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GridTree {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, GridTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell: Option<GridCell>,
}

impl GridTree {
    fn set(&mut self, path: &[String], cell: GridCell) {
        let mut node = self;
        for key in path {
            node = node.children.entry(key.clone()).or_default();
        }
        node.cell = Some(cell);
    }

    pub fn get(&self, path: &[&str]) -> Option<&GridCell> {
        let mut node = self;
        for key in path {
            node = node.children.get(*key)?;
        }
        node.cell.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.cell.is_none()
    }
}

#[derive(Debug)]
pub struct Gridboard {
    config: GridboardConfig,
    matcher: PatternMatcher,
    warning_delay: Duration,
    tree: GridTree,
}

impl Gridboard {
    pub fn compile(config: &GridboardConfig) -> Result<Self, PatternError> {
        Ok(Self {
            matcher: PatternMatcher::compile(&config.pattern)?,
            warning_delay: millis(config.warning_delay_ms),
            config: config.clone(),
            tree: GridTree::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &GridboardConfig {
        &self.config
    }

    pub fn same_definition(&self, config: &GridboardConfig) -> bool {
        self.config == *config
    }

    /// Moves the collected cells of `previous` into this board.
    pub fn adopt(&mut self, previous: Gridboard) {
        self.tree = previous.tree;
    }

    pub fn tree(&self) -> &GridTree {
        &self.tree
    }

    fn dimension_values(&self, captures: &PatternCaptures<'_>) -> Option<Vec<String>> {
        self.config
            .dimensions
            .iter()
            .enumerate()
            .map(|(index, dimension)| {
                let value = match &dimension.group {
                    Some(group) => match group.parse::<usize>() {
                        Ok(position) => captures.get(position),
                        Err(_) => captures.name(group),
                    },
                    None => captures
                        .name(&dimension.name)
                        .or_else(|| captures.get(index + 1)),
                };
                value.map(str::to_owned)
            })
            .collect()
    }

    /// Files `alert` into the board. Returns `false` when the id does not
    /// match or a dimension has no value.
    pub fn update(&mut self, alert: &Alert, at: DateTime<Utc>) -> bool {
        let Some(captures) = self.matcher.captures(&alert.id) else {
            return false;
        };
        let Some(path) = self.dimension_values(&captures) else {
            return false;
        };
        self.tree.set(
            &path,
            GridCell {
                status: CellStatus::from_alert(alert.status),
                timestamp: at,
            },
        );
        true
    }

    pub fn clear(&mut self) {
        self.tree = GridTree::default();
    }

    pub fn table(&self, now: DateTime<Utc>) -> Result<GridTable, GridboardError> {
        let names: Vec<String> = self.config.dimensions.iter().map(|d| d.name.clone()).collect();
        let label = |cell: Option<&GridCell>| {
            cell.map(|c| c.label(now, self.warning_delay))
                .unwrap_or_default()
        };
        match names.as_slice() {
            [dimension] => Ok(GridTable {
                headers: vec![dimension.clone(), "status".to_owned(), "since".to_owned()],
                rows: self
                    .tree
                    .children
                    .iter()
                    .map(|(key, node)| {
                        vec![
                            key.clone(),
                            label(node.cell.as_ref()),
                            node.cell
                                .map(|c| c.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
                                .unwrap_or_default(),
                        ]
                    })
                    .collect(),
            }),
            [rows, _] => {
                let columns: BTreeSet<&String> = self
                    .tree
                    .children
                    .values()
                    .flat_map(|node| node.children.keys())
                    .collect();
                let mut headers = vec![rows.clone()];
                headers.extend(columns.iter().map(|c| (*c).clone()));
                Ok(GridTable {
                    headers,
                    rows: self
                        .tree
                        .children
                        .iter()
                        .map(|(key, node)| {
                            let mut row = vec![key.clone()];
                            row.extend(columns.iter().map(|column| {
                                label(node.children.get(*column).and_then(|n| n.cell.as_ref()))
                            }));
                            row
                        })
                        .collect(),
                })
            }
            _ => Err(GridboardError::TooManyDimensions {
                id: self.config.id.clone(),
                count: names.len(),
            }),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> GridboardSnapshot {
        GridboardSnapshot {
            id: self.config.id.clone(),
            label: self.config.label.clone(),
            dimensions: self.config.dimensions.iter().map(|d| d.name.clone()).collect(),
            tree: self.tree.clone(),
            table: self.table(now).ok(),
            taken_at: now,
        }
    }
}

/// Rendered rows of a one or two dimensional board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl GridTable {
    pub fn to_text(&self) -> String {
        let mut table = comfy_table::Table::new();
        table
            .load_preset(comfy_table::presets::UTF8_FULL)
            .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
        table.set_header(self.headers.clone());
        for row in &self.rows {
            table.add_row(row.clone());
        }
        table.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GridboardSnapshot {
    pub id: String,
    pub label: Option<String>,
    pub dimensions: Vec<String>,
    pub tree: GridTree,
    pub table: Option<GridTable>,
    pub taken_at: DateTime<Utc>,
}

impl GridboardSnapshot {
    pub fn to_text(&self) -> Result<String, GridboardError> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| GridboardError::TooManyDimensions {
                id: self.id.clone(),
                count: self.dimensions.len(),
            })?;
        let title = self.label.as_deref().unwrap_or(&self.id);
        Ok(format!("{title}\n{}", table.to_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn alert(id: &str, status: AlertStatus) -> Alert {
        let mut alert = Alert::new(id);
        alert.status = status;
        alert
    }

    #[test]
    fn failure_then_cancellation() {
        let config = GridboardConfig::new("failures", "task.failure.*").with_dimension("task");
        let mut board = Gridboard::compile(&config).unwrap();

        assert!(board.update(&alert("task.failure.foo", AlertStatus::Raised), at(0)));
        assert_eq!(board.tree().get(&["foo"]).unwrap().status, CellStatus::Error);

        assert!(board.update(&alert("task.failure.foo", AlertStatus::Canceled), at(10)));
        let cell = board.tree().get(&["foo"]).unwrap();
        assert_eq!(cell.status, CellStatus::Ok);
        assert_eq!(cell.timestamp, at(10));

        assert!(!board.update(&alert("task.start.foo", AlertStatus::Raised), at(20)));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(CellStatus::from_alert(AlertStatus::Rising), CellStatus::Error);
        assert_eq!(CellStatus::from_alert(AlertStatus::MayRise), CellStatus::Ok);
        assert_eq!(CellStatus::from_alert(AlertStatus::Dropping), CellStatus::Ok);
        assert_eq!(CellStatus::from_alert(AlertStatus::Nonexistent), CellStatus::Unknown);
    }

    #[test]
    fn two_dimensions_with_named_groups() {
        let config = GridboardConfig::new(
            "resources",
            r"^resource\.(?P<kind>[^.]+)\.(?P<host>[^.]+)$",
        )
        .with_dimension("host")
        .with_dimension("kind");
        let mut board = Gridboard::compile(&config).unwrap();
        board.update(&alert("resource.disk.alpha", AlertStatus::Raised), at(0));
        board.update(&alert("resource.memory.beta", AlertStatus::Canceled), at(0));

        let table = board.table(at(1_000)).unwrap();
        assert_eq!(table.headers, vec!["host", "disk", "memory"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["alpha".to_owned(), "error".to_owned(), String::new()],
                vec!["beta".to_owned(), String::new(), "ok".to_owned()],
            ]
        );
        let text = board.snapshot(at(1_000)).to_text().unwrap();
        assert!(text.starts_with("resources\n"));
        assert!(text.contains("alpha"));
    }

    #[test]
    fn old_ok_cells_are_stale() {
        let mut config = GridboardConfig::new("failures", "task.failure.*").with_dimension("task");
        config.warning_delay_ms = 1_000;
        let mut board = Gridboard::compile(&config).unwrap();
        board.update(&alert("task.failure.a", AlertStatus::Canceled), at(0));
        board.update(&alert("task.failure.b", AlertStatus::Raised), at(0));

        let rows = board.table(at(5_000)).unwrap().rows;
        assert_eq!(rows[0][1], "ok (long)");
        assert_eq!(rows[1][1], "error");
        assert_eq!(board.table(at(500)).unwrap().rows[0][1], "ok");
    }

    #[test]
    fn three_dimensions_do_not_render() {
        let config = GridboardConfig::new("deep", "a.*.*.*")
            .with_dimension("x")
            .with_dimension("y")
            .with_dimension("z");
        let mut board = Gridboard::compile(&config).unwrap();
        assert!(board.update(&alert("a.1.2.3", AlertStatus::Raised), at(0)));
        assert!(board.tree().get(&["1", "2", "3"]).is_some());
        assert!(matches!(
            board.table(at(0)),
            Err(GridboardError::TooManyDimensions { count: 3, .. })
        ));
        assert!(board.snapshot(at(0)).to_text().is_err());
    }

    #[test]
    fn clear_forgets_cells() {
        let config = GridboardConfig::new("failures", "task.failure.*").with_dimension("task");
        let mut board = Gridboard::compile(&config).unwrap();
        board.update(&alert("task.failure.a", AlertStatus::Raised), at(0));
        board.clear();
        assert!(board.tree().is_empty());
    }
}
