//! Completion candidates laid out as a row-major grid with a wrapping cursor.

use serde::Serialize;

/// Horizontal padding added to every column by [`layout_monospace`].
pub const COLUMN_PADDING: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionGrid {
    items: Vec<String>,
    columns: usize,
    selected: usize,
}

/// Serializable picture of a grid for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridView {
    pub rows: Vec<Vec<String>>,
    pub selected_row: usize,
    pub selected_col: usize,
}

/// Width of the grid when `items` are laid out in `columns` columns.
pub fn grid_width(items: &[String], columns: usize, measure: &impl Fn(&str) -> usize) -> usize {
    let columns = columns.max(1);
    (0..columns)
        .map(|col| {
            items
                .iter()
                .skip(col)
                .step_by(columns)
                .map(|item| measure(item))
                .max()
                .unwrap_or(0)
        })
        .sum()
}

/// Find the column count for `items` within `max_width`.
///
/// Starts from a single column and widens while the grid still fits and
/// more than one row remains; the first count that overflows is backed off
/// by one. Never returns less than one.
pub fn layout(items: &[String], max_width: usize, measure: impl Fn(&str) -> usize) -> usize {
    if items.is_empty() {
        return 1;
    }
    let mut columns = 1;
    loop {
        if grid_width(items, columns, &measure) > max_width {
            return (columns - 1).max(1);
        }
        if items.len().div_ceil(columns) <= 1 {
            return columns;
        }
        columns += 1;
    }
}

/// [`layout`] for a terminal: one unit per char plus column padding.
pub fn layout_monospace(items: &[String], max_width: usize) -> usize {
    layout(items, max_width, |item| item.chars().count() + COLUMN_PADDING)
}

impl CompletionGrid {
    pub fn new(items: Vec<String>, columns: usize) -> Self {
        Self {
            items,
            columns: columns.max(1),
            selected: 0,
        }
    }

    pub fn with_width(items: Vec<String>, max_width: usize) -> Self {
        let columns = layout_monospace(&items, max_width);
        Self::new(items, columns)
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn row_count(&self) -> usize {
        self.items.len().div_ceil(self.columns)
    }

    /// `(row, col)` of the selection.
    pub fn selection(&self) -> (usize, usize) {
        (self.selected / self.columns, self.selected % self.columns)
    }

    pub fn selected(&self) -> Option<&str> {
        self.items.get(self.selected).map(String::as_str)
    }

    pub fn select(&mut self, row: usize, col: usize) -> bool {
        let index = row * self.columns + col;
        if col < self.columns && index < self.items.len() {
            self.selected = index;
            true
        } else {
            false
        }
    }

    pub fn move_left(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.selected = match self.selected {
            0 => self.items.len() - 1,
            i => i - 1,
        };
    }

    pub fn move_right(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.selected = (self.selected + 1) % self.items.len();
    }

    pub fn move_up(&mut self) {
        self.step_vertically(|row, rows| (row + rows - 1) % rows);
    }

    pub fn move_down(&mut self) {
        self.step_vertically(|row, rows| (row + 1) % rows);
    }

    /// Step rows in one direction within the current column, skipping rows
    /// too short to have that column.
    fn step_vertically(&mut self, step: impl Fn(usize, usize) -> usize) {
        let rows = self.row_count();
        if rows <= 1 {
            return;
        }
        let (mut row, col) = self.selection();
        loop {
            row = step(row, rows);
            let index = row * self.columns + col;
            if index < self.items.len() {
                self.selected = index;
                return;
            }
        }
    }

    pub fn view(&self) -> GridView {
        let (selected_row, selected_col) = self.selection();
        GridView {
            rows: self
                .items
                .chunks(self.columns)
                .map(|row| row.to_vec())
                .collect(),
            selected_row,
            selected_col,
        }
    }

    /// Plain-text rendering with the selection bracketed.
    pub fn render(&self) -> String {
        self.view().render()
    }
}

impl GridView {
    /// Columns padded to their widest entry, the selection in brackets and
    /// the rest framed by spaces.
    pub fn render(&self) -> String {
        let columns = self.rows.first().map_or(0, Vec::len);
        let widths: Vec<usize> = (0..columns)
            .map(|col| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(|item| item.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        for (row_index, row) in self.rows.iter().enumerate() {
            let mut line = String::new();
            for (col, item) in row.iter().enumerate() {
                let selected = (row_index, col) == (self.selected_row, self.selected_col);
                let (open, close) = if selected { ('[', ']') } else { (' ', ' ') };
                line.push(open);
                line.push_str(item);
                line.push(close);
                line.push_str(&" ".repeat(widths[col].saturating_sub(item.chars().count())));
            }
            out.push_str(line.trim_end_matches(' '));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_layout_single_row_when_it_fits() {
        let items = words(&["print", "priority"]);
        assert_eq!(layout_monospace(&items, 80), 2);
    }

    #[test]
    fn test_layout_backs_off_on_overflow() {
        // Each item is 10 wide with padding; 3 fit in 35, 4 do not.
        let items = words(&["aaaaaaaa"; 8]);
        assert_eq!(layout_monospace(&items, 35), 3);
        assert_eq!(layout_monospace(&items, 40), 4);
    }

    #[test]
    fn test_layout_minimum_is_one() {
        let items = words(&["a_very_long_completion_name", "another_long_completion_name"]);
        assert_eq!(layout_monospace(&items, 5), 1);
        assert_eq!(layout_monospace(&[], 5), 1);
    }

    #[test]
    fn test_layout_uses_widest_item_per_column() {
        let items = words(&["a", "bbbbbbbbbb", "c", "d"]);
        // Two columns: max("a","c")=3 + max("bbbbbbbbbb","d")=12 = 15.
        assert_eq!(grid_width(&items, 2, &|s: &str| s.len() + 2), 15);
    }

    #[test]
    fn test_two_item_right_wraps() {
        let mut grid = CompletionGrid::with_width(words(&["print", "priority"]), 80);
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.selected(), Some("print"));
        grid.move_right();
        assert_eq!(grid.selected(), Some("priority"));
        grid.move_right();
        assert_eq!(grid.selected(), Some("print"));
    }

    #[test]
    fn test_left_wraps_to_previous_row_and_last_cell() {
        // a b c
        // d e
        let mut grid = CompletionGrid::new(words(&["a", "b", "c", "d", "e"]), 3);
        grid.move_left();
        assert_eq!(grid.selected(), Some("e"));
        grid.select(1, 0);
        grid.move_left();
        assert_eq!(grid.selected(), Some("c"));
    }

    #[test]
    fn test_right_wraps_to_next_row() {
        let mut grid = CompletionGrid::new(words(&["a", "b", "c", "d", "e"]), 3);
        grid.select(0, 2);
        grid.move_right();
        assert_eq!(grid.selection(), (1, 0));
    }

    #[test]
    fn test_vertical_wrap_skips_short_rows() {
        // a b c
        // d e
        let mut grid = CompletionGrid::new(words(&["a", "b", "c", "d", "e"]), 3);
        grid.select(0, 2);
        grid.move_up();
        assert_eq!(grid.selected(), Some("c"));
        grid.move_down();
        assert_eq!(grid.selected(), Some("c"));

        grid.select(0, 1);
        grid.move_down();
        assert_eq!(grid.selected(), Some("e"));
        grid.move_down();
        assert_eq!(grid.selected(), Some("b"));
        grid.move_up();
        assert_eq!(grid.selected(), Some("e"));
    }

    #[test]
    fn test_vertical_skips_short_last_row() {
        let mut grid = CompletionGrid::new(words(&["a", "b", "c", "d", "e", "f", "g"]), 2);
        grid.select(0, 1);
        grid.move_up();
        // The last row holds only "g"; moving up from "b" lands on "f".
        assert_eq!(grid.selected(), Some("f"));
    }

    #[test]
    fn test_view_and_render() {
        let mut grid = CompletionGrid::new(words(&["ab", "c", "def"]), 2);
        grid.move_right();
        let view = grid.view();
        assert_eq!(view.rows, vec![words(&["ab", "c"]), words(&["def"])]);
        assert_eq!((view.selected_row, view.selected_col), (0, 1));
        assert_eq!(grid.render(), " ab  [c]\n def\n");
    }
}
