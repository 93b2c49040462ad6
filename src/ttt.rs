use serde::{Deserialize, Serialize};

pub const MIN_SIZE: usize = 3;
pub const MAX_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn other(self) -> Self {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Win(Mark),
    Draw,
}

pub fn clamp_size(requested: Option<usize>) -> usize {
    requested.unwrap_or(MIN_SIZE).clamp(MIN_SIZE, MAX_SIZE)
}

#[derive(Debug)]
pub struct Board {
    size: usize,
    cells: Vec<Option<Mark>>,
}

impl Board {
    pub fn new(size: usize) -> Self {
        Board {
            size,
            cells: vec![None; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_range(&self, index: usize) -> bool {
        index < self.cells.len()
    }

    pub fn is_free(&self, index: usize) -> bool {
        self.cells[index].is_none()
    }

    pub fn place(&mut self, index: usize, mark: Mark) {
        self.cells[index] = Some(mark);
    }

    pub fn reset(&mut self) {
        self.cells.fill(None);
    }

    /// Scans all rows, all columns and both full diagonals for a uniform
    /// mark; a filled board with no line is a draw.
    pub fn outcome(&self) -> Option<Outcome> {
        let size = self.size;

        for row in 0..size {
            if let Some(mark) = self.cells[row * size] {
                if (1..size).all(|col| self.cells[row * size + col] == Some(mark)) {
                    return Some(Outcome::Win(mark));
                }
            }
        }

        for col in 0..size {
            if let Some(mark) = self.cells[col] {
                if (1..size).all(|row| self.cells[row * size + col] == Some(mark)) {
                    return Some(Outcome::Win(mark));
                }
            }
        }

        if let Some(mark) = self.cells[0] {
            if (1..size).all(|idx| self.cells[idx * (size + 1)] == Some(mark)) {
                return Some(Outcome::Win(mark));
            }
        }

        if let Some(mark) = self.cells[size - 1] {
            if (1..size).all(|idx| self.cells[(idx + 1) * (size - 1)] == Some(mark)) {
                return Some(Outcome::Win(mark));
            }
        }

        if self.cells.iter().all(Option::is_some) {
            Some(Outcome::Draw)
        } else {
            None
        }
    }

    pub fn wire_cells(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|cell| cell.map(|mark| mark.as_str().to_string()).unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with(size: usize, marks: &[(usize, Mark)]) -> Board {
        let mut board = Board::new(size);
        for &(index, mark) in marks {
            board.place(index, mark);
        }
        board
    }

    #[test]
    fn size_is_clamped_to_known_range() {
        assert_eq!(clamp_size(None), 3);
        assert_eq!(clamp_size(Some(2)), 3);
        assert_eq!(clamp_size(Some(4)), 4);
        assert_eq!(clamp_size(Some(9)), 5);
    }

    #[test]
    fn full_row_wins() {
        let board = board_with(3, &[(3, Mark::X), (4, Mark::X), (5, Mark::X)]);
        assert_eq!(board.outcome(), Some(Outcome::Win(Mark::X)));
    }

    #[test]
    fn full_column_wins() {
        let board = board_with(4, &[(1, Mark::O), (5, Mark::O), (9, Mark::O), (13, Mark::O)]);
        assert_eq!(board.outcome(), Some(Outcome::Win(Mark::O)));
    }

    #[test]
    fn main_diagonal_wins_on_five() {
        let marks: Vec<(usize, Mark)> = (0..5).map(|i| (i * 6, Mark::X)).collect();
        let board = board_with(5, &marks);
        assert_eq!(board.outcome(), Some(Outcome::Win(Mark::X)));
    }

    #[test]
    fn anti_diagonal_wins() {
        let board = board_with(3, &[(2, Mark::O), (4, Mark::O), (6, Mark::O)]);
        assert_eq!(board.outcome(), Some(Outcome::Win(Mark::O)));
    }

    #[test]
    fn filled_board_without_line_is_draw() {
        // X O X / X O O / O X X
        let board = board_with(
            3,
            &[
                (0, Mark::X),
                (1, Mark::O),
                (2, Mark::X),
                (3, Mark::X),
                (4, Mark::O),
                (5, Mark::O),
                (6, Mark::O),
                (7, Mark::X),
                (8, Mark::X),
            ],
        );
        assert_eq!(board.outcome(), Some(Outcome::Draw));
    }

    #[test]
    fn incomplete_board_without_line_has_no_outcome() {
        let board = board_with(3, &[(0, Mark::X), (4, Mark::O)]);
        assert_eq!(board.outcome(), None);
    }

    #[test]
    fn mixed_line_does_not_win() {
        let board = board_with(3, &[(0, Mark::X), (1, Mark::O), (2, Mark::X)]);
        assert_eq!(board.outcome(), None);
    }

    #[test]
    fn reset_clears_every_cell() {
        let mut board = board_with(3, &[(0, Mark::X), (8, Mark::O)]);
        board.reset();
        assert!((0..9).all(|idx| board.is_free(idx)));
    }
}
