//! The replicated Reversi position.
//!
//! The cluster never interprets this value: it is serialized, compared and
//! replaced wholesale. Move legality and win detection live outside the
//! cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const BOARD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Free,
    White,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Turn {
    #[default]
    White,
    Black,
    WhiteWon,
    BlackWon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub game_started: bool,
    pub cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
    pub turn: Turn,
}

impl BoardState {
    /// Standard opening: four discs in the centre, white to move.
    pub fn initial() -> Self {
        let mut cells = [[Cell::Free; BOARD_SIZE]; BOARD_SIZE];
        cells[3][3] = Cell::White;
        cells[3][4] = Cell::Black;
        cells[4][3] = Cell::Black;
        cells[4][4] = Cell::White;
        Self {
            game_started: false,
            cells,
            turn: Turn::White,
        }
    }

    pub fn count(&self, cell: Cell) -> usize {
        self.cells
            .iter()
            .flat_map(|row| row.iter())
            .filter(|c| **c == cell)
            .count()
    }
}

impl Default for BoardState {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for BoardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  a b c d e f g h")?;
        for (index, row) in self.cells.iter().enumerate() {
            write!(f, "{}", index + 1)?;
            for cell in row {
                let glyph = match cell {
                    Cell::Free => '.',
                    Cell::White => 'W',
                    Cell::Black => 'B',
                };
                write!(f, " {glyph}")?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "started: {}, turn: {:?}",
            self.game_started, self.turn
        )
    }
}
