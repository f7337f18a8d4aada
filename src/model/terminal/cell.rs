//! Heavy (unpacked) cell representation used at the update-application
//! boundary, before cells are interned into the packed cache storage.

use serde::{Deserialize, Serialize};

/// A single terminal color, packed separately by [`crate::cache::terminal::packed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Default for Color {
    fn default() -> Self {
        Color::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellAttributes {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub reverse: bool,
    pub blink: bool,
    pub dim: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub char: char,
    pub fg_color: Color,
    pub bg_color: Color,
    pub attributes: CellAttributes,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            char: ' ',
            fg_color: Color::Default,
            bg_color: Color::Default,
            attributes: CellAttributes::default(),
        }
    }
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        self.char == ' ' && self.attributes == CellAttributes::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn default_cell_is_blank() {
        assert!(Cell::default().is_blank());
    }

    #[test_timeout::timeout]
    fn non_space_char_is_not_blank() {
        let cell = Cell {
            char: 'x',
            ..Cell::default()
        };
        assert!(!cell.is_blank());
    }

    #[test_timeout::timeout]
    fn cell_serialization_round_trips() {
        let cell = Cell {
            char: '☃',
            fg_color: Color::Rgb(1, 2, 3),
            bg_color: Color::Indexed(9),
            attributes: CellAttributes {
                bold: true,
                underline: true,
                ..CellAttributes::default()
            },
        };
        let json = serde_json::to_string(&cell).expect("serialize");
        let round_tripped: Cell = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cell, round_tripped);
    }
}
