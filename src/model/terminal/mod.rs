pub mod cell;
pub mod cursor;
pub mod update;

pub use cell::{Cell, CellAttributes, Color};
pub use cursor::CursorState;
pub use update::Update;
