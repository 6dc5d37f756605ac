//! Index space, stencils and distributed box grids.

pub mod index_box;
pub mod stencil;
pub mod struct_grid;

pub use index_box::{Index, IndexBox};
pub use stencil::StructStencil;
pub use struct_grid::{GlobalBox, StructGrid};
