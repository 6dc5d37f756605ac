//! Matrix module: structured stencil matrices and the vectors they act on.

pub mod struct_matrix;
pub mod struct_vector;

pub use struct_matrix::StructMatrix;
pub use struct_vector::StructVector;
