//! Symbolic layer: parsed parameter expressions and sparse polynomials.

pub mod expr;
pub mod poly;

pub use expr::{ BinOp, Expr };
pub use poly::{ Monomial, Poly, Symbol };
