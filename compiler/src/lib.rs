// t2sc — temporal-to-spatial channel optimizer
//
// Library root. Front end (lexer, parser) → channel passes (promotion,
// combination) → outputs (printed IR, plan JSON, DOT).

pub mod combine;
pub mod diag;
pub mod dot;
pub mod error;
pub mod id;
pub mod interp;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod promotion;
pub mod simplify;
pub mod struct_type;
pub mod walk;
