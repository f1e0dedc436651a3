//! Command-line and script parsing.

pub mod command;
pub mod lexer;
pub mod operators;
pub mod redirection;
pub mod script;

pub use command::{parse, Command, CommandChain};
pub use lexer::{strip_quotes, tokenize, Token};
pub use operators::{split_by_operators_detailed, ChainOp, OperatorSegment};
pub use redirection::{extract_redirections, Redirection, RedirKind};
pub use script::{is_script_input, parse_script, CaseArm, ScriptBlock, Statement};
