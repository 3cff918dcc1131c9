//! Command argument parsing - tokenizer, signatures and type domains

pub mod domain;
pub mod parser;

pub use domain::{ArgValue, DomainConfig, Transform, TypeRegistry, ValueType};
pub use parser::{
    parse_signature, resolve_value, tokenize, Action, Declaration, DeclarationList,
    OptionDeclaration, Token,
};
