mod parser;
mod resolve;
mod types;

pub use parser::{parse_declarations, parse_declarations_str};
pub use resolve::{resolve, ResolvedOptions, StoreTarget};
pub use types::{
    CascadePolicy, DeclarationFile, Defaults, IdStrategy, IndexKey, IndexSpec, ModelDeclaration,
    ReferenceSpec, SortOrder,
};
