//! Contract validation gate between extraction and load

pub mod contract;
pub mod validator;

pub use contract::{ColumnSpec, ColumnType, Contract, ContractStore};
pub use validator::{
    ValidationReport, Validator, Violation, ViolationKind, MAX_ROW_VIOLATIONS, MAX_TABLE_VIOLATIONS,
};
