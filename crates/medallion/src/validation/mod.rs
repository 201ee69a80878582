//! Input validation: declarative schema checks and business rules.
//!
//! Both validators split their input into passing and failing rows instead
//! of erroring, so the run continues on what passed and the rest can be
//! quarantined.

mod business;
mod schema;

pub use business::{
    BusinessRule, BusinessRuleValidator, BusinessValidation, CRITICAL_COLUMNS, POSITIVE_COLUMNS,
    RuleFailure,
};
pub use schema::{
    Check, ColumnSpec, CompareOp, CrossColumnCheck, FailureCase, PRODUCT_CATEGORIES, Schema,
    SchemaBuilder, SchemaValidation, SchemaValidator, ValidationMode,
};
