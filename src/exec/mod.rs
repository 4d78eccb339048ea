//! Plan execution: walks a `PhysicalPlan` and produces the `Relation` it
//! denotes.

pub mod operators;

pub use operators::execute;
