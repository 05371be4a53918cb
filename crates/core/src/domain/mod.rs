pub mod attempt;
pub mod boq;
pub mod rules;
