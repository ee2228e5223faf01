pub mod controller;
pub mod policy;

pub use controller::{
    Admission, BackpressureController, BackpressureState, BackpressureStatus, DropReason,
    StateTransition, Thresholds,
};
pub use policy::{ListPriorityPolicy, SymbolPriorityPolicy};
