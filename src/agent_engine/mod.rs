pub mod engine;
pub mod history;
pub mod loop_control;
pub mod proposal;
pub mod state;
