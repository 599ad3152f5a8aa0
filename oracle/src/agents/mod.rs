//! Generation and verification collaborators built on the LLM and GitHub
//! adapters.

pub mod autonomous_planner;
pub mod coder;
pub mod planner;
pub mod task_expander;
pub mod verifier;
