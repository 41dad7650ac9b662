//! Voice workflow module
//!
//! Drives capture, clip assembly, and submission for the enroll, identify,
//! and merge speaker workflows.

pub mod workflow;

pub use workflow::{
    VoiceWorkflow, WorkflowEvent, WorkflowIntent, WorkflowOutcome, WorkflowPhase,
};
