//! Cost models for a min-cost max-flow cluster scheduler.
//!
//! Scheduling is reduced to a minimum-cost maximum-flow problem over a graph
//! whose nodes are tasks, equivalence classes, machines, processing units and
//! a sink. The crate provides the pluggable cost-model component of that
//! reduction: it assigns costs and capacities to every arc kind the
//! flow-graph manager may create, and maintains the equivalence-class indices
//! needed to compute them. The solver, the flow-graph manager and the object
//! stores are external collaborators.

pub mod config;
pub mod core;
pub mod cost_model;
pub mod test_util;
