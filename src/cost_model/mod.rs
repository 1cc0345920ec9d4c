pub mod cost_vector;
pub mod cpu_cost_model;
pub mod interface;
pub mod priority;
pub mod trivial_cost_model;
