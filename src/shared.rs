pub mod convergence_core;
