//! # Optimizer Module
//!
//! Modulo che separa le responsabilità dell'orchestrazione in sottomoduli:
//! - `media_optimizer`: Orchestratore principale
//! - `scheduler`: Pool di worker limitato e aggregazione dei risultati
//! - `task`: Task, risultati e handle

pub mod media_optimizer;
pub mod scheduler;
pub mod task;

pub use media_optimizer::MediaOptimizer;
pub use scheduler::Scheduler;
pub use task::{OptimizationOutcome, Task, TaskHandle};
