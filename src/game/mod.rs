//! Game simulation modules

pub mod catalog;
pub mod collision;
pub mod driver;
pub mod map;
pub mod orchestrator;
pub mod physics;
pub mod run;
pub mod snapshot;
pub mod vector;

pub use catalog::{CatalogError, LoadedMap, MapCatalog};
pub use driver::{ControlRequest, RunDriver, RunHandle};
pub use orchestrator::{ControlError, OrchestratorSettings, RunOrchestrator};
