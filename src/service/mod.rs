pub mod engine_actor;

pub use engine_actor::{
    EngineArgs, EngineHandle, InstallOutcome, ModuleListing, RemoveOutcome, TargetInfo, spawn,
};
