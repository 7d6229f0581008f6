pub mod guards;
pub mod router;
pub mod routes;

pub use router::{StratusState, stratus_router};
