//! butler-daemon library target: the pieces a binary entry point wires
//! together (module lifecycle, shutdown orchestrator, the `route.execute`
//! tool, startup recovery) plus a default HTTP-backed `SdkQuery`.

pub mod builtin_modules;
pub mod ingest_tool;
pub mod modules;
pub mod recovery;
pub mod route_tool;
pub mod sdk_query;
pub mod shutdown;
pub mod state;

pub use ingest_tool::{IngestProcessor, IngestTool, INGEST_TOOL};
pub use modules::{FailurePhase, Module, ModuleStatus};
pub use route_tool::RouteExecuteTool;
pub use sdk_query::HttpSdkQuery;
pub use shutdown::{run_shutdown, AcceptingConnections, ShutdownPlan};
pub use state::AppState;
