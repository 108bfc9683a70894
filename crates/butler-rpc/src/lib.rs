//! JSON-over-HTTP tool client/server shared by every butler.
//!
//! A butler exposes named tools under `/v1/tools/:name`; one name,
//! `route.execute`, is reserved system-wide (see `tool::ROUTE_EXECUTE_TOOL`).
//! Calls are addressed by `(butler_name, tool_name, args)` and resolved to
//! an endpoint through whatever `EndpointResolver` the caller wires up —
//! normally `butler-db::registry` backed by the `butler_registry` table.

pub mod client;
pub mod server;
pub mod tool;

pub use client::{EndpointResolver, RpcClient};
pub use server::build_router;
pub use tool::{Tool, ToolRegistry, ROUTE_EXECUTE_TOOL};
