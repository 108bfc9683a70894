//! Channel egress ownership filter (§4.K): only the `messenger` butler may
//! call out over chat/email channels. Every other butler has egress tools
//! silently stripped from its tool registration at startup, and its
//! `route.execute` hands `notify_request` payloads to its own spawner
//! instead of acting as a direct channel adapter.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

pub const MESSENGER_BUTLER_NAME: &str = "messenger";

fn egress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:user|bot)_[a-z0-9]+_(?:send_message|reply_to_message|reply_to_thread)$")
            .expect("static egress tool pattern is valid")
    })
}

/// `(user_|bot_)<channel>_(send_message|reply_to_message|reply_to_thread)`.
/// Classification is purely name-based: a module that misdeclares an egress
/// tool as a non-egress input is still caught, since only the name matters.
pub fn is_channel_egress_tool(name: &str) -> bool {
    egress_pattern().is_match(name)
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ChannelEgressOwnershipError(pub String);

/// Mirrors `butler_tool_registrations` (§3: in-memory only, per-daemon
/// record of which tool names survived the filter).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRegistrationLedger {
    pub allowed: Vec<String>,
    pub suppressed: Vec<String>,
}

pub struct EgressOwnershipFilter {
    butler_name: String,
}

impl EgressOwnershipFilter {
    pub fn new(butler_name: impl Into<String>) -> Self {
        Self { butler_name: butler_name.into() }
    }

    pub fn butler_name(&self) -> &str {
        &self.butler_name
    }

    pub fn is_messenger(&self) -> bool {
        self.butler_name == MESSENGER_BUTLER_NAME
    }

    /// Filters one module's proposed tool names at startup registration
    /// time. Egress tools are silently suppressed (the module keeps its
    /// non-egress tools) unless this daemon is the messenger; suppression
    /// is logged at INFO.
    pub fn filter_registrations<'a>(
        &self,
        module_name: &str,
        tool_names: impl IntoIterator<Item = &'a str>,
    ) -> ToolRegistrationLedger {
        let mut ledger = ToolRegistrationLedger::default();
        for name in tool_names {
            if is_channel_egress_tool(name) && !self.is_messenger() {
                tracing::info!(
                    module = module_name,
                    tool = name,
                    butler = %self.butler_name,
                    "suppressed channel egress tool registration"
                );
                ledger.suppressed.push(name.to_string());
            } else {
                ledger.allowed.push(name.to_string());
            }
        }
        ledger
    }
}

/// Dispatch-time companion check (§4.K): a non-messenger butler's
/// `route.execute` must never act as a direct channel adapter for a
/// `notify_request` payload — it hands off to its own spawner instead,
/// closing the direct-delivery bypass. `true` means "route to spawner".
pub fn should_route_notify_to_spawner(butler_name: &str, has_notify_request: bool) -> bool {
    has_notify_request && butler_name != MESSENGER_BUTLER_NAME
}
