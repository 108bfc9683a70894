use uuid::Uuid;

/// A lightweight pointer into `route_inbox`, never the envelope itself —
/// workers and the scanner both reload the full row by id so the queue
/// stays cheap to enqueue and nothing duplicated goes stale across a
/// scanner recovery cycle.
#[derive(Debug, Clone)]
pub struct MessageRef {
    pub inbox_id: Uuid,
    pub normalized_text: String,
}
