//! Approval workflow statistics.

use serde::Serialize;

use crate::incidents::{ApprovalRequest, RequestState};

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ApprovalStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub expired: usize,
    /// Approved share of decided requests, in percent.
    pub approval_rate: f64,
    /// Mean seconds from request to decision, over decided requests.
    pub average_decision_secs: f64,
}

impl ApprovalStats {
    pub fn from_requests(requests: &[ApprovalRequest]) -> Self {
        let mut stats = ApprovalStats {
            total: requests.len(),
            ..Default::default()
        };
        let mut latency_ms: i64 = 0;
        let mut timed = 0i64;

        for request in requests {
            match request.state {
                RequestState::Pending => stats.pending += 1,
                RequestState::Approved => stats.approved += 1,
                RequestState::Rejected => stats.rejected += 1,
                RequestState::Expired => stats.expired += 1,
            }
            if let Some(decided_at) = request.decided_at {
                latency_ms += (decided_at - request.created_at).num_milliseconds();
                timed += 1;
            }
        }

        let decided = stats.approved + stats.rejected;
        if decided > 0 {
            stats.approval_rate = stats.approved as f64 * 100.0 / decided as f64;
        }
        if timed > 0 {
            stats.average_decision_secs = latency_ms as f64 / timed as f64 / 1000.0;
        }
        stats
    }
}
