use std::sync::Arc;
use std::time::Instant;

use super::{RpcStats, STATUS_OK};
use crate::tags::TagMap;

/// State carried between the start and the end of one call.
///
/// Created by [`RpcStats::start_call`]; consumed by [`CallTracker::finish`],
/// which records everything in a single `record` call.
pub struct CallTracker {
    stats: Arc<RpcStats>,
    tags: TagMap,
    // Approximates when application code handed the call over
    started: Instant,
    request_count: u64,
    response_count: u64,
    request_bytes: u64,
    response_bytes: u64,
}

impl CallTracker {
    pub(super) fn start(stats: Arc<RpcStats>, service: &str, method: &str) -> Self {
        let keys = stats.keys();
        let mut tags = TagMap::with_capacity(3);
        tags.upsert(keys.service.clone(), keys.service.encode_str(service));
        tags.upsert(keys.method.clone(), keys.method.encode_str(method));

        Self {
            stats,
            tags,
            started: Instant::now(),
            request_count: 0,
            response_count: 0,
            request_bytes: 0,
            response_bytes: 0,
        }
    }

    pub fn on_request(&mut self, bytes: u64) {
        self.request_count += 1;
        self.request_bytes += bytes;
    }

    pub fn on_response(&mut self, bytes: u64) {
        self.response_count += 1;
        self.response_bytes += bytes;
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    /// Records latency, message counts, payload sizes and, for any status
    /// other than [`STATUS_OK`], one error.
    pub fn finish(self, status: &str) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.finish_with_latency(status, elapsed_ms);
    }

    /// Like [`finish`](Self::finish) with a caller-measured latency.
    pub fn finish_with_latency(mut self, status: &str, latency_ms: f64) {
        let keys = self.stats.keys();
        self.tags
            .upsert(keys.status.clone(), keys.status.encode_str(status));

        let m = self.stats.measures();
        let mut measurements = vec![
            m.latency.m(latency_ms),
            m.request_count.m(clamp(self.request_count)),
            m.response_count.m(clamp(self.response_count)),
            m.request_bytes.m(clamp(self.request_bytes)),
            m.response_bytes.m(clamp(self.response_bytes)),
        ];
        if status != STATUS_OK {
            measurements.push(m.error_count.m(1));
        }

        self.stats.registry().record(&self.tags, &measurements);
    }
}

fn clamp(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Side;
    use crate::stats::Registry;
    use crate::tags::Tag;

    fn server() -> Arc<RpcStats> {
        let reg = Arc::new(Registry::new());
        Arc::new(RpcStats::register(reg, Side::Server, 6).unwrap())
    }

    #[test]
    fn finish_records_every_default_view() {
        let stats = server();
        let mut call = stats.start_call("billing", "Charge");
        call.on_request(100);
        call.on_response(2000);
        call.on_response(48);
        call.finish_with_latency(STATUS_OK, 12.5);

        let reg = stats.registry();
        let keys = stats.keys();
        let wanted = [
            Tag::new(keys.service.clone(), b"billing".to_vec()),
            Tag::new(keys.method.clone(), b"Charge".to_vec()),
        ];

        let latency = reg.retrieve_data("rpc.server/latency/cumulative").unwrap();
        let row = latency.row(&wanted).unwrap();
        let d = row.data.as_distribution().unwrap();
        assert_eq!(d.count(), 1);
        assert_eq!(d.max(), Some(12.5));

        let responses = reg.retrieve_data("rpc.server/response_count/cumulative").unwrap();
        let d = responses.row(&wanted).unwrap().data.as_distribution().unwrap();
        assert_eq!(d.sum(), 2.0);

        let bytes = reg.retrieve_data("rpc.server/response_bytes/cumulative").unwrap();
        let d = bytes.row(&wanted).unwrap().data.as_distribution().unwrap();
        assert_eq!(d.sum(), 2048.0);

        let errors = reg.retrieve_data("rpc.server/error_count/cumulative").unwrap();
        assert!(errors.rows.is_empty());
    }

    #[test]
    fn non_ok_status_counts_an_error() {
        let stats = server();
        stats.start_call("billing", "Refund").finish("UNAVAILABLE");
        stats.start_call("billing", "Refund").finish("UNAVAILABLE");
        stats.start_call("billing", "Refund").finish(STATUS_OK);

        let errors = stats
            .registry()
            .retrieve_data("rpc.server/error_count/cumulative")
            .unwrap();
        assert_eq!(errors.rows.len(), 1);
        assert_eq!(errors.rows[0].data.as_count().unwrap().value, 2);
        assert!(errors.rows[0]
            .tags
            .iter()
            .any(|t| t.value_to_string() == "UNAVAILABLE"));

        let completed = stats
            .registry()
            .retrieve_data("rpc.server/completed/hour")
            .unwrap();
        assert_eq!(completed.rows.len(), 2);
    }
}
