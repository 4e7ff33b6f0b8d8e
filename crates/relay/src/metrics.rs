use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_messages_total: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_connections_total: AtomicU64,
    broadcast_evictions_total: AtomicU64,
    room_sync_total: Mutex<HashMap<String, u64>>,
    hub_rooms: AtomicU64,
    hub_sessions: AtomicU64,
}

const SYNC_OUTCOMES: [&str; 2] = ["success", "failed"];
static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        let mut room_sync_total = HashMap::new();
        for outcome in SYNC_OUTCOMES {
            room_sync_total.insert(outcome.to_string(), 0);
        }

        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            ws_messages_total: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_connections_total: AtomicU64::new(0),
            broadcast_evictions_total: AtomicU64::new(0),
            room_sync_total: Mutex::new(room_sync_total),
            hub_rooms: AtomicU64::new(0),
            hub_sessions: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_message(kind: &str, is_error: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_message(kind, is_error);
    }
}

pub fn increment_ws_connections() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_ws_connections();
    }
}

pub fn increment_broadcast_evictions() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_broadcast_evictions();
    }
}

pub fn record_room_sync(succeeded: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.record_room_sync(succeeded);
    }
}

pub fn set_hub_gauges(rooms: usize, sessions: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.set_hub_gauges(rooms, sessions);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_message(&self, kind: &str, is_error: bool) {
        let normalized_kind = normalize_label(kind);
        increment_label_counter(&self.ws_messages_total, &normalized_kind, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &normalized_kind, 1);
        }
    }

    pub fn increment_ws_connections(&self) {
        self.ws_connections_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_broadcast_evictions(&self) {
        self.broadcast_evictions_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_room_sync(&self, succeeded: bool) {
        let outcome = if succeeded { "success" } else { "failed" };
        increment_label_counter(&self.room_sync_total, outcome, 1);
    }

    pub fn set_hub_gauges(&self, rooms: usize, sessions: usize) {
        self.hub_rooms.store(rooms as u64, Ordering::SeqCst);
        self.hub_sessions.store(sessions as u64, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_ws_messages_total Inbound websocket messages by type.\n");
        output.push_str("# TYPE relay_ws_messages_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_messages_total",
            "type",
            &self.ws_messages_total,
        );

        output.push_str(
            "# HELP relay_ws_errors_total Rejected inbound websocket messages by type.\n",
        );
        output.push_str("# TYPE relay_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_errors_total", "type", &self.ws_errors_total);

        output.push_str("# HELP relay_ws_connections_total Accepted websocket sessions.\n");
        output.push_str("# TYPE relay_ws_connections_total counter\n");
        output.push_str(&format!(
            "relay_ws_connections_total {}\n",
            self.ws_connections_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP relay_broadcast_evictions_total Sessions dropped for a full or closed queue.\n",
        );
        output.push_str("# TYPE relay_broadcast_evictions_total counter\n");
        output.push_str(&format!(
            "relay_broadcast_evictions_total {}\n",
            self.broadcast_evictions_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_room_sync_total Durable room syncs by outcome.\n");
        output.push_str("# TYPE relay_room_sync_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_room_sync_total",
            "outcome",
            &self.room_sync_total,
        );

        output.push_str("# HELP relay_hub_rooms Local broadcast rooms on this instance.\n");
        output.push_str("# TYPE relay_hub_rooms gauge\n");
        output.push_str(&format!("relay_hub_rooms {}\n", self.hub_rooms.load(Ordering::SeqCst)));

        output.push_str("# HELP relay_hub_sessions Attached sessions on this instance.\n");
        output.push_str("# TYPE relay_hub_sessions gauge\n");
        output.push_str(&format!(
            "relay_hub_sessions {}\n",
            self.hub_sessions.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if segment.starts_with("room_") {
            normalized_segments.push("{room_id}".to_string());
            continue;
        }

        if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
            continue;
        }

        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_label(label: &str) -> String {
    let normalized = label.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn lock<T>(map: &Mutex<T>) -> MutexGuard<'_, T> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = lock(map);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = lock(map);
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = lock(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = lock(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
