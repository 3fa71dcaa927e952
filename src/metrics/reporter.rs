//! Per-model metric reporter.
//!
//! The reporter carries the model's `name`/`version` labels and exposes
//! narrow methods, so request paths cannot mis-label a sample. Every
//! permissible label tuple is created at construction time.

use std::sync::Arc;

use crate::api::{ExecutionContext, Interface, Method};

use super::{label_key, MetricFamily, MetricKind, MetricRegistry, DURATION_BUCKETS_US};

pub struct ModelMetricReporter {
    name: String,
    version: u64,
    model_key: String,
    requests_success: Option<Arc<MetricFamily>>,
    requests_fail: Option<Arc<MetricFamily>>,
    request_time: Option<Arc<MetricFamily>>,
    inference_time: Option<Arc<MetricFamily>>,
    wait_for_infer_req_time: Option<Arc<MetricFamily>>,
    streams: Option<Arc<MetricFamily>>,
    infer_req_queue_size: Option<Arc<MetricFamily>>,
    infer_req_active: Option<Arc<MetricFamily>>,
    current_requests: Option<Arc<MetricFamily>>,
}

impl ModelMetricReporter {
    pub fn new(registry: &MetricRegistry, name: &str, version: u64) -> Arc<Self> {
        let reporter = ModelMetricReporter {
            name: name.to_string(),
            version,
            model_key: label_key(&[
                ("name", name.to_string()),
                ("version", version.to_string()),
            ]),
            requests_success: registry.family(
                "ovms_requests_success",
                "Number of successful requests to a model or a DAG.",
                MetricKind::Counter,
                &[],
            ),
            requests_fail: registry.family(
                "ovms_requests_fail",
                "Number of failed requests to a model or a DAG.",
                MetricKind::Counter,
                &[],
            ),
            request_time: registry.family(
                "ovms_request_time_us",
                "Processing time of requests to a model or a DAG.",
                MetricKind::Histogram,
                DURATION_BUCKETS_US,
            ),
            inference_time: registry.family(
                "ovms_inference_time_us",
                "Inference execution time in the backend.",
                MetricKind::Histogram,
                DURATION_BUCKETS_US,
            ),
            wait_for_infer_req_time: registry.family(
                "ovms_wait_for_infer_req_time_us",
                "Request waiting time in the scheduling queue.",
                MetricKind::Histogram,
                DURATION_BUCKETS_US,
            ),
            streams: registry.family(
                "ovms_streams",
                "Number of execution streams.",
                MetricKind::Gauge,
                &[],
            ),
            infer_req_queue_size: registry.family(
                "ovms_infer_req_queue_size",
                "Inference request queue size (nireq).",
                MetricKind::Gauge,
                &[],
            ),
            infer_req_active: registry.family(
                "ovms_infer_req_active",
                "Number of currently consumed inference request slots.",
                MetricKind::Gauge,
                &[],
            ),
            current_requests: registry.family(
                "ovms_current_requests",
                "Number of requests being currently processed by the model server.",
                MetricKind::Gauge,
                &[],
            ),
        };
        reporter.materialize_tuples();
        Arc::new(reporter)
    }

    /// Pre-creates the full cartesian product of label tuples at zero.
    fn materialize_tuples(&self) {
        for interface in Interface::ALL {
            for method in Method::ALL {
                let key = self.request_key(interface, method);
                if let Some(family) = &self.requests_success {
                    family.create(&key);
                }
                if let Some(family) = &self.requests_fail {
                    family.create(&key);
                }
            }
            if let Some(family) = &self.request_time {
                family.create(&self.request_time_key(interface));
            }
        }
        for family in [
            &self.inference_time,
            &self.wait_for_infer_req_time,
            &self.streams,
            &self.infer_req_queue_size,
            &self.infer_req_active,
            &self.current_requests,
        ]
        .into_iter()
        .flatten()
        {
            family.create(&self.model_key);
        }
    }

    fn request_key(&self, interface: Interface, method: Method) -> String {
        let mut pairs = vec![
            ("api", method.api().as_str().to_string()),
            ("interface", interface.as_str().to_string()),
            ("method", method.as_str().to_string()),
            ("name", self.name.clone()),
        ];
        if method.has_version_label() {
            pairs.push(("version", self.version.to_string()));
        }
        label_key(&pairs)
    }

    fn request_time_key(&self, interface: Interface) -> String {
        label_key(&[
            ("interface", interface.as_str().to_string()),
            ("name", self.name.clone()),
            ("version", self.version.to_string()),
        ])
    }

    pub fn increment_success(&self, ctx: ExecutionContext) {
        if let Some(family) = &self.requests_success {
            family.increment(&self.request_key(ctx.interface, ctx.method), 1);
        }
    }

    pub fn increment_fail(&self, ctx: ExecutionContext) {
        if let Some(family) = &self.requests_fail {
            family.increment(&self.request_key(ctx.interface, ctx.method), 1);
        }
    }

    pub fn observe_request_time(&self, interface: Interface, micros: f64) {
        if let Some(family) = &self.request_time {
            family.observe(&self.request_time_key(interface), micros);
        }
    }

    pub fn observe_inference_time(&self, micros: f64) {
        if let Some(family) = &self.inference_time {
            family.observe(&self.model_key, micros);
        }
    }

    pub fn observe_wait_time(&self, micros: f64) {
        if let Some(family) = &self.wait_for_infer_req_time {
            family.observe(&self.model_key, micros);
        }
    }

    pub fn set_streams(&self, value: i64) {
        if let Some(family) = &self.streams {
            family.set(&self.model_key, value);
        }
    }

    pub fn set_queue_size(&self, value: i64) {
        if let Some(family) = &self.infer_req_queue_size {
            family.set(&self.model_key, value);
        }
    }

    pub fn inc_infer_req_active(&self) {
        if let Some(family) = &self.infer_req_active {
            family.add(&self.model_key, 1);
        }
    }

    pub fn dec_infer_req_active(&self) {
        if let Some(family) = &self.infer_req_active {
            family.add(&self.model_key, -1);
        }
    }

    fn inc_current_requests(&self) {
        if let Some(family) = &self.current_requests {
            family.add(&self.model_key, 1);
        }
    }

    fn dec_current_requests(&self) {
        if let Some(family) = &self.current_requests {
            family.add(&self.model_key, -1);
        }
    }

    /// RAII scope for the in-flight request gauge.
    pub fn current_requests_guard(self: &Arc<Self>) -> CurrentRequestsGuard {
        self.inc_current_requests();
        CurrentRequestsGuard {
            reporter: Arc::clone(self),
        }
    }
}

pub struct CurrentRequestsGuard {
    reporter: Arc<ModelMetricReporter>,
}

impl Drop for CurrentRequestsGuard {
    fn drop(&mut self) {
        self.reporter.dec_current_requests();
    }
}
