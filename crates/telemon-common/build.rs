use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{input}"))
        .output_type(format!("crate::proto::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("Metrics")
        .package("telemon")
        .method(method(
            "add_metric",
            "AddMetric",
            "AddMetricRequest",
            "AddMetricResponse",
        ))
        .method(method(
            "batch_add_metric",
            "BatchAddMetric",
            "BatchAddMetricRequest",
            "BatchAddMetricResponse",
        ))
        .method(method(
            "get_metric",
            "GetMetric",
            "GetMetricRequest",
            "GetMetricResponse",
        ))
        .method(method(
            "list_metrics",
            "ListMetrics",
            "ListMetricsRequest",
            "ListMetricsResponse",
        ))
        .build();

    Builder::new().compile(&[service]);
}
