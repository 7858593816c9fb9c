//! Performance benchmarks for conflux

use conflux::anchor::{AnchorCall, AnchorConfig, AnchorRequest, AnchorResponse, TaintSet, TunSpec};
use conflux::config::{validation, ConfluxConfig, Settings};
use conflux::control::{ApiRequest, ControlAction};
use conflux::service::descriptor;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const SETTINGS_TOML: &str = r#"
[anchor]
binding = "handshake"
scratch_dir = "/tmp/conflux"
readiness_delay_ms = 500
connect_attempts = 5

[tun]
interface = "veilnet"
mtu = 1420

[control]
enabled = true
socket_path = "/var/run/conflux.sock"

[logging]
debug = false
"#;

const UNIT_TEMPLATE: &str = "[Service]\nExecStart={{exec_path}}\nRestart=always\n";

fn bench_settings_parsing(c: &mut Criterion) {
    c.bench_function("settings_parse", |b| {
        b.iter(|| {
            let _ = Settings::parse(black_box(SETTINGS_TOML));
        });
    });
}

fn bench_config_json(c: &mut Criterion) {
    let config = ConfluxConfig {
        conflux_id: "cfx-bench".to_string(),
        token: "anchor-token".to_string(),
        taints: ["team=infra", "env=prod", "region=eu"].into_iter().collect(),
        ..ConfluxConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();

    let mut group = c.benchmark_group("conflux_config");

    group.bench_function("serialize", |b| {
        b.iter(|| {
            let _ = serde_json::to_string(black_box(&config));
        });
    });

    group.bench_function("deserialize", |b| {
        b.iter(|| {
            let _: ConfluxConfig = serde_json::from_str(black_box(&json)).unwrap();
        });
    });

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    group.bench_function("taint_valid", |b| {
        b.iter(|| {
            let _ = validation::validate_taint(black_box("team=infra"));
        });
    });

    group.bench_function("tun_spec", |b| {
        let spec = TunSpec::new("veilnet", 1500);
        b.iter(|| {
            let _ = black_box(&spec).validate();
        });
    });

    group.finish();
}

fn bench_taint_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("taint_churn");

    for count in [4, 16, 64].iter() {
        let taints: Vec<String> = (0..*count).map(|i| format!("key{}=value", i)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &taints, |b, taints| {
            b.iter(|| {
                let mut set = TaintSet::new();
                for taint in taints {
                    set.add(taint);
                }
                for taint in taints.iter().step_by(2) {
                    set.remove(taint);
                }
                black_box(set);
            });
        });
    }

    group.finish();
}

fn bench_wire_encoding(c: &mut Criterion) {
    let start = AnchorRequest {
        id: 7,
        call: AnchorCall::StartAnchor(AnchorConfig {
            guardian_url: "https://guardian.veilnet.app".to_string(),
            tunnel_url: "veil.veilnet.app".to_string(),
            tunnel_port: 443,
            auth_token: "anchor-token".to_string(),
            portal: true,
            ip: None,
        }),
    };
    let response_line = r#"{"id":7,"success":true,"data":{"id":"anchor-1"}}"#;
    let control = ApiRequest::with_taint(ControlAction::AddTaint, "team=infra");

    let mut group = c.benchmark_group("wire_encoding");

    group.bench_function("anchor_request", |b| {
        b.iter(|| {
            let _ = serde_json::to_string(black_box(&start));
        });
    });

    group.bench_function("anchor_response", |b| {
        b.iter(|| {
            let _: AnchorResponse = serde_json::from_str(black_box(response_line)).unwrap();
        });
    });

    group.bench_function("control_request", |b| {
        b.iter(|| {
            let _ = black_box(&control).to_json();
        });
    });

    group.finish();
}

fn bench_descriptor_render(c: &mut Criterion) {
    c.bench_function("descriptor_render", |b| {
        b.iter(|| {
            let _ = descriptor::render(black_box(UNIT_TEMPLATE), black_box("/opt/conflux/bin/conflux"));
        });
    });
}

criterion_group!(
    benches,
    bench_settings_parsing,
    bench_config_json,
    bench_validation,
    bench_taint_churn,
    bench_wire_encoding,
    bench_descriptor_render,
);

criterion_main!(benches);
