mod common;

use std::io::Write;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use deepset_rs::nn::{Activation, Mlp};
use deepset_rs::{AggregationKind, DeepSetBuilder, DeepSetConfig, DeepSetError, OuterMap};

use common::{random_set, seeded_rng};

const CONFIG: &str = r#"{
    "aggregation": "logsumexp",
    "learned_width": 6,
    "expert_statistics": ["sample_size", "log_sample_size"],
    "covariate_width": 0,
    "inner": {
        "input_width": 4,
        "hidden_width": 12,
        "output_width": 6,
        "depth": 2,
        "activation": "gelu"
    },
    "outer": {
        "input_width": 8,
        "hidden_width": 12,
        "output_width": 3,
        "depth": 1
    }
}"#;

#[test]
fn parses_full_config() {
    let config = DeepSetConfig::from_json_str(CONFIG).expect("parse config");
    assert_eq!(config.aggregation, AggregationKind::LogSumExp);
    assert_eq!(config.learned_width, 6);
    assert_eq!(config.expert_width().expect("expert width"), 2);
    assert_eq!(config.summary_width().expect("summary width"), 8);

    let inner = config.inner.as_ref().expect("inner config");
    assert_eq!(inner.activation, Activation::Gelu);
    assert_eq!(inner.output_activation, Activation::Identity);
    let outer = config.outer.as_ref().expect("outer config");
    assert_eq!(outer.activation, Activation::Relu);
}

#[test]
fn defaults_fill_missing_fields() {
    let config = DeepSetConfig::from_json_str(r#"{ "learned_width": 4 }"#).expect("parse");
    assert_eq!(config.aggregation, AggregationKind::Mean);
    assert!(config.expert_statistics.is_empty());
    assert_eq!(config.covariate_width, 0);
    assert!(config.inner.is_none() && config.outer.is_none());
}

#[test]
fn rejects_inconsistent_widths() {
    let err = DeepSetConfig::from_json_str(
        r#"{ "learned_width": 4, "outer": { "input_width": 5, "hidden_width": 8, "output_width": 2, "depth": 1 } }"#,
    )
    .expect_err("outer input must equal learned width");
    assert!(format!("{err:#}").contains("summary width"), "{err:#}");

    let err = DeepSetConfig::from_json_str(r#"{ "expert_statistics": ["median"] }"#)
        .expect_err("unknown statistic");
    assert!(format!("{err:#}").contains("median"), "{err:#}");

    let err = DeepSetConfig::from_json_str("{}").expect_err("nothing to summarize");
    assert!(format!("{err:#}").contains("learned summary"), "{err:#}");
}

#[test]
fn loads_from_file_and_round_trips() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CONFIG.as_bytes()).expect("write config");
    let loaded = DeepSetConfig::from_json_file(file.path()).expect("load config");

    let json = loaded.to_json_string().expect("serialize");
    let reparsed = DeepSetConfig::from_json_str(&json).expect("reparse");
    assert_eq!(loaded, reparsed);

    let err = DeepSetConfig::from_json_file(file.path().with_extension("missing"))
        .expect_err("missing file");
    assert!(format!("{err:#}").contains("failed to read config"), "{err:#}");
}

#[test]
fn builds_model_from_config() {
    let config = DeepSetConfig::from_json_str(CONFIG).expect("parse config");
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let inner_config = config.inner.clone().expect("inner config");
    let outer_config = config.outer.clone().expect("outer config");
    let inner = Mlp::new(inner_config, vb.pp("inner")).expect("inner mlp");
    let outer = Mlp::new(outer_config, vb.pp("outer")).expect("outer mlp");

    let model = DeepSetBuilder::from_config(&config)
        .expect("builder from config")
        .inner(inner, config.learned_width)
        .outer(OuterMap::from_mlp(outer).expect("outer map"))
        .build()
        .expect("model");
    assert_eq!(model.aggregation().kind(), Some(AggregationKind::LogSumExp));
    assert_eq!(model.expert_width(), 2);
    assert_eq!(model.summary_width(), 8);

    let mut rng = seeded_rng(42);
    let sets = vec![random_set(&mut rng, 2, 4), random_set(&mut rng, 5, 4)];
    let output = model.forward(sets).expect("forward");
    assert_eq!(output.dims(), &[2, 3]);
}

#[test]
fn builder_enforces_config_widths() {
    let config = DeepSetConfig::from_json_str(CONFIG).expect("parse config");
    let mut rng = seeded_rng(7);

    let err = DeepSetBuilder::from_config(&config)
        .expect("builder from config")
        .inner(common::random_linear(&mut rng, 4, 3), 3)
        .outer(OuterMap::identity(5).expect("identity"))
        .build()
        .expect_err("learned width 3 disagrees with 6");
    assert!(matches!(err, DeepSetError::Configuration(_)), "{err}");

    let err = DeepSetBuilder::from_config(&config)
        .expect("builder from config")
        .inner(common::random_linear(&mut rng, 4, 6), 6)
        .outer(OuterMap::identity(8).expect("identity"))
        .build()
        .expect_err("outer must map 8 -> 3");
    assert!(matches!(err, DeepSetError::Configuration(_)), "{err}");
}

#[test]
fn builds_networks_from_config_weights() {
    let config = DeepSetConfig::from_json_str(CONFIG).expect("parse config");
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = DeepSetBuilder::from_config_with_weights(&config, vb)
        .expect("networks from config")
        .build()
        .expect("model");
    assert_eq!(model.learned_width(), 6);
    assert_eq!(model.output_width(), 3);
    assert_eq!(varmap.all_vars().len(), 10, "three inner and two outer linear layers");

    let mut rng = seeded_rng(9);
    let output = model
        .forward(vec![random_set(&mut rng, 3, 4), random_set(&mut rng, 1, 4)])
        .expect("forward");
    assert_eq!(output.dims(), &[2, 3]);

    let without_outer = DeepSetConfig {
        outer: None,
        ..config
    };
    let empty = VarMap::new();
    let vb = VarBuilder::from_varmap(&empty, DType::F32, &Device::Cpu);
    let err = DeepSetBuilder::from_config_with_weights(&without_outer, vb)
        .err()
        .expect("outer network is required");
    assert!(matches!(err, DeepSetError::Configuration(_)), "{err}");
}
