// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::LazyLock;

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
};

pub static STATE_TRANSITIONS: LazyLock<Family<StateLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    crate::metrics::default_registry().register(
        "sealing_state_transitions",
        "Number of sector state transitions, by target state",
        metric.clone(),
    );
    metric
});

pub static SECTORS_FAILED: LazyLock<Family<StateLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    crate::metrics::default_registry().register(
        "sealing_sectors_failed",
        "Number of sectors parked in a failed state",
        metric.clone(),
    );
    metric
});

pub static PIECES_ADDED: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    crate::metrics::default_registry().register(
        "sealing_pieces_added",
        "Number of deal pieces written into sectors",
        metric.clone(),
    );
    metric
});

pub static OPEN_SECTORS: LazyLock<Gauge> = LazyLock::new(|| {
    let metric = Gauge::default();
    crate::metrics::default_registry().register(
        "sealing_open_sectors",
        "Number of sectors accepting pieces",
        metric.clone(),
    );
    metric
});

pub static STEP_DURATION: LazyLock<Family<StateLabel, Histogram>> = LazyLock::new(|| {
    let metric = Family::<StateLabel, Histogram>::new_with_constructor(|| {
        crate::metrics::default_histogram()
    });
    crate::metrics::default_registry().register(
        "sealing_step_duration_seconds",
        "Duration of sealer driven pipeline steps",
        metric.clone(),
    );
    metric
});

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet, derive_more::Constructor)]
pub struct StateLabel {
    state: &'static str,
}
