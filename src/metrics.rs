use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref CHECKOUTS_COMPLETED: IntCounter = IntCounter::new(
        "checkouts_completed_total",
        "Total number of successful checkouts"
    )
    .expect("metric can be created");

    pub static ref CHECKOUT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "checkout_failures_total",
            "Total number of failed checkout attempts"
        ),
        &["reason"]
    )
    .expect("metric can be created");

    pub static ref CHECKOUT_DURATION: Histogram = Histogram::with_opts(HistogramOpts::new(
        "checkout_duration_seconds",
        "Wall-clock duration of checkout attempts"
    ))
    .expect("metric can be created");

    pub static ref INVENTORY_RESERVATIONS: IntCounter = IntCounter::new(
        "inventory_reservations_total",
        "Total number of inventory reservations"
    )
    .expect("metric can be created");

    pub static ref INVENTORY_RESERVATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "inventory_reservation_failures_total",
            "Total number of failed inventory reservations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");

    pub static ref INVENTORY_RELEASES: IntCounter = IntCounter::new(
        "inventory_releases_total",
        "Total number of reservation releases"
    )
    .expect("metric can be created");

    pub static ref COUPON_REDEMPTIONS: IntCounter = IntCounter::new(
        "coupon_redemptions_total",
        "Total number of coupon redemptions"
    )
    .expect("metric can be created");

    pub static ref COUPON_REJECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "coupon_rejections_total",
            "Total number of rejected coupon validations"
        ),
        &["reason"]
    )
    .expect("metric can be created");
}

/// Registers every metric exactly once. Duplicate registration (tests
/// building several routers in-process) is ignored.
pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(CHECKOUTS_COMPLETED.clone()));
    let _ = REGISTRY.register(Box::new(CHECKOUT_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(CHECKOUT_DURATION.clone()));
    let _ = REGISTRY.register(Box::new(INVENTORY_RESERVATIONS.clone()));
    let _ = REGISTRY.register(Box::new(INVENTORY_RESERVATION_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(INVENTORY_RELEASES.clone()));
    let _ = REGISTRY.register(Box::new(COUPON_REDEMPTIONS.clone()));
    let _ = REGISTRY.register(Box::new(COUPON_REJECTIONS.clone()));
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        register_metrics();
        register_metrics();
        CHECKOUTS_COMPLETED.inc();
        let body = gather();
        assert!(body.contains("checkouts_completed_total"));
    }
}
