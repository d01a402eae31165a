mod common;

use chrono::{Duration, NaiveDate};
use common::{build_analyzer, raw_event, test_config, utc, ScriptedEvents, StaticMetadata};
use linode_billing::{BillingAnalyzer, BillingError, CapPolicy, Clock, ManualClock};
use std::sync::Arc;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

async fn month_total(analyzer: &BillingAnalyzer) -> f64 {
    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    days.iter().map(|d| d.total_cost).sum()
}

#[tokio::test]
async fn test_full_month_nanode_costs_its_monthly_cap() {
    let source =
        ScriptedEvents::new(vec![raw_event(1, 100, utc(2025, 8, 20, 0, 0), "linode_boot")]);
    let clock = Arc::new(ManualClock::new(utc(2025, 10, 2, 0, 0)));
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(100, "g6-nanode-1")]),
        clock,
        &test_config(),
        None,
    );

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert_eq!(days.len(), 30);
    let total: f64 = days.iter().map(|d| d.total_cost).sum();
    let hours: f64 = days.iter().map(|d| d.instance_hours()).sum();
    assert!(close(total, 5.0), "total was {}", total);
    assert!(close(hours, 720.0));
}

#[tokio::test]
async fn test_cross_month_session_is_split_between_periods() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 200, utc(2025, 8, 30, 20, 0), "linode_boot"),
        raw_event(2, 200, utc(2025, 9, 1, 8, 0), "linode_shutdown"),
    ]);
    let clock = Arc::new(ManualClock::new(utc(2025, 9, 15, 0, 0)));
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(200, "g6-standard-1")]),
        clock,
        &test_config(),
        None,
    );

    let august = analyzer.get_daily_costs(2025, 8, false).await.unwrap();
    let september = analyzer.get_daily_costs(2025, 9, false).await.unwrap();

    let aug_hours: f64 = august.iter().map(|d| d.instance_hours()).sum();
    let sep_hours: f64 = september.iter().map(|d| d.instance_hours()).sum();
    assert!(close(aug_hours, 28.0), "august hours were {}", aug_hours);
    assert!(close(sep_hours, 8.0), "september hours were {}", sep_hours);

    let aug_cost: f64 = august.iter().map(|d| d.total_cost).sum();
    let sep_cost: f64 = september.iter().map(|d| d.total_cost).sum();
    assert!(close(aug_cost, 0.42), "august cost was {}", aug_cost);
    assert!(close(sep_cost, 0.12), "september cost was {}", sep_cost);

    let aug_30 = &august[29];
    let aug_31 = &august[30];
    assert_eq!(aug_30.date, NaiveDate::from_ymd_opt(2025, 8, 30).unwrap());
    assert!(close(aug_30.instance_hours(), 4.0));
    assert_eq!(aug_31.date, NaiveDate::from_ymd_opt(2025, 8, 31).unwrap());
    assert!(close(aug_31.instance_hours(), 24.0));

    let sep_1 = &september[0];
    assert_eq!(sep_1.date, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
    assert!(close(sep_1.instance_hours(), 8.0));
    assert!(september[1..].iter().all(|d| close(d.instance_hours(), 0.0)));
}

#[tokio::test]
async fn test_storage_fee_is_spread_over_the_month() {
    let mut config = test_config();
    config.billing.object_storage_enabled = true;
    let analyzer = build_analyzer(
        ScriptedEvents::new(Vec::new()),
        StaticMetadata::with(&[]),
        Arc::new(ManualClock::new(utc(2025, 10, 1, 0, 0))),
        &config,
        None,
    );

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert_eq!(days.len(), 30);
    for day in &days {
        assert!(close(day.storage_cost, 5.0 / 30.0));
        assert_eq!(day.resource_cost, 0.0);
    }
    let total: f64 = days.iter().map(|d| d.storage_cost).sum();
    assert!(close(total, 5.0));
}

#[tokio::test]
async fn test_boot_only_instance_accrues_until_now() {
    let source =
        ScriptedEvents::new(vec![raw_event(1, 300, utc(2025, 9, 10, 0, 0), "linode_boot")]);
    let clock = Arc::new(ManualClock::new(utc(2025, 9, 10, 2, 0)));
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(300, "g6-standard-1")]),
        clock.clone(),
        &test_config(),
        None,
    );

    let sessions = analyzer.get_sessions(false).await.unwrap();
    let session = &sessions[&300][0];
    assert!(session.is_open);
    assert_eq!(session.end_time, None);
    assert!(close(session.duration_hours(clock.now()), 2.0));

    let early = month_total(&analyzer).await;
    clock.advance(Duration::hours(3));
    let later = month_total(&analyzer).await;

    assert!(close(early, 2.0 * 0.015));
    assert!(close(later, 5.0 * 0.015));
}

#[tokio::test]
async fn test_empty_account_is_zero_filled() {
    let analyzer = build_analyzer(
        ScriptedEvents::new(Vec::new()),
        StaticMetadata::with(&[]),
        Arc::new(ManualClock::new(utc(2024, 2, 10, 0, 0))),
        &test_config(),
        None,
    );

    let days = analyzer.get_daily_costs(2024, 2, false).await.unwrap();
    assert_eq!(days.len(), 29);
    assert!(days.windows(2).all(|w| w[0].date < w[1].date));
    assert!(days.iter().all(|d| d.total_cost == 0.0));
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 1, utc(2025, 9, 1, 3, 0), "linode_boot"),
        raw_event(2, 2, utc(2025, 9, 2, 4, 0), "linode_create"),
        raw_event(3, 1, utc(2025, 9, 4, 5, 30), "linode_shutdown"),
        raw_event(4, 2, utc(2025, 9, 6, 0, 0), "linode_resize"),
    ]);
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(1, "g6-standard-2"), (2, "g6-dedicated-4")]),
        Arc::new(ManualClock::new(utc(2025, 9, 12, 0, 0))),
        &test_config(),
        None,
    );

    let a = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    let b = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_deleted_instance_uses_default_rate_class() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 400, utc(2025, 9, 1, 0, 0), "linode_create"),
        raw_event(2, 400, utc(2025, 9, 1, 10, 0), "linode_delete"),
    ]);
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[]),
        Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0))),
        &test_config(),
        None,
    );

    let sessions = analyzer.get_sessions(false).await.unwrap();
    assert_eq!(sessions[&400][0].rate_class_at_start, "g6-standard-4");

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(close(days[0].total_cost, 10.0 * 0.06));
}

#[tokio::test]
async fn test_rate_classes_are_reused_until_the_ttl_expires() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 600, utc(2025, 9, 1, 0, 0), "linode_boot"),
        raw_event(2, 601, utc(2025, 9, 1, 0, 0), "linode_boot"),
    ]);
    let metadata = StaticMetadata::with(&[(600, "g6-nanode-1"), (601, "g6-standard-1")]);
    let clock = Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0)));
    let analyzer = build_analyzer(source, metadata.clone(), clock.clone(), &test_config(), None);

    analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    analyzer.get_sessions(false).await.unwrap();
    assert_eq!(metadata.calls(), 2);

    clock.advance(Duration::minutes(61));
    analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert_eq!(metadata.calls(), 4);

    analyzer.get_daily_costs(2025, 9, true).await.unwrap();
    assert_eq!(metadata.calls(), 6);
}

#[tokio::test]
async fn test_plan_change_is_seen_after_the_ttl() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 605, utc(2025, 9, 1, 0, 0), "linode_boot"),
        raw_event(2, 605, utc(2025, 9, 1, 10, 0), "linode_shutdown"),
    ]);
    let metadata = StaticMetadata::with(&[(605, "g6-nanode-1")]);
    let clock = Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0)));
    let analyzer = build_analyzer(source, metadata.clone(), clock.clone(), &test_config(), None);

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(close(days[0].total_cost, 10.0 * 0.0075));

    metadata.set_rate_class(605, "g6-standard-1");
    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(close(days[0].total_cost, 10.0 * 0.0075));

    clock.advance(Duration::minutes(61));
    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(close(days[0].total_cost, 10.0 * 0.015));
}

#[tokio::test]
async fn test_failed_rate_class_lookup_is_retried() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 610, utc(2025, 9, 1, 0, 0), "linode_boot"),
        raw_event(2, 610, utc(2025, 9, 1, 10, 0), "linode_shutdown"),
    ]);
    let metadata = StaticMetadata::with(&[(610, "g6-nanode-1")]);
    metadata.set_failing(true);
    let analyzer = build_analyzer(
        source,
        metadata.clone(),
        Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0))),
        &test_config(),
        None,
    );

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(close(days[0].total_cost, 10.0 * 0.06));

    metadata.set_failing(false);
    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(close(days[0].total_cost, 10.0 * 0.0075));
    assert_eq!(metadata.calls(), 2);
}

#[tokio::test]
async fn test_rate_class_lookups_are_bounded() {
    let events = (0..20)
        .map(|n| raw_event(n + 1, 700 + n, utc(2025, 9, 1, 0, 0), "linode_boot"))
        .collect();
    let classes: Vec<(u64, &str)> = (0..20).map(|n| (700 + n, "g6-nanode-1")).collect();
    let metadata = StaticMetadata::with(&classes);
    metadata.set_delay(std::time::Duration::from_millis(20));
    let analyzer = build_analyzer(
        ScriptedEvents::new(events),
        metadata.clone(),
        Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0))),
        &test_config(),
        None,
    );

    let sessions = analyzer.get_sessions(false).await.unwrap();
    assert_eq!(sessions.len(), 20);
    assert_eq!(metadata.calls(), 20);
    assert!(metadata.max_in_flight() <= 8, "{} lookups overlapped", metadata.max_in_flight());
    assert!(metadata.max_in_flight() > 1);
}

#[tokio::test]
async fn test_unknown_rate_class_is_surfaced() {
    let source = ScriptedEvents::new(vec![raw_event(1, 500, utc(2025, 9, 1, 0, 0), "linode_boot")]);
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(500, "g99-imaginary-1")]),
        Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0))),
        &test_config(),
        None,
    );

    let err = analyzer.get_daily_costs(2025, 9, false).await.unwrap_err();
    assert!(matches!(err, BillingError::UnknownRateClass(ref class) if class == "g99-imaginary-1"));
}

#[tokio::test]
async fn test_unknown_rate_class_outside_period_is_ignored() {
    let source = ScriptedEvents::new(vec![
        raw_event(1, 500, utc(2025, 7, 1, 0, 0), "linode_boot"),
        raw_event(2, 500, utc(2025, 7, 2, 0, 0), "linode_shutdown"),
    ]);
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(500, "g99-imaginary-1")]),
        Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0))),
        &test_config(),
        None,
    );

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    assert!(days.iter().all(|d| d.total_cost == 0.0));
}

#[tokio::test]
async fn test_invalid_period_is_rejected_before_fetching() {
    let source = ScriptedEvents::new(Vec::new());
    let analyzer = build_analyzer(
        source.clone(),
        StaticMetadata::with(&[]),
        Arc::new(ManualClock::new(utc(2025, 9, 5, 0, 0))),
        &test_config(),
        None,
    );

    let err = analyzer.get_daily_costs(2025, 13, false).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidPeriod { year: 2025, month: 13 }));
    let err = analyzer.get_monthly_summary(2025, 0, false).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidPeriod { .. }));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_outage_after_first_load_serves_cached_costs() {
    let source = ScriptedEvents::new(vec![raw_event(1, 600, utc(2025, 9, 1, 0, 0), "linode_boot")]);
    let clock = Arc::new(ManualClock::new(utc(2025, 9, 3, 0, 0)));
    let analyzer = build_analyzer(
        source.clone(),
        StaticMetadata::with(&[(600, "g6-nanode-1")]),
        clock.clone(),
        &test_config(),
        None,
    );

    analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    source.set_failing(true);
    clock.advance(Duration::hours(2));

    let days = analyzer.get_daily_costs(2025, 9, false).await.unwrap();
    let hours: f64 = days.iter().map(|d| d.instance_hours()).sum();
    assert!(close(hours, 50.0));
    assert_eq!(analyzer.get_cache_stats().await.degraded_refreshes, 1);
}

#[tokio::test]
async fn test_cap_policy_changes_multi_session_totals() {
    let events = vec![
        raw_event(1, 700, utc(2025, 9, 1, 0, 0), "linode_boot"),
        raw_event(2, 700, utc(2025, 9, 20, 0, 0), "linode_shutdown"),
        raw_event(3, 700, utc(2025, 9, 20, 1, 0), "linode_boot"),
    ];
    let now = utc(2025, 10, 1, 0, 0);

    let mut per_resource = test_config();
    per_resource.billing.cap_policy = CapPolicy::PerResourceMonth;

    let per_session_analyzer = build_analyzer(
        ScriptedEvents::new(events.clone()),
        StaticMetadata::with(&[(700, "g6-nanode-1")]),
        Arc::new(ManualClock::new(now)),
        &test_config(),
        None,
    );
    let per_resource_analyzer = build_analyzer(
        ScriptedEvents::new(events),
        StaticMetadata::with(&[(700, "g6-nanode-1")]),
        Arc::new(ManualClock::new(now)),
        &per_resource,
        None,
    );
    let session_total = month_total(&per_session_analyzer).await;
    let resource_total = month_total(&per_resource_analyzer).await;

    assert!(close(session_total, 3.42 + 1.9725));
    assert!(close(resource_total, 5.0));
}

#[tokio::test]
async fn test_monthly_summary_projects_linearly() {
    let mut config = test_config();
    config.billing.object_storage_enabled = true;
    let source = ScriptedEvents::new(vec![raw_event(1, 800, utc(2025, 9, 1, 0, 0), "linode_boot")]);
    let analyzer = build_analyzer(
        source,
        StaticMetadata::with(&[(800, "g6-standard-1")]),
        Arc::new(ManualClock::new(utc(2025, 9, 10, 12, 0))),
        &config,
        None,
    );

    let summary = analyzer.get_monthly_summary(2025, 9, false).await.unwrap();
    assert_eq!(summary.days_in_month, 30);
    assert_eq!(summary.days_elapsed, 10);
    assert_eq!(summary.days_remaining, 20);

    // 9.5 days of g6-standard-1 plus ten days of storage.
    let expected_mtd = 228.0 * 0.015 + 10.0 * (5.0 / 30.0);
    assert!(close(summary.month_to_date_cost, expected_mtd));
    assert!(close(summary.storage_cost, 10.0 * (5.0 / 30.0)));
    assert!(close(summary.daily_average, expected_mtd / 10.0));
    assert!(close(summary.projected_monthly_cost, expected_mtd * 3.0));
}
