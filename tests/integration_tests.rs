use chrono::NaiveDate;
use earnings_extractor::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_messy_response_to_persisted_row() {
    let profile = builtin_profile("grab-com").unwrap();
    let raw = r#"Here's the JSON:
```json
{
  "id": null,
  "entity_slug": "grab-com",
  "period_date": "2024-06-30",
  "group_revenue": 653,
  "group_adjusted_ebitda": 64,
  "group_profit_loss_for_period": "(104)"
  "monthly_transacting_users": "38 million",
  "group_adjusted_ebitda_margin_percent": NULL,
  "currencies": ["USD"]
}
```"#;

    let record = process_response(raw, &profile, &NormalizeOptions::default()).unwrap();
    // Quarter snap: 2024-06-30 belongs to Q2, start 2024-04-01.
    assert_eq!(record.period_date, date(2024, 4, 1));
    assert_eq!(record.number("group_revenue"), Some(653.0));
    assert_eq!(record.number("group_profit_loss_for_period"), Some(-104.0));
    assert_eq!(record.number("monthly_transacting_users"), Some(38_000_000.0));
    assert!(record
        .metric("group_adjusted_ebitda_margin_percent")
        .unwrap()
        .is_null());

    let store = MemoryStore::new();
    let coordinator = UpsertCoordinator::new(&store);
    let ctx = UpsertContext::for_slug("grab-com");

    let first = coordinator.push(&record, &profile, &ctx).unwrap();
    assert_eq!(first.status, UpsertStatus::Inserted);

    let second = coordinator.push(&record, &profile, &ctx).unwrap();
    assert_eq!(second.status, UpsertStatus::Updated);
    assert_eq!(second.record_id, first.record_id);
    assert_eq!(store.len(), 1);

    let row = store.get("grab_metrics", "grab-com", date(2024, 4, 1)).unwrap();
    assert!(!row.contains_key("id"));
    assert_eq!(row["group_revenue"], serde_json::json!(653.0));
}

#[test]
fn test_fenced_and_unfenced_responses_agree() {
    let profile = builtin_profile("private-company").unwrap();
    let body = r#"{
  "entity_slug": "private-company",
  "period_date": "2023-01-01",
  "company_name": "Acme Pte Ltd",
  "revenue": 120.5,
  "headcount": 88
}"#;
    let fenced = format!("```json\n{}\n```", body);

    let options = NormalizeOptions::default();
    let a = process_response(body, &profile, &options).unwrap();
    let b = process_response(&fenced, &profile, &options).unwrap();
    assert_eq!(a.to_row(&profile), b.to_row(&profile));
}

#[test]
fn test_truncated_response_never_yields_corrupt_numbers() {
    let profile = builtin_profile("private-company").unwrap();
    // Cut off mid-number: repair must fail rather than guess "12".
    let raw = r#"{"entity_slug": "private-company", "period_date": "2023-01-01", "revenue": 12"#;

    let err = process_response(raw, &profile, &NormalizeOptions::default()).unwrap_err();
    assert!(matches!(err, ExtractError::MalformedResponse { .. }));
}

#[test]
fn test_statement_in_thousands_scales_to_millions() {
    let profile = builtin_profile("private-company").unwrap();
    let raw = r#"{
  "entity_slug": "private-company",
  "period_date": "2022-07-01",
  "revenue": 819,
  "profit_after_tax": "(56)"
}"#;

    let options = NormalizeOptions {
        amounts_in_thousands: true,
    };
    let record = process_response(raw, &profile, &options).unwrap();
    assert_eq!(record.number("revenue"), Some(0.819));
    // Parenthesized values are losses regardless of the thousands modifier.
    assert_eq!(record.number("profit_after_tax"), Some(-0.056));
}

#[test]
fn test_explicit_suffix_wins_over_thousands_modifier() {
    let profile = builtin_profile("private-company").unwrap();
    let raw = r#"{
  "entity_slug": "private-company",
  "period_date": "2022-07-01",
  "revenue": "1.2B"
}"#;

    let options = NormalizeOptions {
        amounts_in_thousands: true,
    };
    let record = process_response(raw, &profile, &options).unwrap();
    assert_eq!(record.number("revenue"), Some(1200.0));
}

#[test]
fn test_conversion_preserves_originals_bit_for_bit() {
    let profile = builtin_profile("private-company").unwrap();
    let mut rates = RateTable::new();
    rates.insert(Quarter::new(2023, 1), 0.7401);

    let raw = r#"{
  "entity_slug": "private-company",
  "period_date": "2023-01-01",
  "currency_code": "SGD",
  "revenue": 810.3,
  "profit_after_tax": "(56)",
  "headcount": 120
}"#;

    let output = Pipeline::new(&profile)
        .with_rates(&rates, "USD")
        .run(raw, &NormalizeOptions::default())
        .unwrap();

    let converted = match output.conversion.as_ref().unwrap() {
        ConversionOutcome::Converted(converted) => converted,
        other => panic!("expected conversion, got {:?}", other),
    };

    assert_eq!(converted.record.currency_code.as_deref(), Some("USD"));
    assert_eq!(converted.record.number("revenue"), Some(810.3 * 0.7401));
    // Counts are not money and never converted.
    assert_eq!(converted.record.number("headcount"), Some(120.0));

    // Original values survive untouched next to the converted ones.
    assert_eq!(converted.original.currency_code.as_deref(), Some("SGD"));
    assert_eq!(converted.original.metrics["revenue"], 810.3);
    assert_eq!(converted.original.metrics["profit_after_tax"], -56.0);
    assert_eq!(converted.rates_used["Q1 2023"], 0.7401);

    let json = converted.to_json(&profile);
    assert!(json.get("original_currency").is_some());
    assert!(json.get("exchange_rates_used").is_some());
}

#[test]
fn test_missing_quarter_rate_flags_without_converting() {
    let profile = builtin_profile("private-company").unwrap();
    let mut rates = RateTable::new();
    rates.insert(Quarter::new(2021, 2), 0.74);

    let raw = r#"{
  "entity_slug": "private-company",
  "period_date": "2021-08-15",
  "currency_code": "SGD",
  "revenue": 100
}"#;

    let output = Pipeline::new(&profile)
        .with_rates(&rates, "USD")
        .run(raw, &NormalizeOptions::default())
        .unwrap();

    // Q3 2021 has no rate: the record stays in SGD and is flagged.
    assert!(output.rate_unavailable());
    match output.conversion.as_ref().unwrap() {
        ConversionOutcome::RateUnavailable { quarter } => {
            assert_eq!(quarter.to_string(), "Q3 2021");
        }
        other => panic!("expected rate unavailable, got {:?}", other),
    }
    assert_eq!(output.final_record().currency_code.as_deref(), Some("SGD"));
    assert_eq!(output.final_record().number("revenue"), Some(100.0));
}

#[test]
fn test_unrecognized_currency_left_unconverted_and_flagged() {
    let profile = builtin_profile("private-company").unwrap();
    let mut rates = RateTable::new();
    rates.insert(Quarter::new(2023, 1), 0.7423);

    let raw = r#"{
  "entity_slug": "private-company",
  "period_date": "2023-01-01",
  "currency_code": "EUR",
  "revenue": 1000
}"#;

    let output = Pipeline::new(&profile)
        .with_rates(&rates, "USD")
        .run(raw, &NormalizeOptions::default())
        .unwrap();

    // The quarter rate covers one source currency; a label the indicator
    // scan cannot place must never be multiplied by it.
    assert!(output.unsupported_currency());
    assert_eq!(output.final_record().number("revenue"), Some(1000.0));
    assert_eq!(output.final_record().currency_code.as_deref(), Some("EUR"));
}

#[test]
fn test_schema_violations_are_collected_not_first_only() {
    let profile = builtin_profile("private-company").unwrap();
    let raw = r#"{
  "entity_slug": "private-company",
  "period_date": "not-a-date",
  "revenue": true,
  "made_up_field": 1
}"#;

    let err = process_response(raw, &profile, &NormalizeOptions::default()).unwrap_err();
    match err {
        ExtractError::SchemaViolation { violations, .. } => {
            assert!(violations.len() >= 3);
            assert!(violations.iter().any(|v| v.contains("period_date")));
            assert!(violations.iter().any(|v| v.contains("revenue")));
            assert!(violations.iter().any(|v| v.contains("made_up_field")));
        }
        other => panic!("expected schema violation, got {:?}", other),
    }
}

#[test]
fn test_component_sum_fills_missing_total() {
    let profile = builtin_profile("sea-group-garena").unwrap();
    let raw = r#"{
  "entity_slug": "sea-group-garena",
  "period_date": "2023-04-01",
  "group_total_revenue": null,
  "garena_revenue": 529.4,
  "shopee_revenue": 2332.0,
  "seamoney_revenue": 444.5
}"#;

    let record = process_response(raw, &profile, &NormalizeOptions::default()).unwrap();
    let total = record.number("group_total_revenue").unwrap();
    assert!((total - 3305.9).abs() < 1e-9);
}

#[test]
fn test_explicit_total_wins_over_component_sum() {
    let profile = builtin_profile("sea-group-garena").unwrap();
    let raw = r#"{
  "entity_slug": "sea-group-garena",
  "period_date": "2023-04-01",
  "group_total_revenue": 3310.0,
  "garena_revenue": 529.4,
  "shopee_revenue": 2332.0,
  "seamoney_revenue": 444.5
}"#;

    let record = process_response(raw, &profile, &NormalizeOptions::default()).unwrap();
    assert_eq!(record.number("group_total_revenue"), Some(3310.0));
}

#[test]
fn test_normalization_is_idempotent() {
    let profile = builtin_profile("grab-com").unwrap();
    let raw = r#"{
  "entity_slug": "grab-com",
  "period_date": "2024-04-01",
  "group_revenue": "1.2 billion",
  "group_profit_loss_for_period": "56 (loss)"
}"#;

    let mut record = process_response(raw, &profile, &NormalizeOptions::default()).unwrap();
    let first_pass = record.to_row(&profile);

    normalize(&mut record, &profile, &NormalizeOptions::default()).unwrap();
    assert_eq!(record.to_row(&profile), first_pass);
    assert_eq!(record.number("group_revenue"), Some(1200.0));
    assert_eq!(record.number("group_profit_loss_for_period"), Some(-56.0));
}

#[test]
fn test_slug_mismatch_never_reaches_the_store() {
    let profile = builtin_profile("alibaba-group").unwrap();
    let raw = r#"{
  "entity_slug": "alibaba-group",
  "period_date": "2024-01-01",
  "revenue": 36669
}"#;

    let record = process_response(raw, &profile, &NormalizeOptions::default()).unwrap();

    let store = MemoryStore::new();
    let coordinator = UpsertCoordinator::new(&store);
    let outcome = coordinator
        .push(&record, &profile, &UpsertContext::for_slug("grab-com"))
        .unwrap();
    assert_eq!(outcome.status, UpsertStatus::Rejected);
    assert!(store.is_empty());
}
