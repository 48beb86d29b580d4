use credit_etl::{
    build_features, feature_schema, ColumnSpec, ColumnType, Frame, Value, FEATURE_COLUMN_ORDER,
};

fn applications(rows: &[(i64, Value, Value, Value, Value)]) -> Frame {
    let mut frame = Frame::new(vec![
        ColumnSpec::new("client_id", ColumnType::Integer),
        ColumnSpec::new("income_total", ColumnType::Real),
        ColumnSpec::new("credit_amount", ColumnType::Real),
        ColumnSpec::new("annuity_amount", ColumnType::Real),
        ColumnSpec::new("target", ColumnType::Integer),
    ]);
    for (client_id, income, credit, annuity, target) in rows {
        frame
            .push_row(vec![
                Value::Int(*client_id),
                income.clone(),
                credit.clone(),
                annuity.clone(),
                target.clone(),
            ])
            .expect("application row matches schema");
    }
    frame
}

fn previous_applications(rows: &[(i64, i64, Value, Value, Value)]) -> Frame {
    let mut frame = Frame::new(vec![
        ColumnSpec::new("prev_id", ColumnType::Integer),
        ColumnSpec::new("client_id", ColumnType::Integer),
        ColumnSpec::new("application_amount", ColumnType::Real),
        ColumnSpec::new("credit_amount", ColumnType::Real),
        ColumnSpec::new("contract_status", ColumnType::Text),
    ]);
    for (prev_id, client_id, application, credit, status) in rows {
        frame
            .push_row(vec![
                Value::Int(*prev_id),
                Value::Int(*client_id),
                application.clone(),
                credit.clone(),
                status.clone(),
            ])
            .expect("previous-application row matches schema");
    }
    frame
}

fn installments(rows: &[(i64, f64, f64)]) -> Frame {
    let mut frame = Frame::new(vec![
        ColumnSpec::new("prev_id", ColumnType::Integer),
        ColumnSpec::new("days_instalment", ColumnType::Real),
        ColumnSpec::new("days_entry_payment", ColumnType::Real),
    ]);
    for &(prev_id, due, paid) in rows {
        frame
            .push_row(vec![
                Value::Int(prev_id),
                Value::Real(due),
                Value::Real(paid),
            ])
            .expect("installment row matches schema");
    }
    frame
}

fn empty_previous() -> Frame {
    previous_applications(&[])
}

fn empty_installments() -> Frame {
    installments(&[])
}

fn cell(frame: &Frame, row: usize, name: &str) -> Value {
    let idx = frame.column_index(name).expect("column must exist");
    frame.cell(row, idx).expect("cell must exist").clone()
}

fn text(raw: &str) -> Value {
    Value::Text(raw.to_string())
}

#[test]
fn output_columns_follow_the_fixed_order() {
    let app = applications(&[(
        1,
        Value::Real(100_000.0),
        Value::Real(50_000.0),
        Value::Real(5_000.0),
        Value::Int(0),
    )]);
    let out = build_features(&app, &empty_previous(), &empty_installments());

    let names: Vec<&str> = out.columns().iter().map(|spec| spec.name.as_str()).collect();
    assert_eq!(names, FEATURE_COLUMN_ORDER.to_vec());
}

#[test]
fn client_with_no_previous_applications_gets_defaults() {
    let app = applications(&[(
        1,
        Value::Real(100_000.0),
        Value::Real(50_000.0),
        Value::Real(5_000.0),
        Value::Int(0),
    )]);
    let out = build_features(&app, &empty_previous(), &empty_installments());

    assert_eq!(out.len(), 1);
    assert_eq!(cell(&out, 0, "client_id"), Value::Int(1));
    assert_eq!(cell(&out, 0, "debt_to_income_ratio"), Value::Real(0.5));
    assert_eq!(cell(&out, 0, "prev_count"), Value::Int(0));
    assert_eq!(cell(&out, 0, "prev_approved"), Value::Int(0));
    assert_eq!(cell(&out, 0, "prev_rejected"), Value::Int(0));
    assert_eq!(cell(&out, 0, "avg_utilization"), Value::Real(0.0));
    assert_eq!(cell(&out, 0, "avg_late_ratio"), Value::Real(0.0));
}

#[test]
fn zero_income_yields_missing_ratio_not_infinity() {
    let app = applications(&[(
        1,
        Value::Real(0.0),
        Value::Real(50_000.0),
        Value::Null,
        Value::Null,
    )]);
    let out = build_features(&app, &empty_previous(), &empty_installments());

    assert_eq!(cell(&out, 0, "debt_to_income_ratio"), Value::Null);
}

#[test]
fn unparseable_income_degrades_to_missing_per_cell() {
    let app = applications(&[
        (
            1,
            text("not-a-number"),
            Value::Real(50_000.0),
            Value::Null,
            Value::Null,
        ),
        (
            2,
            text("200000"),
            Value::Real(50_000.0),
            Value::Null,
            Value::Null,
        ),
    ]);
    let out = build_features(&app, &empty_previous(), &empty_installments());

    assert_eq!(cell(&out, 0, "income_total"), Value::Null);
    assert_eq!(cell(&out, 0, "debt_to_income_ratio"), Value::Null);
    assert_eq!(cell(&out, 1, "income_total"), Value::Real(200_000.0));
    assert_eq!(cell(&out, 1, "debt_to_income_ratio"), Value::Real(0.25));
}

#[test]
fn every_application_appears_exactly_once_in_input_order() {
    let app = applications(&[
        (3, Value::Real(1.0), Value::Real(1.0), Value::Null, Value::Null),
        (1, Value::Real(1.0), Value::Real(1.0), Value::Null, Value::Null),
        (2, Value::Real(1.0), Value::Real(1.0), Value::Null, Value::Null),
    ]);
    let prev = previous_applications(&[(
        10,
        2,
        Value::Real(100.0),
        Value::Real(50.0),
        text("Approved"),
    )]);
    let out = build_features(&app, &prev, &empty_installments());

    assert_eq!(out.len(), 3);
    assert_eq!(cell(&out, 0, "client_id"), Value::Int(3));
    assert_eq!(cell(&out, 1, "client_id"), Value::Int(1));
    assert_eq!(cell(&out, 2, "client_id"), Value::Int(2));
    assert_eq!(cell(&out, 2, "prev_count"), Value::Int(1));
    assert_eq!(cell(&out, 0, "prev_count"), Value::Int(0));
}

#[test]
fn full_three_relation_scenario_rolls_up_lateness_and_statuses() {
    let app = applications(&[(
        7,
        Value::Real(200_000.0),
        Value::Real(100_000.0),
        Value::Real(12_000.0),
        Value::Int(1),
    )]);
    let prev = previous_applications(&[
        (10, 7, Value::Real(100.0), Value::Real(50.0), text("Approved")),
        (11, 7, Value::Real(200.0), Value::Real(100.0), text("Refused")),
    ]);
    // prev 10 has one late installment out of two; prev 11 has none recorded.
    let inst = installments(&[(10, 5.0, 10.0), (10, 5.0, 3.0)]);

    let out = build_features(&app, &prev, &inst);

    assert_eq!(out.len(), 1);
    assert_eq!(cell(&out, 0, "target"), Value::Int(1));
    assert_eq!(cell(&out, 0, "debt_to_income_ratio"), Value::Real(0.5));
    assert_eq!(cell(&out, 0, "prev_count"), Value::Int(2));
    assert_eq!(cell(&out, 0, "prev_approved"), Value::Int(1));
    assert_eq!(cell(&out, 0, "prev_rejected"), Value::Int(1));
    assert_eq!(cell(&out, 0, "avg_utilization"), Value::Real(0.5));
    // Only prev 10 carries a late ratio; the mean ignores the missing one.
    assert_eq!(cell(&out, 0, "avg_late_ratio"), Value::Real(0.5));
}

#[test]
fn missing_contract_status_counts_as_unknown_not_dropped() {
    let app = applications(&[(
        5,
        Value::Real(1.0),
        Value::Real(1.0),
        Value::Null,
        Value::Null,
    )]);
    let prev = previous_applications(&[
        (20, 5, Value::Real(100.0), Value::Real(50.0), Value::Null),
        (21, 5, Value::Real(100.0), Value::Real(50.0), text("Approved")),
    ]);
    let out = build_features(&app, &prev, &empty_installments());

    // The null-status row lands in the UNKNOWN bucket: still counted in
    // prev_count, in neither approved nor rejected.
    assert_eq!(cell(&out, 0, "prev_count"), Value::Int(2));
    assert_eq!(cell(&out, 0, "prev_approved"), Value::Int(1));
    assert_eq!(cell(&out, 0, "prev_rejected"), Value::Int(0));
}

#[test]
fn transform_is_idempotent() {
    let app = applications(&[
        (
            1,
            Value::Real(100_000.0),
            Value::Real(50_000.0),
            Value::Real(5_000.0),
            Value::Int(0),
        ),
        (2, Value::Real(0.0), Value::Real(10_000.0), Value::Null, Value::Null),
    ]);
    let prev = previous_applications(&[(
        10,
        1,
        Value::Real(100.0),
        Value::Real(80.0),
        text("Approved"),
    )]);
    let inst = installments(&[(10, 5.0, 6.0)]);

    let out_a = build_features(&app, &prev, &inst);
    let out_b = build_features(&app, &prev, &inst);
    assert_eq!(out_a, out_b);
}

#[test]
fn absent_optional_columns_shrink_the_output_instead_of_failing() {
    let mut app = Frame::new(vec![
        ColumnSpec::new("client_id", ColumnType::Integer),
        ColumnSpec::new("credit_amount", ColumnType::Real),
    ]);
    app.push_row(vec![Value::Int(1), Value::Real(50_000.0)])
        .expect("row matches schema");

    let out = build_features(&app, &empty_previous(), &empty_installments());

    assert_eq!(out.len(), 1);
    assert!(out.column_index("target").is_none());
    assert!(out.column_index("income_total").is_none());
    // No income column means the ratio is present but undefined everywhere.
    assert_eq!(cell(&out, 0, "debt_to_income_ratio"), Value::Null);
    assert_eq!(cell(&out, 0, "prev_count"), Value::Int(0));
}

#[test]
fn declared_schema_matches_full_output_layout() {
    let schema = feature_schema();
    let app = applications(&[(
        1,
        Value::Real(100_000.0),
        Value::Real(50_000.0),
        Value::Real(5_000.0),
        Value::Int(0),
    )]);
    let out = build_features(&app, &empty_previous(), &empty_installments());

    let declared: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    let produced: Vec<&str> = out.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(declared, produced);
}
