use pipeline::{
    CoordinatePassthrough, Denormalizer, Normalizer, Processor, Rows, Union, ValueDef,
};
use pretty_assertions::assert_eq;
use row::{Column, Role, Row, Value, ValueType};
use serde_json::json;

fn wide() -> Processor {
    let shape = Row::from_columns([
        Column::new("k"),
        Column::new("note").with_role(Role::Annex),
        Column::new("v1").with_type(ValueType::Integer).with_role(Role::Value),
        Column::new("v2").with_type(ValueType::Integer).with_role(Role::Value),
    ])
    .unwrap();

    Processor::new(Rows::new(
        "wide",
        shape,
        vec![
            vec!["a".into(), "first".into(), 1.into(), 10.into()],
            vec!["b".into(), "second".into(), 0.into(), 20.into()],
            vec!["c".into(), Value::Null, 3.into(), Value::Null],
        ],
    ))
}

fn drain(mut p: Processor) -> Vec<serde_json::Value> {
    std::iter::from_fn(|| p.next().unwrap().map(Row::to_json)).collect()
}

#[test]
fn test_normalizer_yields_one_row_per_value_column() {
    let values = [ValueDef::new("v1"), ValueDef::new("v2")];
    let normalizer = Normalizer::new("norm", wide(), "measure", "value", &values, false).unwrap();
    let p = Processor::new(normalizer);

    assert_eq!(
        p.shape().names().collect::<Vec<_>>(),
        vec!["k", "note", "measure", "value"]
    );
    assert_eq!(p.shape().get("value").unwrap().value_type, ValueType::Integer);

    let rows = drain(p);
    assert_eq!(rows.len(), 6);
    assert_eq!(
        rows,
        vec![
            json!({"k": "a", "note": "first", "measure": "v1", "value": 1}),
            json!({"k": "a", "note": "first", "measure": "v2", "value": 10}),
            json!({"k": "b", "note": "second", "measure": "v1", "value": 0}),
            json!({"k": "b", "note": "second", "measure": "v2", "value": 20}),
            json!({"k": "c", "note": null, "measure": "v1", "value": 3}),
            json!({"k": "c", "note": null, "measure": "v2", "value": null}),
        ]
    );
}

#[test]
fn test_normalizer_skips_empty_values() {
    let values = [
        ValueDef::new("v1").with_key("first"),
        ValueDef::new("v2").with_key("second"),
    ];
    let normalizer = Normalizer::new("norm", wide(), "measure", "value", &values, true).unwrap();

    let pairs: Vec<_> = drain(Processor::new(normalizer))
        .into_iter()
        .map(|r| (r["k"].clone(), r["measure"].clone()))
        .collect();

    assert_eq!(
        pairs,
        vec![
            (json!("a"), json!("first")),
            (json!("a"), json!("second")),
            (json!("b"), json!("second")),
            (json!("c"), json!("first")),
        ]
    );
}

#[test]
fn test_normalizer_configuration_errors() {
    let err = Normalizer::new("norm", wide(), "measure", "value", &[], false)
        .err()
        .unwrap();
    insta::assert_snapshot!(err, @"invalid configuration of norm: no value columns to normalize");

    let err = Normalizer::new("norm", wide(), "note", "value", &[ValueDef::new("v1")], false)
        .err()
        .unwrap();
    insta::assert_snapshot!(err, @"invalid configuration of norm: column note is already defined by the input");

    let err = Normalizer::new("norm", wide(), "measure", "value", &[ValueDef::new("v3")], false)
        .err()
        .unwrap();
    insta::assert_snapshot!(err, @"cannot bind input v3 of norm (did you mean v1?)");
}

#[test]
fn test_round_trip() {
    let values = vec![
        ValueDef::new("v1").with_type(ValueType::Integer),
        ValueDef::new("v2").with_type(ValueType::Integer),
    ];

    let narrow = Normalizer::new("norm", wide(), "measure", "value", &values, true).unwrap();
    let narrow = Processor::new(narrow);
    let expected: Vec<_> = {
        let values = values.clone();
        drain(Processor::new(
            Normalizer::new("norm", wide(), "measure", "value", &values, true).unwrap(),
        ))
    };

    let pivot = Denormalizer::new("denorm", narrow, "measure", "value", values.clone()).unwrap();
    let pivot = Processor::new(pivot);
    assert_eq!(
        pivot.shape().names().collect::<Vec<_>>(),
        vec!["k", "note", "v1", "v2"]
    );

    let back = Normalizer::new("renorm", pivot, "measure", "value", &values, true).unwrap();
    assert_eq!(drain(Processor::new(back)), expected);
}

#[test]
fn test_denormalizer_defaults_unmatched_columns() {
    let shape = Row::from_columns([
        Column::new("k"),
        Column::new("measure"),
        Column::new("value").with_type(ValueType::Any),
    ])
    .unwrap();
    let narrow = Processor::new(Rows::new(
        "narrow",
        shape,
        vec![
            vec!["a".into(), "qty".into(), 2.into()],
            vec!["a".into(), "price".into(), "1.5".into()],
            vec!["b".into(), "qty".into(), 4.into()],
            vec!["b".into(), "other".into(), 9.into()],
        ],
    ));
    let defs = vec![
        ValueDef::new("quantity").with_key("qty").with_type(ValueType::Integer),
        ValueDef::new("price").with_type(ValueType::Number),
        ValueDef::new("label").with_type(ValueType::Text),
    ];
    let p = Processor::new(Denormalizer::new("denorm", narrow, "measure", "value", defs).unwrap());

    assert_eq!(
        drain(p),
        vec![
            json!({"k": "a", "quantity": 2, "price": 1.5, "label": ""}),
            json!({"k": "b", "quantity": 4, "price": 0.0, "label": ""}),
        ]
    );
}

#[test]
fn test_passthrough_and_union() {
    let project = |name: &str| {
        Processor::new(CoordinatePassthrough::new(name, wide(), &["k"], &["note"]).unwrap())
    };
    let p = project("pass");
    assert_eq!(p.shape().get("note").unwrap().role, Role::Annex);

    let union = Union::new("both", vec![project("one"), project("two")]).unwrap();
    let keys: Vec<_> = drain(Processor::new(union))
        .into_iter()
        .map(|r| r["k"].clone())
        .collect();
    assert_eq!(keys, vec!["a", "b", "c", "a", "b", "c"]);

    let err = CoordinatePassthrough::new("pass", wide(), &["key"], &[])
        .err()
        .unwrap();
    insta::assert_snapshot!(err, @"cannot bind input key of pass (did you mean k?)");
}
