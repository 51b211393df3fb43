//! Normalizing a value the remote already stored must leave it unchanged.

use crm_core::{needs_update, normalize, FieldSpec, FieldType};
use proptest::prelude::*;
use serde_json::{json, Value};

fn assert_idempotent(value: &Value, spec: &FieldSpec) -> Result<(), TestCaseError> {
    let once = normalize(value, spec);
    let twice = normalize(&once.to_value(), spec);
    prop_assert_eq!(&once, &twice);
    prop_assert!(!needs_update(&once.to_value(), value, spec));
    Ok(())
}

proptest! {
    #[test]
    fn text_is_idempotent(s in ".{0,24}") {
        assert_idempotent(&json!(s), &FieldSpec::new(FieldType::Text))?;
    }

    #[test]
    fn integer_is_idempotent(s in "[ +\\-0-9.eEx]{0,16}") {
        assert_idempotent(&json!(s), &FieldSpec::new(FieldType::Integer))?;
    }

    #[test]
    fn integer_from_numbers_is_idempotent(n in any::<i64>()) {
        assert_idempotent(&json!(n), &FieldSpec::new(FieldType::Integer))?;
    }

    #[test]
    fn float_is_idempotent(s in "-?[0-9]{1,8}(\\.[0-9]{1,6})?[a-z]{0,3}") {
        assert_idempotent(&json!(s), &FieldSpec::new(FieldType::Float))?;
    }

    #[test]
    fn float_from_numbers_is_idempotent(x in proptest::num::f64::NORMAL) {
        assert_idempotent(&json!(x), &FieldSpec::new(FieldType::Float))?;
    }

    #[test]
    fn select_is_idempotent(s in "(red|green|blue|pink)?") {
        assert_idempotent(&json!(s), &FieldSpec::select(["red", "green", "blue"]))?;
    }

    #[test]
    fn date_is_idempotent(year in 1000u32..9000, month in 0u32..=13, day in 0u32..=33) {
        let value = json!(format!("{year:04}-{month:02}-{day:02}"));
        assert_idempotent(&value, &FieldSpec::new(FieldType::Date))?;
        assert_idempotent(&value, &FieldSpec::new(FieldType::EmptyDate))?;
    }

    #[test]
    fn datetime_is_idempotent(
        year in 1000u32..9000,
        month in 1u32..=12,
        day in 1u32..=28,
        hour in 0u32..24,
        minute in 0u32..60,
        second in 0u32..60,
    ) {
        let value = json!(format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"));
        assert_idempotent(&value, &FieldSpec::new(FieldType::DateTime))?;
        assert_idempotent(&value, &FieldSpec::new(FieldType::EmptyDateTime))?;
    }
}
