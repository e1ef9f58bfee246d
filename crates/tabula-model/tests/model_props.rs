use proptest::prelude::*;
use std::collections::HashSet;
use tabula_model::{assign_slugs, recognize_dates, Frame, Schema, Value};

fn arb_label() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 _.-]{0,12}"
}

fn arb_cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (1990i32..2030, 1u32..=12, 1u32..=28)
            .prop_map(|(y, m, d)| Value::from(format!("{y:04}-{m:02}-{d:02}"))),
        "[a-z]{1,6}".prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn slugs_are_unique_and_storage_safe(labels in prop::collection::vec(arb_label(), 0..12)) {
        let slugs = assign_slugs(labels.iter().map(String::as_str), &HashSet::new());
        prop_assert_eq!(slugs.len(), labels.len());

        let distinct: HashSet<&String> = slugs.iter().collect();
        prop_assert_eq!(distinct.len(), slugs.len());

        for slug in &slugs {
            prop_assert!(!slug.is_empty());
            prop_assert!(!slug.starts_with(|c: char| c.is_ascii_digit()));
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
    }

    #[test]
    fn schema_labels_round_trip_through_slugs(labels in prop::collection::hash_set(arb_label(), 1..10)) {
        let labels: Vec<String> = labels.into_iter().collect();
        let frame = Frame::new(labels.clone()).unwrap();
        let schema = Schema::build(&frame, 100);

        let mapping = schema.labels_to_slugs();
        prop_assert_eq!(mapping.len(), labels.len());
        for label in &labels {
            let slug = &mapping[label];
            prop_assert_eq!(schema.slug_to_label(slug), Some(label.as_str()));
        }
    }

    #[test]
    fn date_recognition_is_idempotent(cells in prop::collection::vec(arb_cell(), 1..20)) {
        let mut frame = Frame::new(vec!["col"]).unwrap();
        for cell in cells {
            frame.push_row(vec![cell]).unwrap();
        }

        let once = recognize_dates(&frame);
        let twice = recognize_dates(&once);
        prop_assert_eq!(once, twice);
    }
}
