use std::sync::Arc;

use pretty_assertions::assert_eq;
use tabula_core::{CalcError, Config, ErrorKind, Tabula};
use tabula_model::{CalculationState, DatasetId, Frame, SimpleType, Value};
use tabula_storage::{FindQuery, InlineJobQueue, MemoryStore, Storage, Store};

fn tabula(store: Arc<dyn Store>) -> Tabula {
    Tabula::new(store, Arc::new(InlineJobQueue), Config::default())
}

fn sales_frame(rows: &[(i64, &str)]) -> Frame {
    let mut frame = Frame::new(vec!["price", "region"]).unwrap();
    for (price, region) in rows {
        frame
            .push_row(vec![Value::from(*price), Value::from(*region)])
            .unwrap();
    }
    frame
}

fn sales(store: Arc<dyn Store>) -> (Tabula, DatasetId) {
    let tabula = tabula(store);
    let dataset = tabula.datasets.create().unwrap();
    tabula
        .datasets
        .save(
            &dataset.id,
            sales_frame(&[(10, "east"), (20, "west"), (30, "east"), (40, "west")]),
        )
        .unwrap();
    (tabula, dataset.id)
}

fn column(tabula: &Tabula, id: &DatasetId, key: &str) -> Vec<Value> {
    tabula
        .datasets
        .find(id, &FindQuery::default())
        .unwrap()
        .into_iter()
        .map(|mut row| row.remove(key).unwrap_or(Value::Null))
        .collect()
}

fn numbers(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

fn backends() -> Vec<Arc<dyn Store>> {
    vec![
        Arc::new(MemoryStore::new()),
        Arc::new(Storage::open_in_memory().expect("open storage")),
    ]
}

#[test]
fn ungrouped_calculation_is_materialized_per_row() {
    for store in backends() {
        let (tabula, id) = sales(store);
        let calculation = tabula
            .calculations
            .create(&id, "price*2", "doubled", None)
            .unwrap();
        assert_eq!(calculation.state, CalculationState::Ready);
        assert_eq!(calculation.column, "doubled");
        assert_eq!(column(&tabula, &id, "doubled"), numbers(&[20, 40, 60, 80]));

        let dataset = tabula.datasets.get(&id).unwrap();
        assert_eq!(dataset.column_count, 3);
        assert_eq!(
            dataset.schema.get("doubled").map(|c| c.simpletype),
            Some(SimpleType::Numeric)
        );
    }
}

#[test]
fn grouped_calculation_is_broadcast() {
    for store in backends() {
        let (tabula, id) = sales(store);
        tabula
            .calculations
            .create(&id, "sum(price)", "region_total", Some("region"))
            .unwrap();
        assert_eq!(
            column(&tabula, &id, "region_total"),
            numbers(&[40, 60, 40, 60])
        );
    }
}

#[test]
fn rejected_calculations_leave_no_column() {
    let (tabula, id) = sales(Arc::new(MemoryStore::new()));

    let err = tabula
        .calculations
        .create(&id, "unknown_col + 1", "broken", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.to_string().contains("unknown_col"));

    let err = tabula
        .calculations
        .create(&id, "region * 2", "typed", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);

    let err = tabula
        .calculations
        .create(&id, "sum(price)", "by_price", Some("price"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Group);

    let err = tabula
        .calculations
        .create(&id, "sum(price)", "by_nothing", Some("nope"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Group);

    let err = tabula
        .calculations
        .create(&id, "looped + 1", "looped", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cycle);

    let dataset = tabula.datasets.get(&id).unwrap();
    assert_eq!(dataset.schema.len(), 2);
    assert!(tabula.calculations.show(&id).unwrap().is_empty());
    let rows = tabula.datasets.find(&id, &FindQuery::default()).unwrap();
    assert!(rows.iter().all(|r| r.len() == 2));
}

#[test]
fn names_are_unique_per_group() {
    let (tabula, id) = sales(Arc::new(MemoryStore::new()));
    tabula
        .calculations
        .create(&id, "sum(price)", "total", None)
        .unwrap();

    let err = tabula
        .calculations
        .create(&id, "max(price)", "total", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);

    let grouped = tabula
        .calculations
        .create(&id, "sum(price)", "total", Some("region"))
        .unwrap();
    assert_eq!(grouped.column, "total_1");
    assert_eq!(column(&tabula, &id, "total"), numbers(&[100, 100, 100, 100]));
    assert_eq!(column(&tabula, &id, "total_1"), numbers(&[40, 60, 40, 60]));

    let found = tabula
        .calculations
        .find_one(&id, "total", Some("region"))
        .unwrap()
        .expect("grouped calculation");
    assert_eq!(found.group.as_deref(), Some("region"));
}

#[test]
fn delete_is_blocked_by_dependents() {
    for store in backends() {
        let (tabula, id) = sales(store);
        tabula.calculations.create(&id, "price*2", "a", None).unwrap();
        tabula.calculations.create(&id, "a+1", "b", None).unwrap();
        assert_eq!(column(&tabula, &id, "b"), numbers(&[21, 41, 61, 81]));

        let err = tabula.calculations.delete(&id, "a", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dependency);
        assert!(matches!(
            &err,
            CalcError::Dependency { name, dependents } if name == "a" && dependents == &["b"]
        ));
        assert_eq!(tabula.datasets.get(&id).unwrap().schema.len(), 4);

        tabula.calculations.delete(&id, "b", None).unwrap();
        tabula.calculations.delete(&id, "a", None).unwrap();

        let dataset = tabula.datasets.get(&id).unwrap();
        assert_eq!(dataset.schema.keys().collect::<Vec<_>>(), vec!["price", "region"]);
        assert_eq!(dataset.column_count, 2);
        let rows = tabula.datasets.find(&id, &FindQuery::default()).unwrap();
        assert!(rows.iter().all(|r| !r.contains_key("a") && !r.contains_key("b")));

        let err = tabula.calculations.delete(&id, "a", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[test]
fn show_lists_calculations_in_creation_order() {
    let (tabula, id) = sales(Arc::new(MemoryStore::new()));
    tabula.calculations.create(&id, "price*2", "doubled", None).unwrap();
    tabula
        .calculations
        .create(&id, "mean(price)", "average", Some("region"))
        .unwrap();

    let names: Vec<String> = tabula
        .calculations
        .show(&id)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["doubled", "average"]);

    let missing = tabula.calculations.show(&DatasetId::from("missing")).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[test]
fn update_returns_exactly_the_new_rows() {
    for store in backends() {
        let (tabula, id) = sales(store);
        tabula
            .datasets
            .update(&id, sales_frame(&[(1, "north"), (2, "south")]))
            .unwrap();

        let rows = tabula.datasets.find(&id, &FindQuery::default()).unwrap();
        let expected = sales_frame(&[(1, "north"), (2, "south")]).to_records();
        assert_eq!(rows, expected);
    }
}

#[test]
fn update_recomputes_calculations_in_dependency_order() {
    for store in backends() {
        let (tabula, id) = sales(store);
        tabula.calculations.create(&id, "price*2", "a", None).unwrap();
        tabula.calculations.create(&id, "a+1", "b", None).unwrap();
        tabula
            .calculations
            .create(&id, "sum(price)", "region_total", Some("region"))
            .unwrap();

        let dataset = tabula
            .datasets
            .update(&id, sales_frame(&[(5, "east"), (7, "east"), (1, "west")]))
            .unwrap();
        assert_eq!(dataset.row_count, 3);

        assert_eq!(column(&tabula, &id, "a"), numbers(&[10, 14, 2]));
        assert_eq!(column(&tabula, &id, "b"), numbers(&[11, 15, 3]));
        assert_eq!(column(&tabula, &id, "region_total"), numbers(&[12, 12, 1]));
        assert!(tabula
            .calculations
            .show(&id)
            .unwrap()
            .iter()
            .all(|c| c.state == CalculationState::Ready));
    }
}

#[test]
fn purge_removes_replaced_generations() {
    let memory = Arc::new(MemoryStore::new());
    let (tabula, id) = sales(memory.clone());
    tabula
        .datasets
        .update(&id, sales_frame(&[(1, "north")]))
        .unwrap();
    assert_eq!(memory.physical_row_count(&id), 1);
    assert_eq!(tabula.datasets.purge(&id).unwrap(), 0);
}

#[test]
fn summary_follows_calculations() {
    let (tabula, id) = sales(Arc::new(MemoryStore::new()));
    tabula.calculations.create(&id, "price*2", "doubled", None).unwrap();
    let summary = tabula.datasets.summary(&id).unwrap().expect("summary");
    assert_eq!(summary["columns"]["doubled"]["sum"], 200.0);
}

#[test]
fn appended_rows_recompute_calculations() {
    for store in backends() {
        let (tabula, id) = sales(store);
        tabula.calculations.create(&id, "price*2", "doubled", None).unwrap();
        tabula
            .calculations
            .create(&id, "sum(price)", "region_total", Some("region"))
            .unwrap();

        let dataset = tabula.datasets.save(&id, sales_frame(&[(5, "east")])).unwrap();
        assert_eq!(dataset.row_count, 5);

        assert_eq!(column(&tabula, &id, "doubled"), numbers(&[20, 40, 60, 80, 10]));
        assert_eq!(
            column(&tabula, &id, "region_total"),
            numbers(&[45, 60, 45, 60, 45])
        );
    }
}

#[test]
fn calculation_names_cannot_shadow_raw_columns() {
    for store in backends() {
        let tabula = tabula(store);
        let dataset = tabula.datasets.create().unwrap();
        let mut frame = Frame::new(vec!["Price", "Region"]).unwrap();
        for (price, region) in [(10, "east"), (20, "west")] {
            frame.push_row(vec![price.into(), region.into()]).unwrap();
        }
        let id = tabula.datasets.save(&dataset.id, frame).unwrap().id;

        for name in ["Price", "price", "Region"] {
            let err = tabula
                .calculations
                .create(&id, "price*2", name, None)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DuplicateName, "{name}");
        }
        assert_eq!(tabula.datasets.get(&id).unwrap().schema.len(), 2);

        tabula.calculations.create(&id, "price*2", "Doubled", None).unwrap();
        let mut replacement = Frame::new(vec!["Price", "Region"]).unwrap();
        for (price, region) in [(1, "east"), (2, "west")] {
            replacement.push_row(vec![price.into(), region.into()]).unwrap();
        }
        tabula.datasets.update(&id, replacement).unwrap();

        assert_eq!(column(&tabula, &id, "price"), numbers(&[1, 2]));
        assert_eq!(column(&tabula, &id, "doubled"), numbers(&[2, 4]));

        let dataset = tabula.datasets.get(&id).unwrap();
        let labels = dataset.schema.labels_to_slugs();
        assert_eq!(labels.len(), dataset.schema.len());
        assert_eq!(labels["Price"], "price");
        assert_eq!(labels["Doubled"], "doubled");
    }
}

#[test]
fn same_name_in_another_group_gets_its_own_label() {
    let (tabula, id) = sales(Arc::new(MemoryStore::new()));
    tabula.calculations.create(&id, "sum(price)", "total", None).unwrap();
    tabula
        .calculations
        .create(&id, "sum(price)", "total", Some("region"))
        .unwrap();

    let dataset = tabula.datasets.get(&id).unwrap();
    assert_eq!(dataset.schema.slug_to_label("total"), Some("total"));
    assert_eq!(dataset.schema.slug_to_label("total_1"), Some("total_1"));
}
