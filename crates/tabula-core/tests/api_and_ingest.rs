use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tabula_core::{Config, ErrorKind, Tabula};
use tabula_model::{DatasetState, Frame, SimpleType, Value};
use tabula_storage::{FindQuery, InlineJobQueue, MemoryStore, TokioJobQueue};

const SALES_CSV: &str = "Price,Region,Sold On\n10,east,2012-01-01\n20,west,2012-01-02\n";

fn tabula() -> Tabula {
    Tabula::new(
        Arc::new(MemoryStore::new()),
        Arc::new(InlineJobQueue),
        Config::default(),
    )
}

fn seeded(tabula: &Tabula) -> String {
    let dataset = tabula.datasets.create().unwrap();
    let mut frame = Frame::new(vec!["price", "region"]).unwrap();
    for (price, region) in [(10, "east"), (20, "west"), (30, "east"), (40, "west")] {
        frame.push_row(vec![price.into(), region.into()]).unwrap();
    }
    tabula.datasets.save(&dataset.id, frame).unwrap();
    dataset.id.to_string()
}

#[test]
fn calculations_controller_documents() {
    let tabula = tabula();
    let id = seeded(&tabula);
    let controller = tabula.calculations_controller();

    assert_eq!(
        controller.create(&id, "price*2", "doubled", None),
        json!({"status": "created", "name": "doubled", "dataset_id": id})
    );
    assert_eq!(
        controller.show(&id),
        json!([{"name": "doubled", "formula": "price*2", "group": null, "state": "ready"}])
    );

    let failed = controller.create(&id, "unknown_col + 1", "broken", None);
    assert!(failed["error"].as_str().unwrap().contains("unknown_col"));

    assert_eq!(
        controller.delete(&id, "nope", None),
        json!({"error": "name and dataset_id combination not found"})
    );
    assert_eq!(controller.delete(&id, "doubled", None), json!({"status": "deleted"}));
    assert_eq!(controller.show(&id), json!([]));
}

#[test]
fn observations_controller_documents() {
    let tabula = tabula();
    let id = seeded(&tabula);
    let controller = tabula.observations_controller();

    let rows = controller.find(
        &id,
        &FindQuery::default()
            .with_query(r#"{"region": "west"}"#)
            .with_select(r#"{"price": 1}"#),
    );
    assert_eq!(rows, json!([{"price": 20}, {"price": 40}]));

    let err = controller.find(&id, &FindQuery::default().with_query("{bad"));
    assert!(err["error"]
        .as_str()
        .unwrap()
        .starts_with("cannot decode query:"));

    let err = controller.find(&id, &FindQuery::default().with_select("[1]"));
    assert!(err["error"]
        .as_str()
        .unwrap()
        .starts_with("cannot decode select:"));

    assert_eq!(
        controller.delete(&id, Some(r#"{"price": {"$gte": 30}}"#)),
        json!({"status": "deleted", "count": 2})
    );
    assert_eq!(controller.summary(&id)["row_count"], 2);
}

#[test]
fn local_urls_need_permission() {
    let tabula = tabula();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SALES_CSV.as_bytes()).unwrap();
    let url = format!("file://{}", file.path().display());

    let err = tabula.ingest.create_from_url(&url, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoUnavailable);

    let dataset = tabula.ingest.create_from_url(&url, true).unwrap();
    let dataset = tabula.datasets.get(&dataset.id).unwrap();
    assert_eq!(dataset.state, DatasetState::Ready);
    assert_eq!(dataset.row_count, 2);
    assert_eq!(
        dataset.schema.keys().collect::<Vec<_>>(),
        vec!["price", "region", "sold_on"]
    );
    assert_eq!(
        dataset.schema.get("sold_on").map(|c| c.simpletype),
        Some(SimpleType::Datetime)
    );
    assert_eq!(dataset.schema.slug_to_label("sold_on"), Some("Sold On"));
}

#[test]
fn unreadable_sources_fail_synchronously() {
    let tabula = tabula();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.csv");
    let err = tabula
        .ingest
        .create_from_url(missing.to_str().unwrap(), true)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoUnavailable);
}

#[test]
fn uploaded_files_are_imported() {
    let tabula = tabula();
    let dataset = tabula.ingest.create_from_file(SALES_CSV.as_bytes()).unwrap();
    assert_eq!(dataset.state, DatasetState::Pending);

    let rows = tabula
        .datasets
        .find(&dataset.id, &FindQuery::default().with_order_by("-price"))
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["price"], Value::from(20));
    assert!(matches!(rows[0]["sold_on"], Value::DateTime(_)));
}

#[test]
fn schema_documents_drive_date_recognition() {
    let tabula = tabula();
    let document = r#"[
        {"name": "when", "label": "When", "simpletype": "datetime", "olap_role": "dimension"},
        {"name": "amount", "label": "Amount", "simpletype": "numeric", "olap_role": "measure"}
    ]"#;
    let dataset = tabula.ingest.create_from_schema_document(document).unwrap();
    let stored = tabula.datasets.get(&dataset.id).unwrap();
    assert!(stored.is_ready());
    assert_eq!(stored.row_count, 0);
    assert_eq!(stored.column_count, 2);

    tabula
        .ingest
        .import_csv(&dataset.id, "When,Amount\n2012-02-03,5\n".as_bytes())
        .unwrap();
    let rows = tabula.datasets.find(&dataset.id, &FindQuery::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(matches!(rows[0]["when"], Value::DateTime(_)));
    assert_eq!(rows[0]["amount"], Value::from(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ingestion_runs_on_the_tokio_queue() {
    let queue = TokioJobQueue::current().expect("inside a runtime");
    let tabula = Tabula::new(
        Arc::new(MemoryStore::new()),
        Arc::new(queue),
        Config::default(),
    );
    let dataset = tabula.ingest.create_from_file(SALES_CSV.as_bytes()).unwrap();

    let mut ready = false;
    for _ in 0..200 {
        if tabula.datasets.get(&dataset.id).unwrap().is_ready() {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ready, "import job never completed");
}
