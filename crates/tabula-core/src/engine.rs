use std::sync::Arc;

use tabula_storage::{JobQueue, ObservationStore, Store};

use crate::api::{CalculationsController, ObservationsController};
use crate::config::Config;
use crate::datasets::DatasetService;
use crate::ingest::{Ingestor, LocalFileFetcher, UrlFetcher};
use crate::locks::DatasetLocks;
use crate::registry::CalculationRegistry;

/// Every service wired to one store, job queue and lock table.
#[derive(Debug)]
pub struct Tabula {
    pub datasets: Arc<DatasetService>,
    pub calculations: CalculationRegistry,
    pub ingest: Ingestor,
}

impl Tabula {
    pub fn new(store: Arc<dyn Store>, jobs: Arc<dyn JobQueue>, config: Config) -> Self {
        Self::with_fetcher(store, jobs, Arc::new(LocalFileFetcher), config)
    }

    pub fn with_fetcher(
        store: Arc<dyn Store>,
        jobs: Arc<dyn JobQueue>,
        fetcher: Arc<dyn UrlFetcher>,
        config: Config,
    ) -> Self {
        let locks = Arc::new(DatasetLocks::new());
        let observations = ObservationStore::new(store, Arc::clone(&jobs), config.store);
        let calculations = CalculationRegistry::new(observations.clone(), Arc::clone(&locks));
        let datasets = Arc::new(DatasetService::new(
            observations,
            calculations.clone(),
            locks,
        ));
        let ingest = Ingestor::new(Arc::clone(&datasets), jobs, fetcher, config.csv);
        Self {
            datasets,
            calculations,
            ingest,
        }
    }

    pub fn calculations_controller(&self) -> CalculationsController {
        CalculationsController::new(self.calculations.clone())
    }

    pub fn observations_controller(&self) -> ObservationsController {
        ObservationsController::new(DatasetService::clone(&self.datasets))
    }
}
