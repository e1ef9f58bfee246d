use tabula_storage::StoreConfig;

use crate::ingest::CsvOptions;

/// Settings for a [`crate::Tabula`] instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub store: StoreConfig,
    pub csv: CsvOptions,
}
