/// Tuning knobs for [`crate::ObservationStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum rows per insert or column-write batch. Zero is treated as one.
    pub batch_size: usize,
    /// Queue a summary job after every `save` and `update`.
    pub summarize_on_save: bool,
    /// Rows inspected when a schema is inferred from incoming data.
    pub sample_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            summarize_on_save: true,
            sample_rows: 100,
        }
    }
}

impl StoreConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
